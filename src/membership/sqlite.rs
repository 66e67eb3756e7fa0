/// Membership cache - SQLite layer
use crate::{
    error::{SyncError, SyncResult},
    membership::{MembershipCache, MembershipEntry},
    UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;

/// Membership cache persisted in the `iam_membership` table
#[derive(Clone)]
pub struct SqliteMembershipCache {
    db: SqlitePool,
}

impl SqliteMembershipCache {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MembershipCache for SqliteMembershipCache {
    async fn get(&self, user_id: UserId) -> SyncResult<Option<MembershipEntry>> {
        let result = sqlx::query(
            r#"
            SELECT iam_uid, groups, last_refresh
            FROM iam_membership
            WHERE user_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = result else {
            return Ok(None);
        };

        let groups: BTreeSet<String> =
            serde_json::from_str(&row.try_get::<String, _>("groups")?).map_err(|e| {
                SyncError::Internal(format!("Invalid cached group list for {}: {}", user_id, e))
            })?;

        Ok(Some(MembershipEntry {
            uid: row.try_get("iam_uid")?,
            groups,
            last_refresh: parse_timestamp(&row.try_get::<String, _>("last_refresh")?)?,
        }))
    }

    async fn put(&self, user_id: UserId, entry: &MembershipEntry) -> SyncResult<()> {
        let groups = serde_json::to_string(&entry.groups)
            .map_err(|e| SyncError::Internal(format!("Failed to serialize groups: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO iam_membership (user_id, iam_uid, groups, last_refresh)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id) DO UPDATE SET
                iam_uid = excluded.iam_uid,
                groups = excluded.groups,
                last_refresh = excluded.last_refresh
            "#,
        )
        .bind(user_id)
        .bind(&entry.uid)
        .bind(groups)
        .bind(entry.last_refresh.to_rfc3339())
        .execute(&self.db)
        .await?;

        Ok(())
    }
}

/// Parse RFC3339 timestamp
pub(crate) fn parse_timestamp(s: &str) -> SyncResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::Internal(format!("Invalid timestamp: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn create_test_cache() -> SqliteMembershipCache {
        let db = crate::db::memory_pool().await.unwrap();
        SqliteMembershipCache::new(db)
    }

    #[tokio::test]
    async fn test_missing_entry() {
        let cache = create_test_cache().await;
        assert!(cache.get(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_and_get_round_trips_timestamp() {
        let cache = create_test_cache().await;
        let refreshed = Utc::now() - Duration::minutes(16);
        let groups: BTreeSet<String> = ["iam_group".to_string()].into();

        cache
            .put(7, &MembershipEntry::new("ad|Mozilla-LDAP|bob", groups.clone(), refreshed))
            .await
            .unwrap();

        let entry = cache.get(7).await.unwrap().unwrap();
        assert_eq!(entry.uid, "ad|Mozilla-LDAP|bob");
        assert_eq!(entry.groups, groups);
        assert_eq!(entry.last_refresh, refreshed);
    }

    #[tokio::test]
    async fn test_put_overwrites_in_place() {
        let cache = create_test_cache().await;
        let groups: BTreeSet<String> = ["a".to_string(), "b".to_string()].into();
        cache
            .put(7, &MembershipEntry::new("uid", groups, Utc::now()))
            .await
            .unwrap();

        cache
            .put(7, &MembershipEntry::new("uid", BTreeSet::new(), Utc::now()))
            .await
            .unwrap();

        let entry = cache.get(7).await.unwrap().unwrap();
        assert!(entry.groups.is_empty());
    }
}
