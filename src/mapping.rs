/// Identity links and group mappings
///
/// Both tables are owned by the host/admin side. The reconciler only reads
/// them through `IdentityLinks` and `GroupMappings`; the admin API writes
/// them through `MappingStore`.
use crate::{
    error::{SyncError, SyncResult},
    membership::sqlite::parse_timestamp,
    GroupId, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;

/// Local user -> external identity id
#[async_trait]
pub trait IdentityLinks: Send + Sync {
    async fn iam_uid(&self, user_id: UserId) -> SyncResult<Option<String>>;
}

/// Local group <-> IAM group name
#[async_trait]
pub trait GroupMappings: Send + Sync {
    async fn iam_group_name(&self, group_id: GroupId) -> SyncResult<Option<String>>;

    /// Local groups whose IAM group name is in `iam_groups`
    async fn local_groups_for(&self, iam_groups: &BTreeSet<String>) -> SyncResult<BTreeSet<GroupId>>;
}

/// Administrator-defined group mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMapping {
    pub group_id: GroupId,
    pub iam_group_name: String,
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed mapping tables
#[derive(Clone)]
pub struct MappingStore {
    db: SqlitePool,
}

impl MappingStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Link a local user to an external identity. Links are immutable once set.
    pub async fn link_identity(&self, user_id: UserId, iam_uid: &str) -> SyncResult<()> {
        if iam_uid.trim().is_empty() {
            return Err(SyncError::Validation("IAM uid cannot be empty".to_string()));
        }

        if let Some(existing) = self.iam_uid(user_id).await? {
            if existing == iam_uid {
                return Ok(());
            }
            return Err(SyncError::Conflict(format!(
                "User {} is already linked to {}",
                user_id, existing
            )));
        }

        sqlx::query("INSERT INTO identity_link (user_id, iam_uid, created_at) VALUES (?1, ?2, ?3)")
            .bind(user_id)
            .bind(iam_uid)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.db)
            .await?;

        tracing::info!("Linked user {} to IAM identity {}", user_id, iam_uid);
        Ok(())
    }

    /// Create a group mapping
    pub async fn create_group_mapping(
        &self,
        group_id: GroupId,
        iam_group_name: &str,
    ) -> SyncResult<GroupMapping> {
        let iam_group_name = iam_group_name.trim();
        if iam_group_name.is_empty() {
            return Err(SyncError::Validation(
                "IAM group name cannot be empty".to_string(),
            ));
        }

        let taken = sqlx::query(
            "SELECT group_id FROM group_mapping WHERE group_id = ?1 OR iam_group_name = ?2",
        )
        .bind(group_id)
        .bind(iam_group_name)
        .fetch_optional(&self.db)
        .await?;
        if taken.is_some() {
            return Err(SyncError::Conflict(format!(
                "Group {} or IAM group {} is already mapped",
                group_id, iam_group_name
            )));
        }

        let mapping = GroupMapping {
            group_id,
            iam_group_name: iam_group_name.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO group_mapping (group_id, iam_group_name, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(mapping.group_id)
        .bind(&mapping.iam_group_name)
        .bind(mapping.created_at.to_rfc3339())
        .execute(&self.db)
        .await?;

        tracing::info!(
            "Mapped IAM group {} to local group {}",
            mapping.iam_group_name,
            mapping.group_id
        );
        Ok(mapping)
    }

    /// Delete a group mapping
    pub async fn delete_group_mapping(&self, group_id: GroupId) -> SyncResult<()> {
        let result = sqlx::query("DELETE FROM group_mapping WHERE group_id = ?1")
            .bind(group_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::NotFound(format!(
                "No mapping for group {}",
                group_id
            )));
        }

        tracing::info!("Removed IAM mapping for group {}", group_id);
        Ok(())
    }

    /// List group mappings ordered by local group id
    pub async fn list_group_mappings(&self) -> SyncResult<Vec<GroupMapping>> {
        let rows = sqlx::query(
            "SELECT group_id, iam_group_name, created_at FROM group_mapping ORDER BY group_id",
        )
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|row| -> SyncResult<GroupMapping> {
                Ok(GroupMapping {
                    group_id: row.try_get("group_id")?,
                    iam_group_name: row.try_get("iam_group_name")?,
                    created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl IdentityLinks for MappingStore {
    async fn iam_uid(&self, user_id: UserId) -> SyncResult<Option<String>> {
        let row = sqlx::query("SELECT iam_uid FROM identity_link WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("iam_uid")?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl GroupMappings for MappingStore {
    async fn iam_group_name(&self, group_id: GroupId) -> SyncResult<Option<String>> {
        let row = sqlx::query("SELECT iam_group_name FROM group_mapping WHERE group_id = ?1")
            .bind(group_id)
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("iam_group_name")?)),
            None => Ok(None),
        }
    }

    async fn local_groups_for(&self, iam_groups: &BTreeSet<String>) -> SyncResult<BTreeSet<GroupId>> {
        if iam_groups.is_empty() {
            return Ok(BTreeSet::new());
        }

        Ok(self
            .list_group_mappings()
            .await?
            .into_iter()
            .filter(|m| iam_groups.contains(&m.iam_group_name))
            .map(|m| m.group_id)
            .collect())
    }
}
