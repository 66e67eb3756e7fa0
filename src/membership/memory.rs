/// Process-local membership cache
use crate::{
    error::SyncResult,
    membership::{MembershipCache, MembershipEntry},
    UserId,
};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryMembershipCache {
    entries: RwLock<HashMap<UserId, MembershipEntry>>,
}

impl InMemoryMembershipCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl MembershipCache for InMemoryMembershipCache {
    async fn get(&self, user_id: UserId) -> SyncResult<Option<MembershipEntry>> {
        Ok(self.entries.read().await.get(&user_id).cloned())
    }

    async fn put(&self, user_id: UserId, entry: &MembershipEntry) -> SyncResult<()> {
        self.entries.write().await.insert(user_id, entry.clone());
        Ok(())
    }
}
