/// Application context and dependency injection
use crate::{
    config::{CacheBackend, ServerConfig},
    db,
    error::SyncResult,
    freshness::FreshnessPolicy,
    mapping::MappingStore,
    membership::{InMemoryMembershipCache, MembershipCache, SqliteMembershipCache},
    profile::{ProfileClient, ProfileClientConfig, ProfileSource},
    reconcile::Reconciler,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub mappings: Arc<MappingStore>,
    pub reconciler: Arc<Reconciler>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> SyncResult<Self> {
        // Validate configuration
        config.validate()?;

        let db = db::create_pool(&config.storage.database, db::DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        let profiles: Arc<dyn ProfileSource> = Arc::new(ProfileClient::new(
            ProfileClientConfig::from_iam_config(&config.iam),
        )?);

        Self::with_profile_source(config, db, profiles)
    }

    /// Assemble the context around an existing pool and profile source
    pub fn with_profile_source(
        config: ServerConfig,
        db: SqlitePool,
        profiles: Arc<dyn ProfileSource>,
    ) -> SyncResult<Self> {
        let mappings = Arc::new(MappingStore::new(db.clone()));

        let cache: Arc<dyn MembershipCache> = match config.storage.cache_backend {
            CacheBackend::Sqlite => Arc::new(SqliteMembershipCache::new(db.clone())),
            CacheBackend::Memory => Arc::new(InMemoryMembershipCache::new()),
        };

        let policy = FreshnessPolicy::from_secs(config.iam.freshness_window_secs)?;
        tracing::info!(
            "Membership cache: {:?}, freshness window {}s",
            config.storage.cache_backend,
            config.iam.freshness_window_secs
        );

        let reconciler = Arc::new(Reconciler::new(
            mappings.clone(),
            mappings.clone(),
            cache,
            profiles,
            policy,
        ));

        Ok(Self {
            config: Arc::new(config),
            db,
            mappings,
            reconciler,
        })
    }

    /// Address the HTTP server binds to
    pub fn bind_address(&self) -> String {
        format!(
            "{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
