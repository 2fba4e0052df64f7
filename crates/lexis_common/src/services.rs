//! Wiring of the storage, cache, event bus and readers.

use crate::cache::TtlCache;
use crate::config::{LexisConfig, XpRewards};
use crate::content::ContentRepository;
use crate::db::{DbLocation, LearningDb};
use crate::error::Result;
use crate::events::EventBus;
use crate::progress::ProgressAggregator;
use crate::read_model::CatalogReader;
use crate::stats::UserStatsReader;
use crate::xp::XpAwarder;
use std::sync::Arc;
use tracing::info;

/// Everything a request handler needs, cheap to clone
#[derive(Clone)]
pub struct Services {
    pub db: Arc<LearningDb>,
    pub cache: Arc<TtlCache>,
    pub bus: Arc<EventBus>,
    pub content: Arc<ContentRepository>,
    pub progress: Arc<ProgressAggregator>,
    pub stats: Arc<UserStatsReader>,
    pub xp: Arc<XpAwarder>,
    pub catalog: Arc<CatalogReader>,
}

impl Services {
    /// Open the configured database and build the services on top of it
    pub async fn open(config: &LexisConfig) -> Result<Self> {
        let db = LearningDb::open(DbLocation::Custom(config.database.path.clone())).await?;
        Ok(Self::with_db(db, config))
    }

    pub fn with_db(db: LearningDb, config: &LexisConfig) -> Self {
        let cache = TtlCache::new(config.cache.ttl(), config.cache.max_size);
        Self::with_parts(Arc::new(db), Arc::new(cache), config.xp)
    }

    /// Assemble from prebuilt parts and register the cache subscribers
    pub fn with_parts(db: Arc<LearningDb>, cache: Arc<TtlCache>, rewards: XpRewards) -> Self {
        let bus = Arc::new(EventBus::new());

        let progress = Arc::new(ProgressAggregator::new(db.clone(), cache.clone()));
        let stats = Arc::new(UserStatsReader::new(db.clone(), cache.clone()));
        bus.subscribe(progress.clone());
        bus.subscribe(stats.clone());

        let content = Arc::new(ContentRepository::new(db.clone(), bus.clone()));
        let xp = Arc::new(XpAwarder::new(db.clone(), bus.clone(), rewards));
        let catalog = Arc::new(CatalogReader::new(
            db.clone(),
            content.clone(),
            progress.clone(),
        ));

        info!(
            ttl_secs = cache.ttl().as_secs(),
            subscribers = bus.subscriber_count(),
            "Services ready"
        );

        Self {
            db,
            cache,
            bus,
            content,
            progress,
            stats,
            xp,
            catalog,
        }
    }
}
