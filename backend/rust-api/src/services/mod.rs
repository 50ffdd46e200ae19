use std::sync::Arc;

use mongodb::Client as MongoClient;

use crate::config::Config;

pub mod checkpoint;
pub mod insights_service;
pub mod session_cache;
pub mod store;
pub mod survey_service;
pub mod take_service;

use checkpoint::CheckpointWriter;
use session_cache::{RedisSessionCache, SessionCache};
use store::{MongoStore, SurveyStore};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn SurveyStore>,
    pub cache: Arc<dyn SessionCache>,
    pub checkpoints: CheckpointWriter,
}

impl AppState {
    /// Production wiring: MongoDB-backed store, Redis-backed session cache,
    /// background checkpoint writer.
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);
        let store: Arc<dyn SurveyStore> = Arc::new(MongoStore::new(mongo));

        let cache: Arc<dyn SessionCache> = Arc::new(RedisSessionCache::connect(redis_client).await?);

        let checkpoints = CheckpointWriter::spawn(store.clone());

        Ok(Self {
            config,
            store,
            cache,
            checkpoints,
        })
    }

    /// Alternate wiring for preview/demo flows and tests: any store/cache
    /// pair, typically the in-memory implementations.
    pub fn with_backends(
        config: Config,
        store: Arc<dyn SurveyStore>,
        cache: Arc<dyn SessionCache>,
    ) -> Self {
        let checkpoints = CheckpointWriter::spawn(store.clone());
        Self {
            config,
            store,
            cache,
            checkpoints,
        }
    }
}
