use std::collections::HashMap;
use std::sync::Arc;

use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::Config;

/// Per-(learner, resource) critical sections. Events for the same key
/// are serialized for the duration of one load-merge-store round;
/// independent keys proceed in parallel.
pub struct ResourceLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let cell = {
            let mut map = self.inner.lock().await;
            // Drop idle entries once the map grows; a held guard keeps
            // its Arc alive so this never frees a lock in use.
            if map.len() > 4096 {
                map.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        cell.lock_owned().await
    }

    /// Canonical key for one (learner, resource) pair.
    pub fn key(learner_id: &str, resource_id: &str) -> String {
        format!("{}:{}", learner_id, resource_id)
    }
}

impl Default for ResourceLocks {
    fn default() -> Self {
        Self::new()
    }
}

pub struct AppState {
    pub config: Config,
    pub mongo: Database,
    pub redis: ConnectionManager,
    pub locks: ResourceLocks,
    pub http: reqwest::Client,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        tracing::info!("Attempting to connect to Redis...");

        // Create ConnectionManager with longer timeout
        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        tracing::info!("Redis ConnectionManager created, testing with PING...");

        // Test connection
        let mut conn = redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        Ok(Self {
            config,
            mongo,
            redis,
            locks: ResourceLocks::new(),
            http: reqwest::Client::new(),
        })
    }
}

pub mod attempt_service;
pub mod catalog_service;
pub mod enrollment_service;
pub mod progress_service;
pub mod signal_service;
pub mod sweeper;
