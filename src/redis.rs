use crate::error::Result;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Fixed-window per-user rate limiter for vote requests.
#[derive(Clone)]
pub struct RedisClient {
    manager: Arc<Mutex<ConnectionManager>>,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self {
            manager: Arc::new(Mutex::new(manager)),
        })
    }

    /// Counts one request against `key` and reports whether it fits the
    /// window. Redis failures are returned, never read as an empty window.
    pub async fn check_rate_limit(
        &self,
        key: &str,
        limit: u32,
        window_seconds: usize,
    ) -> Result<bool> {
        let mut conn = self.manager.lock().await;

        let count: u32 = conn.incr(key, 1).await?;
        if count == 1 {
            let _: () = conn.expire(key, window_seconds as i64).await?;
        }

        Ok(within_limit(count, limit))
    }
}

/// `count` includes the request being checked.
fn within_limit(count: u32, limit: u32) -> bool {
    count <= limit
}

pub fn vote_rate_limit_key(user_id: &str) -> String {
    format!("vote:{}", user_id)
}
