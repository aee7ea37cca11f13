use std::env;

use chrono::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

/// Constants of the decay + quality ranking formula and the batch pass.
#[derive(Debug, Clone)]
pub struct RankingConfig {
    pub horizon: Duration,
    /// How far back the front page reaches. Posts inside it are re-ranked on
    /// every pass even after their time score bottomed out.
    pub listing_window: Duration,
    pub floor: f64,
    pub vote_weight: f64,
    pub time_weight: f64,
    pub quality_weight: f64,
    pub page_size: usize,
    pub interval_secs: u64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            horizon: Duration::hours(24),
            listing_window: Duration::days(7),
            floor: 0.0,
            vote_weight: 1.0,
            time_weight: 1.0,
            quality_weight: 0.5,
            page_size: 100,
            interval_secs: 900,
        }
    }
}

/// Postgres connection pool bounds.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub storage_backend: StorageBackend,
    pub database_url: Option<String>,
    pub pool: PoolConfig,
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub vote_rate_limit: u32,
    pub reconcile_interval_secs: u64,
    pub ranking: RankingConfig,
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        let defaults = RankingConfig::default();
        let pool_defaults = PoolConfig::default();

        let storage_backend = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "postgres" | "pg" => StorageBackend::Postgres,
            _ => StorageBackend::Memory,
        };

        let database_url = env::var("DATABASE_URL").ok();
        if storage_backend == StorageBackend::Postgres && database_url.is_none() {
            return Err(env::VarError::NotPresent);
        }

        Ok(Self {
            storage_backend,
            database_url,
            pool: PoolConfig {
                max_connections: parse_or(
                    "DATABASE_MAX_CONNECTIONS",
                    pool_defaults.max_connections,
                ),
                min_connections: parse_or(
                    "DATABASE_MIN_CONNECTIONS",
                    pool_defaults.min_connections,
                ),
                acquire_timeout_secs: parse_or(
                    "DATABASE_ACQUIRE_TIMEOUT_SECS",
                    pool_defaults.acquire_timeout_secs,
                ),
            },
            redis_url: env::var("REDIS_URL").ok(),
            jwt_secret: env::var("JWT_SECRET")?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_or("PORT", 3000),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            vote_rate_limit: parse_or("VOTE_RATE_LIMIT", 100),
            reconcile_interval_secs: parse_or("RECONCILE_INTERVAL_SECS", 3600),
            ranking: RankingConfig {
                horizon: Duration::hours(parse_or("RANKING_HORIZON_HOURS", 24)),
                listing_window: Duration::days(parse_or("RANKING_LISTING_WINDOW_DAYS", 7)),
                floor: defaults.floor,
                vote_weight: parse_or("RANKING_VOTE_WEIGHT", defaults.vote_weight),
                time_weight: parse_or("RANKING_TIME_WEIGHT", defaults.time_weight),
                quality_weight: parse_or("RANKING_QUALITY_WEIGHT", defaults.quality_weight),
                page_size: parse_or("RANKING_PAGE_SIZE", defaults.page_size).max(1),
                interval_secs: parse_or("RANKING_INTERVAL_SECS", defaults.interval_secs),
            },
        })
    }
}
