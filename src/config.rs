use crate::domain::Page;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings. Every flag can also be supplied through its
/// `GASFLOW_*` environment variable.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct Settings {
    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "GASFLOW_DB_PATH", global = true)]
    pub db_path: Option<PathBuf>,

    /// Lifetime of cached entities and list pages, in seconds.
    #[arg(long, env = "GASFLOW_CACHE_TTL_SECS", default_value_t = 900, global = true)]
    pub cache_ttl_secs: u64,

    /// Search radius used when announcing new orders to vendors.
    #[arg(long, env = "GASFLOW_MAX_DISTANCE_KM", default_value_t = 50.0, global = true)]
    pub max_distance_km: f64,

    /// Default page size for listings.
    #[arg(long, env = "GASFLOW_PAGE_LIMIT", default_value_t = Page::DEFAULT_LIMIT, global = true)]
    pub page_limit: usize,
}

impl Settings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: None,
            cache_ttl_secs: 900,
            max_distance_km: 50.0,
            page_limit: Page::DEFAULT_LIMIT,
        }
    }
}
