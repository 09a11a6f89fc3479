use std::path::PathBuf;
use std::time::Duration;

// Config is the single place runtime settings are read from the environment.
// Every knob has a SYNCFLOW_* name and an unprefixed fallback.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub worker_id: String,
    pub queue: String,
    pub visibility_seconds: i64,
    pub max_receives: i32,
    pub consumers: usize,
    pub page_size: u32,
    pub page_pacing_ms: u64,
    pub source_base_url: String,
    pub source_timeout_secs: u64,
    pub dataset_root: PathBuf,
    pub api_addr: Option<String>,
    pub migrate_on_startup: bool,
    pub maintenance_interval_secs: u64,
    pub dedup_window_secs: i64,
}

pub const DEFAULT_SOURCE_BASE_URL: &str = "https://api.spotify.com/v1";

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let db_max_connections = parsed("SYNCFLOW_DB_MAX_CONNECTIONS", "DB_MAX_CONNECTIONS")
            .unwrap_or(8)
            .clamp(1, 64);

        let db_acquire_timeout_secs =
            parsed("SYNCFLOW_DB_ACQUIRE_TIMEOUT_SECS", "DB_ACQUIRE_TIMEOUT_SECS")
                .unwrap_or(10)
                .clamp(1, 60);

        let worker_id = env_or_fallback("SYNCFLOW_WORKER_ID", "WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "worker-1".to_string());

        let queue = env_or_fallback("SYNCFLOW_QUEUE", "QUEUE").unwrap_or_else(|| "sync".into());

        let visibility_seconds = parsed("SYNCFLOW_VISIBILITY_SECONDS", "VISIBILITY_SECONDS")
            .unwrap_or(30)
            .max(1);

        let max_receives = parsed("SYNCFLOW_MAX_RECEIVES", "MAX_RECEIVES")
            .unwrap_or(5)
            .max(1);

        let consumers = parsed("SYNCFLOW_CONSUMERS", "CONSUMERS")
            .unwrap_or(4)
            .clamp(1, 64);

        let page_size = parsed("SYNCFLOW_PAGE_SIZE", "PAGE_SIZE")
            .unwrap_or(50)
            .clamp(1, 50);

        let page_pacing_ms = parsed("SYNCFLOW_PAGE_PACING_MS", "PAGE_PACING_MS").unwrap_or(250);

        let source_base_url = env_or_fallback("SYNCFLOW_SOURCE_BASE_URL", "SOURCE_BASE_URL")
            .unwrap_or_else(|| DEFAULT_SOURCE_BASE_URL.to_string());

        let source_timeout_secs =
            parsed("SYNCFLOW_SOURCE_TIMEOUT_SECS", "SOURCE_TIMEOUT_SECS").unwrap_or(30);

        let dataset_root = env_or_fallback("SYNCFLOW_DATASET_ROOT", "DATASET_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/user_saved_tracks"));

        let api_addr = env_or_fallback("SYNCFLOW_API_ADDR", "API_ADDR")
            .and_then(|s| normalize_optional_addr(&s));

        let migrate_on_startup = env_bool("SYNCFLOW_MIGRATE_ON_STARTUP").unwrap_or(false);

        let maintenance_interval_secs =
            parsed("SYNCFLOW_MAINTENANCE_INTERVAL_SECS", "MAINTENANCE_INTERVAL_SECS")
                .unwrap_or(60);

        let dedup_window_secs =
            parsed("SYNCFLOW_DEDUP_WINDOW_SECS", "DEDUP_WINDOW_SECS").unwrap_or(300);

        Ok(Self {
            database_url,
            db_max_connections,
            db_acquire_timeout_secs,
            worker_id,
            queue,
            visibility_seconds,
            max_receives,
            consumers,
            page_size,
            page_pacing_ms,
            source_base_url,
            source_timeout_secs,
            dataset_root,
            api_addr,
            migrate_on_startup,
            maintenance_interval_secs,
            dedup_window_secs,
        })
    }

    pub fn visibility(&self) -> Duration {
        Duration::from_secs(self.visibility_seconds as u64)
    }

    pub fn db_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.db_acquire_timeout_secs)
    }

    pub fn page_pacing(&self) -> Duration {
        Duration::from_millis(self.page_pacing_ms)
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn parsed<T: std::str::FromStr>(primary: &str, fallback: &str) -> Option<T> {
    env_or_fallback(primary, fallback).and_then(|s| s.trim().parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}

#[cfg(test)]
mod tests {
    use super::normalize_optional_addr;

    #[test]
    fn api_addr_can_be_switched_off() {
        assert_eq!(normalize_optional_addr("  "), None);
        assert_eq!(normalize_optional_addr("off"), None);
        assert_eq!(normalize_optional_addr("NONE"), None);
        assert_eq!(
            normalize_optional_addr(" 0.0.0.0:8080 "),
            Some("0.0.0.0:8080".to_string())
        );
    }
}
