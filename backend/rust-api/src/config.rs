use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_database: String,
    pub redis_uri: String,
    pub bind_addr: String,
    /// Default percent-watched threshold that completes a video part.
    /// Individual videos may override it.
    pub completion_threshold: f64,
    /// Open untimed attempts older than this are reclaimed as timed out.
    pub abandoned_attempt_ttl_days: i64,
    /// Background sweep interval for past-deadline open attempts.
    /// 0 disables the sweeper; lazy enforcement on touch still applies.
    pub sweep_interval_seconds: u64,
    /// Optional webhook receiving module-completed / course-certified
    /// signals as JSON.
    pub signal_webhook_url: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load environment variables from root .env file (two levels up)
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            // Fallback to current directory .env for backward compatibility
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let config_builder = config::Config::builder()
            .add_source(
                config::File::with_name(&format!("config/{}", env)).required(false), // Allow missing config file, fallback to ENV
            )
            // Override with environment variables (prefix: APP_)
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings = config_builder.build()?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017/learntrack".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "learntrack".to_string());

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let completion_threshold = settings
            .get_float("progress.completion_threshold")
            .ok()
            .or_else(|| {
                env::var("COMPLETION_THRESHOLD")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or(90.0)
            .clamp(0.0, 100.0);

        let abandoned_attempt_ttl_days = settings
            .get_int("attempts.abandoned_ttl_days")
            .ok()
            .or_else(|| {
                env::var("ABANDONED_ATTEMPT_TTL_DAYS")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .filter(|v| *v > 0)
            .unwrap_or(14);

        let sweep_interval_seconds = settings
            .get_int("attempts.sweep_interval_seconds")
            .ok()
            .or_else(|| {
                env::var("SWEEP_INTERVAL_SECONDS")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .map(|v: i64| v.max(0) as u64)
            .unwrap_or(60);

        let signal_webhook_url = settings
            .get_string("signals.webhook_url")
            .ok()
            .or_else(|| env::var("SIGNAL_WEBHOOK_URL").ok())
            .filter(|s| !s.is_empty());

        Ok(Config {
            mongo_uri,
            mongo_database,
            redis_uri,
            bind_addr,
            completion_threshold,
            abandoned_attempt_ttl_days,
            sweep_interval_seconds,
            signal_webhook_url,
        })
    }
}
