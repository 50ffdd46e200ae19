use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    /// Base URL of the external LLM invocation API used for report
    /// narratives; empty disables the narrative entirely.
    pub llm_api_url: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load environment variables from root .env file (two levels up)
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
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
            .unwrap_or_else(|_| "mongodb://localhost:27017/picksearch".to_string());

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or_else(|_| {
                let host = env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
                let port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
                format!("redis://{}:{}/0", host, port)
            });

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "picksearch".to_string());

        let llm_api_url = settings
            .get_string("llm_api.url")
            .or_else(|_| env::var("LLM_API_URL"))
            .unwrap_or_default();
        if llm_api_url.is_empty() {
            eprintln!("WARNING: LLM_API_URL not set, insight narratives are disabled");
        }

        Ok(Config {
            mongo_uri,
            redis_uri,
            mongo_database,
            llm_api_url,
        })
    }

    /// Minimal configuration for tests and preview flows that run on the
    /// in-memory backends.
    pub fn for_testing() -> Self {
        Config {
            mongo_uri: String::new(),
            redis_uri: String::new(),
            mongo_database: "picksearch-test".to_string(),
            llm_api_url: String::new(),
        }
    }
}
