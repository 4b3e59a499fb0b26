use std::env;

/// Which persistence backend to construct at startup. Chosen once from
/// configuration, never probed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub initial_backoff_seconds: u64,
    pub max_backoff_seconds: u64,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "cardpress/0.1".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            initial_backoff_seconds: 2,
            max_backoff_seconds: 10,
            max_redirects: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageBackend,
    pub database_url: String,
    pub ai: AiConfig,
    pub fetch: FetchConfig,
    /// Cap on pipeline invocations per crawl run.
    pub generation_cap: usize,
}

impl Config {
    pub fn from_env() -> Self {
        let storage = match env::var("CARDPRESS_STORAGE").as_deref() {
            Ok("sqlite") => StorageBackend::Sqlite,
            _ => StorageBackend::Memory,
        };

        Self {
            storage,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:cardpress.db".to_string()),
            ai: AiConfig {
                base_url: env::var("CARDPRESS_AI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                api_key: env::var("CARDPRESS_AI_API_KEY").unwrap_or_default(),
                model: env::var("CARDPRESS_AI_MODEL")
                    .unwrap_or_else(|_| "gpt-4.1-nano".to_string()),
            },
            fetch: FetchConfig::default(),
            generation_cap: 3,
        }
    }
}
