use anyhow::{Context, Result};
use std::{str::FromStr, time::Duration};

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para registrar comandos en un solo guild

    // Extracción
    pub ytdlp_path: String,
    pub extractor_concurrency: usize,
    pub max_playlist_size: usize,
    pub search_results: usize,
    pub search_cache_ttl: Duration,

    // Inactividad
    pub idle_timeout: Duration,
    pub idle_check_interval: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `load` uses the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            discord_token: value("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            guild_id: value("GUILD_ID").map(|v| parse(&v, "GUILD_ID")).transpose()?,

            ytdlp_path: value("YTDLP_PATH").unwrap_or_else(|| "yt-dlp".to_string()),
            extractor_concurrency: parse_or(value("EXTRACTOR_CONCURRENCY"), "EXTRACTOR_CONCURRENCY", 3)?,
            max_playlist_size: parse_or(value("MAX_PLAYLIST_SIZE"), "MAX_PLAYLIST_SIZE", 100)?,
            search_results: parse_or(value("SEARCH_RESULTS"), "SEARCH_RESULTS", 5)?,
            search_cache_ttl: Duration::from_secs(parse_or(
                value("SEARCH_CACHE_TTL_SECS"),
                "SEARCH_CACHE_TTL_SECS",
                600,
            )?),

            idle_timeout: Duration::from_secs(parse_or(
                value("IDLE_TIMEOUT_SECS"),
                "IDLE_TIMEOUT_SECS",
                300,
            )?),
            idle_check_interval: Duration::from_secs(parse_or(
                value("IDLE_CHECK_INTERVAL_SECS"),
                "IDLE_CHECK_INTERVAL_SECS",
                10,
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Idle timeout and check interval must be positive
    /// - The check interval cannot exceed the idle timeout
    /// - Playlist cap, search results and extractor concurrency must be > 0
    /// - At most 25 search results (one message worth of choices)
    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout.is_zero() {
            anyhow::bail!("Idle timeout must be greater than 0");
        }

        if self.idle_check_interval.is_zero() {
            anyhow::bail!("Idle check interval must be greater than 0");
        }

        if self.idle_check_interval > self.idle_timeout {
            anyhow::bail!(
                "Idle check interval ({}s) cannot exceed the idle timeout ({}s)",
                self.idle_check_interval.as_secs(),
                self.idle_timeout.as_secs()
            );
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("Max playlist size must be greater than 0");
        }

        if self.search_results == 0 || self.search_results > 25 {
            anyhow::bail!(
                "Search results must be between 1 and 25, got: {}",
                self.search_results
            );
        }

        if self.extractor_concurrency == 0 {
            anyhow::bail!("Extractor concurrency must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The Discord token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: commands {}\n  \
            Extractor: {} ({} concurrent)\n  \
            Limits: {} playlist entries, {} search results, search cache {}\n  \
            Idle: timeout {}, checked every {}",
            self.guild_id
                .map_or("global".to_string(), |id| format!("in guild {}", id)),
            self.ytdlp_path,
            self.extractor_concurrency,
            self.max_playlist_size,
            self.search_results,
            humantime::format_duration(self.search_cache_ttl),
            humantime::format_duration(self.idle_timeout),
            humantime::format_duration(self.idle_check_interval),
        )
    }
}

fn parse<T>(raw: &str, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{} has an invalid value: {:?}", key, raw))
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.map_or(Ok(default), |raw| parse(&raw, key))
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            guild_id: None,

            ytdlp_path: "yt-dlp".to_string(),
            extractor_concurrency: 3,
            max_playlist_size: 100,
            search_results: 5,
            search_cache_ttl: Duration::from_secs(600),

            idle_timeout: Duration::from_secs(300),
            idle_check_interval: Duration::from_secs(10),
        }
    }
}
