use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Cola
    pub max_queue_size: usize,
    pub queue_display_limit: usize,
    pub idle_grace: Duration,

    // Resolución
    pub resolver: ResolverConfig,
}

/// Knobs for the resolver chain and its retry policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retry_jitter: Duration,
    pub throttle_multiplier: u32,
    pub search_candidates: usize,
    pub enable_secondary_extractor: bool,
    pub secondary_delay_min: Duration,
    pub secondary_delay_max: Duration,
    pub age_gate_bypass: bool,
    pub cookies_file: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            max_queue_size: env_or("MAX_QUEUE_SIZE", 1000)?,
            queue_display_limit: env_or("QUEUE_DISPLAY_LIMIT", 10)?,
            idle_grace: Duration::from_secs(env_or("IDLE_TIMEOUT_SECS", 300)?),

            resolver: ResolverConfig::from_env()?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// - Queue limits must be greater than zero
    /// - The idle grace period must be at least one second
    /// - Resolver settings must pass [`ResolverConfig::validate`]
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.queue_display_limit == 0 {
            anyhow::bail!("Queue display limit must be greater than 0");
        }

        if self.idle_grace < Duration::from_secs(1) {
            anyhow::bail!("Idle timeout must be at least 1 second");
        }

        self.resolver.validate()
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the Discord token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Queue: {} max, {} shown, idle after {}\n  \
            Resolver: {} attempts, base {}, cap {}, jitter {}, x{} when throttled\n  \
            Features: secondary extractor={}, age-gate bypass={}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.max_queue_size,
            self.queue_display_limit,
            humantime::format_duration(self.idle_grace),
            self.resolver.max_retries,
            humantime::format_duration(self.resolver.base_delay),
            humantime::format_duration(self.resolver.max_delay),
            humantime::format_duration(self.resolver.retry_jitter),
            self.resolver.throttle_multiplier,
            self.resolver.enable_secondary_extractor,
            self.resolver.age_gate_bypass,
        )
    }
}

impl ResolverConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            max_retries: env_or("MAX_RETRIES", 3)?,
            base_delay: Duration::from_millis(env_or("RETRY_BASE_DELAY_MS", 1000)?),
            max_delay: Duration::from_millis(env_or("RETRY_MAX_DELAY_MS", 30_000)?),
            retry_jitter: Duration::from_millis(env_or("RETRY_JITTER_MS", 500)?),
            throttle_multiplier: env_or("THROTTLE_MULTIPLIER", 2)?,
            search_candidates: env_or("SEARCH_CANDIDATES", 5)?,
            enable_secondary_extractor: env_or("ENABLE_SECONDARY_EXTRACTOR", false)?,
            secondary_delay_min: Duration::from_millis(env_or("RANDOM_DELAY_MIN", 5000)?),
            secondary_delay_max: Duration::from_millis(env_or("RANDOM_DELAY_MAX", 15_000)?),
            age_gate_bypass: env_or("AGE_GATE_BYPASS", false)?,
            cookies_file: std::env::var("YTDLP_COOKIES")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.max_retries) {
            anyhow::bail!("MAX_RETRIES must be between 1 and 10, got: {}", self.max_retries);
        }

        if self.throttle_multiplier < 2 {
            anyhow::bail!(
                "Throttle multiplier must be at least 2, got: {}",
                self.throttle_multiplier
            );
        }

        if self.max_delay < self.base_delay {
            anyhow::bail!("Retry max delay cannot be lower than the base delay");
        }

        if self.secondary_delay_min > self.secondary_delay_max {
            anyhow::bail!(
                "RANDOM_DELAY_MIN ({}ms) cannot exceed RANDOM_DELAY_MAX ({}ms)",
                self.secondary_delay_min.as_millis(),
                self.secondary_delay_max.as_millis()
            );
        }

        if self.search_candidates == 0 {
            anyhow::bail!("Search candidates must be greater than 0");
        }

        Ok(())
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            max_queue_size: 1000,
            queue_display_limit: 10,
            idle_grace: Duration::from_secs(5 * 60),

            resolver: ResolverConfig::default(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            retry_jitter: Duration::from_millis(500),
            throttle_multiplier: 2,
            search_candidates: 5,
            enable_secondary_extractor: false,
            secondary_delay_min: Duration::from_millis(5000),
            secondary_delay_max: Duration::from_millis(15_000),
            age_gate_bypass: false,
            cookies_file: None,
        }
    }
}

/// Lee una variable de entorno; vacía o ausente usa el valor por defecto.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => val
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", key, e)),
        _ => Ok(default),
    }
}
