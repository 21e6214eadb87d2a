//! Cadena de resolución con reintentos.
//!
//! [`MediaResolver`] walks [`Strategy::CHAIN`] in order with a bounded loop.
//! Each strategy gets up to `max_attempts` tries with geometric backoff; a
//! strategy that gives up records a [`StrategyFailure`] and the chain moves
//! on. Nothing is kept between calls.

use rand::Rng;
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use super::{
    BackendFailure, ErrorKind, ExtractionBackend, ResolvedSource, SearchCandidate, SearchProvider,
};
use crate::config::ResolverConfig;

/// Position in the resolver chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Primary,
    AlternativeSearch,
    SecondaryExtractor,
}

impl Strategy {
    pub const CHAIN: [Strategy; 3] = [
        Strategy::Primary,
        Strategy::AlternativeSearch,
        Strategy::SecondaryExtractor,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Primary => "primary extraction",
            Strategy::AlternativeSearch => "alternative search",
            Strategy::SecondaryExtractor => "secondary extractor",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Final cause for one strategy after its retries ran out.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyFailure {
    pub strategy: Strategy,
    pub attempts: u32,
    pub failure: BackendFailure,
}

/// Every strategy in the chain failed for one track.
#[derive(Debug, Clone, thiserror::Error)]
#[error("no se pudo resolver {url}: {}", summarize(.failures))]
pub struct ResolutionError {
    pub url: String,
    pub failures: Vec<StrategyFailure>,
}

impl ResolutionError {
    /// Classification of the first failure in the chain, used for messaging.
    pub fn first_kind(&self) -> ErrorKind {
        self.failures
            .first()
            .map(|f| f.failure.kind)
            .unwrap_or(ErrorKind::Unknown)
    }
}

fn summarize(failures: &[StrategyFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} x{} ({:?}: {})", f.strategy, f.attempts, f.failure.kind, f.failure.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Successful resolution plus how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub source: ResolvedSource,
    pub strategy: Strategy,
    /// First failure recorded in this chain, if the primary path did not win.
    pub first_failure: Option<BackendFailure>,
}

impl Resolution {
    pub fn is_alternative(&self) -> bool {
        self.strategy != Strategy::Primary
    }
}

/// Backoff policy applied between attempts of the same strategy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
    pub throttle_multiplier: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            jitter: config.retry_jitter,
            throttle_multiplier: config.throttle_multiplier.max(2),
        }
    }

    /// Delay before the attempt that follows failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32, kind: ErrorKind) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let mut delay = self.base_delay.saturating_mul(1u32 << exponent);
        if kind.is_throttling() {
            delay = delay.saturating_mul(self.throttle_multiplier);
        }

        // el tope incluye multiplicador y jitter
        (delay + self.sample_jitter()).min(self.max_delay)
    }

    fn sample_jitter(&self) -> Duration {
        let max = self.jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}

/// Picks the first candidate whose URL differs from the original. When every
/// candidate points at the original, the second-best is preferred.
pub fn pick_alternative<'a>(
    candidates: &'a [SearchCandidate],
    original_url: &str,
) -> Option<&'a SearchCandidate> {
    candidates
        .iter()
        .find(|c| c.url != original_url)
        .or_else(|| candidates.get(1))
        .or_else(|| candidates.first())
}

#[derive(Debug, Default)]
struct ChainState {
    failures: Vec<StrategyFailure>,
    bot_detected: bool,
}

pub struct MediaResolver {
    primary: Arc<dyn ExtractionBackend>,
    search: Arc<dyn SearchProvider>,
    secondary: Option<Arc<dyn ExtractionBackend>>,
    policy: RetryPolicy,
    search_candidates: usize,
}

impl MediaResolver {
    pub fn new(
        primary: Arc<dyn ExtractionBackend>,
        search: Arc<dyn SearchProvider>,
        secondary: Option<Arc<dyn ExtractionBackend>>,
        config: &ResolverConfig,
    ) -> Self {
        Self {
            primary,
            search,
            secondary,
            policy: RetryPolicy::from_config(config),
            search_candidates: config.search_candidates.max(1),
        }
    }

    /// Resuelve la cadena completa empezando por la extracción primaria.
    pub async fn resolve(&self, url: &str, title: &str) -> Result<Resolution, ResolutionError> {
        self.run_chain(url, title, ChainState::default()).await
    }

    /// Resolves after the primary path is already known to have failed (for
    /// example, a stream that broke mid-playback). The chain starts at the
    /// alternative search and `failure` is reported as the primary's cause.
    pub async fn resolve_after_failure(
        &self,
        url: &str,
        title: &str,
        failure: BackendFailure,
    ) -> Result<Resolution, ResolutionError> {
        let state = ChainState {
            bot_detected: failure.kind == ErrorKind::BotDetection,
            failures: vec![StrategyFailure {
                strategy: Strategy::Primary,
                attempts: 1,
                failure,
            }],
        };
        self.run_chain(url, title, state).await
    }

    async fn run_chain(
        &self,
        url: &str,
        title: &str,
        mut state: ChainState,
    ) -> Result<Resolution, ResolutionError> {
        let start = state.failures.len();

        for strategy in Strategy::CHAIN.into_iter().skip(start) {
            if !self.is_enabled(strategy, &state) {
                debug!("⏭️ Estrategia {} omitida para {}", strategy, url);
                continue;
            }

            match self.attempt_with_retries(strategy, url, title, &mut state).await {
                Ok(source) => {
                    info!("✅ {} resuelto con {}", title, strategy);
                    return Ok(Resolution {
                        source,
                        strategy,
                        first_failure: state.failures.first().map(|f| f.failure.clone()),
                    });
                }
                Err(failure) => {
                    warn!(
                        "❌ {} agotada tras {} intento(s) para {}: {}",
                        strategy, failure.attempts, url, failure.failure
                    );
                    state.failures.push(failure);
                }
            }
        }

        Err(ResolutionError {
            url: url.to_string(),
            failures: state.failures,
        })
    }

    fn is_enabled(&self, strategy: Strategy, state: &ChainState) -> bool {
        match strategy {
            Strategy::Primary | Strategy::AlternativeSearch => true,
            Strategy::SecondaryExtractor => self.secondary.is_some() && state.bot_detected,
        }
    }

    async fn attempt_with_retries(
        &self,
        strategy: Strategy,
        url: &str,
        title: &str,
        state: &mut ChainState,
    ) -> Result<ResolvedSource, StrategyFailure> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!("🔄 {} intento {}/{} para {}", strategy, attempt, self.policy.max_attempts, url);

            let failure = match self.attempt(strategy, url, title).await {
                Ok(source) => return Ok(source),
                Err(failure) => failure,
            };

            if failure.kind == ErrorKind::BotDetection {
                state.bot_detected = true;
            }

            if failure.kind.is_permanent() || attempt >= self.policy.max_attempts {
                return Err(StrategyFailure {
                    strategy,
                    attempts: attempt,
                    failure,
                });
            }

            let delay = self.policy.delay_for(attempt, failure.kind);
            warn!(
                "⚠️ {} falló ({:?}), reintentando en {:?}",
                strategy, failure.kind, delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(
        &self,
        strategy: Strategy,
        url: &str,
        title: &str,
    ) -> Result<ResolvedSource, BackendFailure> {
        match strategy {
            Strategy::Primary => {
                debug!("🔧 {} → {}", self.primary.name(), url);
                self.primary.extract(url).await
            }
            Strategy::AlternativeSearch => self.attempt_alternative(url, title).await,
            Strategy::SecondaryExtractor => match &self.secondary {
                Some(secondary) => {
                    debug!("🔧 {} → {}", secondary.name(), url);
                    secondary.extract(url).await
                }
                None => Err(BackendFailure::new("secondary extractor disabled")),
            },
        }
    }

    async fn attempt_alternative(
        &self,
        url: &str,
        title: &str,
    ) -> Result<ResolvedSource, BackendFailure> {
        info!("🔍 Buscando alternativa para: {}", title);

        let candidates = self.search.search(title, self.search_candidates).await?;
        let alternative = pick_alternative(&candidates, url)
            .ok_or_else(|| BackendFailure::new("No alternatives found"))?;

        info!(
            "🎯 Alternativa encontrada: {} - {} ({})",
            alternative.title,
            alternative.url,
            alternative.channel.as_deref().unwrap_or("canal desconocido")
        );

        let mut source = self.primary.extract(&alternative.url).await?;
        source.resolved_title = alternative.title.clone();
        Ok(source)
    }
}
