pub mod classifier;
pub mod resolver;
pub mod ytdlp;

use async_trait::async_trait;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

pub use classifier::{classify, ErrorKind};
pub use resolver::{MediaResolver, Resolution, ResolutionError, RetryPolicy, Strategy};
pub use ytdlp::{Playlist, VideoMetadata, YtDlpClient, YtDlpFallback};

/// Fuente reproducible producida por el resolver
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSource {
    /// Direct media URL the voice layer opens as an HTTP input.
    pub stream_url: String,
    pub mime_type: String,
    pub resolved_title: String,
    pub duration: Option<Duration>,
}

/// Resultado de búsqueda, ordenado por relevancia
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCandidate {
    pub title: String,
    pub url: String,
    pub duration: Option<Duration>,
    pub channel: Option<String>,
}

/// A single failed backend attempt, already classified.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct BackendFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl BackendFailure {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: classify(&message),
            message,
        }
    }
}

/// Estrategia de extracción: URL de video → stream reproducible
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    async fn extract(&self, url: &str) -> Result<ResolvedSource, BackendFailure>;

    fn name(&self) -> &'static str;
}

/// Proveedor de búsqueda usado para encontrar alternativas
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize)
        -> Result<Vec<SearchCandidate>, BackendFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_failure_is_classified_on_creation() {
        let failure = BackendFailure::new("ERROR: [youtube] abc: Private video");
        assert_eq!(failure.kind, ErrorKind::Private);
        assert_eq!(failure.to_string(), "ERROR: [youtube] abc: Private video");
    }
}
