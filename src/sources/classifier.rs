//! Clasificación de fallos de extracción.
//!
//! The table is evaluated top to bottom and the first rule with a matching
//! needle wins. More specific categories sit above generic ones: an
//! "age-restricted" message usually also contains "unavailable", and must
//! classify as [`ErrorKind::AgeRestricted`].

use std::fmt;

/// Coarse classification of a raw failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unavailable,
    Private,
    AgeRestricted,
    RegionRestricted,
    Timeout,
    BotDetection,
    RateLimited,
    Unknown,
}

impl ErrorKind {
    /// Human-readable category used in user notifications.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::Unavailable => "Video is unavailable",
            ErrorKind::Private => "Private or restricted video",
            ErrorKind::AgeRestricted => "Age-restricted content",
            ErrorKind::RegionRestricted => "Region-restricted content",
            ErrorKind::Timeout => "Request timed out",
            ErrorKind::BotDetection => "Blocked by bot detection",
            ErrorKind::RateLimited => "Rate limited by the provider",
            ErrorKind::Unknown => "Unknown playback error",
        }
    }

    /// Fallos que no cambian al reintentar con la misma entrada.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ErrorKind::Unavailable
                | ErrorKind::Private
                | ErrorKind::AgeRestricted
                | ErrorKind::RegionRestricted
        )
    }

    /// Fallos provocados por el proveedor frenando nuestras peticiones.
    pub fn is_throttling(&self) -> bool {
        matches!(self, ErrorKind::BotDetection | ErrorKind::RateLimited)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// First-match-wins priority list. Needles are lowercase.
const RULES: &[(ErrorKind, &[&str])] = &[
    (
        ErrorKind::AgeRestricted,
        &[
            "age-restricted",
            "age restricted",
            "confirm your age",
            "inappropriate for some users",
        ],
    ),
    (
        ErrorKind::Private,
        &["private video", "this video is private"],
    ),
    (
        ErrorKind::RegionRestricted,
        &[
            "not available in your country",
            "blocked it in your country",
            "geo restrict",
        ],
    ),
    (
        ErrorKind::BotDetection,
        &[
            "sign in to confirm you're not a bot",
            "confirm you’re not a bot",
            "not a bot",
            "captcha",
            "unusual traffic",
        ],
    ),
    (
        ErrorKind::RateLimited,
        &["429", "too many requests", "rate limit"],
    ),
    (ErrorKind::Timeout, &["timed out", "timeout", "etimedout"]),
    (
        ErrorKind::Unavailable,
        &[
            "video unavailable",
            "unavailable",
            "has been removed",
            "no longer available",
            "404",
        ],
    ),
];

/// Maps raw error text to an [`ErrorKind`]. Total: unmatched text is `Unknown`.
pub fn classify(raw: &str) -> ErrorKind {
    let lower = raw.to_lowercase();
    RULES
        .iter()
        .find(|(_, needles)| needles.iter().any(|needle| lower.contains(needle)))
        .map(|(kind, _)| *kind)
        .unwrap_or(ErrorKind::Unknown)
}
