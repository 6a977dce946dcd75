//! Per-auth-profile usage and error tracking with cooldown backoff.
//!
//! Every provider call notifies the tracker; it never blocks a run. On
//! error the profile enters a cooldown whose duration grows exponentially
//! with consecutive failures, with a ceiling that depends on the error
//! kind (billing problems back off far longer than timeouts).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use nebo_domain::Error;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Classification of a provider failure for backoff purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Billing,
    RateLimit,
    Auth,
    Timeout,
    Other,
}

impl ErrorKind {
    /// Classify a domain error. Falls back to message sniffing for errors
    /// that arrive as opaque provider strings.
    pub fn classify(err: &Error) -> Self {
        match err {
            Error::Billing(_) => Self::Billing,
            Error::RateLimited(_) => Self::RateLimit,
            Error::Auth(_) => Self::Auth,
            Error::Timeout(_) => Self::Timeout,
            Error::Provider { message, .. } | Error::Http(message) => {
                let lower = message.to_ascii_lowercase();
                if lower.contains("billing") || lower.contains("payment") {
                    Self::Billing
                } else if lower.contains("rate limit") || lower.contains("429") {
                    Self::RateLimit
                } else if lower.contains("unauthorized") || lower.contains("401") {
                    Self::Auth
                } else if lower.contains("timeout") || lower.contains("timed out") {
                    Self::Timeout
                } else {
                    Self::Other
                }
            }
            _ => Self::Other,
        }
    }

    /// Base cooldown for the first failure of this kind.
    fn base(self) -> Duration {
        match self {
            Self::Billing => Duration::from_secs(300),
            Self::RateLimit => Duration::from_secs(15),
            Self::Auth => Duration::from_secs(60),
            Self::Timeout => Duration::from_secs(5),
            Self::Other => Duration::from_secs(10),
        }
    }

    /// Ceiling for the exponential backoff of this kind.
    fn ceiling(self) -> Duration {
        match self {
            Self::Billing => Duration::from_secs(3_600),
            Self::RateLimit => Duration::from_secs(300),
            Self::Auth => Duration::from_secs(1_800),
            Self::Timeout => Duration::from_secs(60),
            Self::Other => Duration::from_secs(120),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Profile tracker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
struct ProfileStats {
    requests: u64,
    errors: u64,
    consecutive_errors: u32,
    last_error_kind: Option<ErrorKind>,
    cooldown_until: Option<Instant>,
}

/// Thread-safe tracker of per-profile health. Purely advisory: callers
/// read [`is_cooling`](Self::is_cooling) to prefer another profile but a
/// run in flight is never interrupted.
pub struct ProfileTracker {
    profiles: Mutex<HashMap<String, ProfileStats>>,
}

impl ProfileTracker {
    pub fn new() -> Self {
        Self {
            profiles: Mutex::new(HashMap::new()),
        }
    }

    /// Record a successful call: clears the consecutive-error streak and
    /// any active cooldown.
    pub fn record_success(&self, profile: &str) {
        let mut profiles = self.profiles.lock();
        let stats = profiles.entry(profile.to_owned()).or_default();
        stats.requests += 1;
        stats.consecutive_errors = 0;
        stats.cooldown_until = None;
    }

    /// Record a failed call and start (or extend) the cooldown.
    /// Returns the kind the error was classified as.
    pub fn record_error(&self, profile: &str, err: &Error) -> ErrorKind {
        let kind = ErrorKind::classify(err);
        let mut profiles = self.profiles.lock();
        let stats = profiles.entry(profile.to_owned()).or_default();
        stats.requests += 1;
        stats.errors += 1;
        stats.consecutive_errors += 1;
        stats.last_error_kind = Some(kind);

        let exp = stats.consecutive_errors.saturating_sub(1).min(10);
        let backoff = kind
            .base()
            .saturating_mul(1u32 << exp)
            .min(kind.ceiling());
        stats.cooldown_until = Some(Instant::now() + backoff);

        tracing::warn!(
            profile,
            kind = ?kind,
            consecutive = stats.consecutive_errors,
            backoff_secs = backoff.as_secs(),
            "profile entering cooldown"
        );
        kind
    }

    /// Whether the profile is inside its cooldown window.
    pub fn is_cooling(&self, profile: &str) -> bool {
        let profiles = self.profiles.lock();
        profiles
            .get(profile)
            .and_then(|s| s.cooldown_until)
            .is_some_and(|until| Instant::now() < until)
    }

    /// Usage counters for observability: `(requests, errors)`.
    pub fn counters(&self, profile: &str) -> (u64, u64) {
        let profiles = self.profiles.lock();
        profiles
            .get(profile)
            .map(|s| (s.requests, s.errors))
            .unwrap_or((0, 0))
    }
}

impl Default for ProfileTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_direct_variants() {
        assert_eq!(
            ErrorKind::classify(&Error::RateLimited("slow down".into())),
            ErrorKind::RateLimit
        );
        assert_eq!(
            ErrorKind::classify(&Error::Timeout("t".into())),
            ErrorKind::Timeout
        );
        assert_eq!(
            ErrorKind::classify(&Error::Billing("no credits".into())),
            ErrorKind::Billing
        );
        assert_eq!(
            ErrorKind::classify(&Error::Auth("bad key".into())),
            ErrorKind::Auth
        );
        assert_eq!(
            ErrorKind::classify(&Error::Other("??".into())),
            ErrorKind::Other
        );
    }

    #[test]
    fn classify_sniffs_provider_messages() {
        let err = Error::Provider {
            provider: "p".into(),
            message: "HTTP 429: rate limit exceeded".into(),
        };
        assert_eq!(ErrorKind::classify(&err), ErrorKind::RateLimit);

        let err = Error::Provider {
            provider: "p".into(),
            message: "billing account suspended".into(),
        };
        assert_eq!(ErrorKind::classify(&err), ErrorKind::Billing);
    }

    #[test]
    fn error_starts_cooldown_success_clears_it() {
        let tracker = ProfileTracker::new();
        assert!(!tracker.is_cooling("default"));

        tracker.record_error("default", &Error::RateLimited("429".into()));
        assert!(tracker.is_cooling("default"));

        tracker.record_success("default");
        assert!(!tracker.is_cooling("default"));
    }

    #[test]
    fn counters_accumulate() {
        let tracker = ProfileTracker::new();
        tracker.record_success("p");
        tracker.record_error("p", &Error::Timeout("t".into()));
        tracker.record_success("p");
        assert_eq!(tracker.counters("p"), (3, 1));
        assert_eq!(tracker.counters("unknown"), (0, 0));
    }

    #[test]
    fn backoff_is_capped_at_kind_ceiling() {
        let tracker = ProfileTracker::new();
        // Many consecutive timeouts: backoff must not exceed the 60s
        // ceiling (the shift alone would be minutes).
        for _ in 0..12 {
            tracker.record_error("p", &Error::Timeout("t".into()));
        }
        let profiles = tracker.profiles.lock();
        let until = profiles.get("p").unwrap().cooldown_until.unwrap();
        assert!(until <= Instant::now() + Duration::from_secs(60));
    }
}
