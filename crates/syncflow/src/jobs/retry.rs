use std::time::Duration;

use rand::Rng;

use crate::error::SyncError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub base_seconds: u64,
    pub max_seconds: u64,
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_seconds: 2,
            max_seconds: 15 * 60,
            jitter_pct: 0.20,
        }
    }
}

/// Exponential backoff for the n-th receive: `base * 2^(n-1)`, capped, with jitter.
pub fn next_delay(receive_count: i32, cfg: &RetryConfig, rng: &mut impl Rng) -> Duration {
    let attempt_no = receive_count.max(1) as u32;
    let exp = attempt_no.saturating_sub(1);

    let pow2 = 1_u64.checked_shl(exp).unwrap_or(u64::MAX);
    let delay = cfg.base_seconds.saturating_mul(pow2).min(cfg.max_seconds);

    let jitter_range = (delay as f64) * cfg.jitter_pct;
    let jitter = if jitter_range > 0.0 {
        rng.gen_range(-jitter_range..=jitter_range)
    } else {
        0.0
    };

    let jittered = (delay as f64 + jitter).round().max(0.0) as u64;
    Duration::from_secs(jittered.min(cfg.max_seconds))
}

/// How long a failed message should stay invisible before the next receive.
/// A source-provided Retry-After wins over computed backoff.
pub fn redelivery_delay(
    err: &SyncError,
    receive_count: i32,
    cfg: &RetryConfig,
    rng: &mut impl Rng,
) -> Duration {
    match err {
        SyncError::RateLimited {
            retry_after: Some(hint),
        } => *hint,
        _ => next_delay(receive_count, cfg, rng),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            base_seconds: 2,
            max_seconds: 60,
            jitter_pct: 0.0,
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let mut rng = StdRng::seed_from_u64(1);
        let cfg = no_jitter();
        let secs: Vec<u64> = (1..=7)
            .map(|n| next_delay(n, &cfg, &mut rng).as_secs())
            .collect();
        assert_eq!(secs, vec![2, 4, 8, 16, 32, 60, 60]);
        assert_eq!(next_delay(500, &cfg, &mut rng).as_secs(), 60);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(9);
        let cfg = RetryConfig {
            base_seconds: 10,
            max_seconds: 1000,
            jitter_pct: 0.2,
        };
        for _ in 0..100 {
            let d = next_delay(1, &cfg, &mut rng).as_secs();
            assert!((8..=12).contains(&d), "{d}");
        }
    }

    #[test]
    fn retry_after_hint_overrides_backoff() {
        let mut rng = StdRng::seed_from_u64(3);
        let hinted = SyncError::RateLimited {
            retry_after: Some(Duration::from_secs(17)),
        };
        assert_eq!(
            redelivery_delay(&hinted, 4, &no_jitter(), &mut rng),
            Duration::from_secs(17)
        );

        let unhinted = SyncError::RateLimited { retry_after: None };
        assert_eq!(
            redelivery_delay(&unhinted, 2, &no_jitter(), &mut rng),
            Duration::from_secs(4)
        );
    }
}
