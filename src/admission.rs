use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::AdmissionConfig;
use crate::metrics::Metrics;

// ============================================================================
// Admission Gate - request-rate limiting in front of the engine
// ============================================================================
//
// A single token bucket shared by all callers. Tokens refill greedily:
// fractions of a token accrue continuously rather than in one lump at the
// end of each period. The engine itself never consults the gate.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { remaining: u32 },
    Rejected { retry_after: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

pub trait AdmissionGate: Send + Sync {
    fn try_acquire(&self) -> Admission;
}

pub struct TokenBucket {
    capacity: f64,
    /// Tokens per second
    refill_rate: f64,
    state: Mutex<BucketState>,
    metrics: Option<Arc<Metrics>>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Starts full
    pub fn new(capacity: u32, refill_tokens: u32, refill_period: Duration) -> Self {
        let period = refill_period.as_secs_f64().max(f64::EPSILON);
        Self {
            capacity: capacity.max(1) as f64,
            refill_rate: refill_tokens as f64 / period,
            state: Mutex::new(BucketState {
                tokens: capacity.max(1) as f64,
                last_refill: Instant::now(),
            }),
            metrics: None,
        }
    }

    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self::new(config.capacity, config.refill_tokens, Duration::from_secs(config.refill_secs))
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Take one token as of `now`
    pub fn try_acquire_at(&self, now: Instant) -> Admission {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now.max(state.last_refill);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Admission::Admitted { remaining: state.tokens.floor() as u32 };
        }

        let missing = 1.0 - state.tokens;
        let retry_after = Duration::try_from_secs_f64(missing / self.refill_rate).unwrap_or(Duration::MAX);
        drop(state);

        if let Some(metrics) = &self.metrics {
            metrics.record_admission_rejection();
        }
        tracing::debug!(retry_after_ms = retry_after.as_millis() as u64, "Request rejected by admission gate");
        Admission::Rejected { retry_after }
    }
}

impl AdmissionGate for TokenBucket {
    fn try_acquire(&self) -> Admission {
        self.try_acquire_at(Instant::now())
    }
}
