//! The random number a trace is sampled against. It travels in the
//! `sentry-sample_rand` baggage member so that every service of a trace
//! compares its rate to the same value.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::protocol::TraceId;

const PRECISION: f64 = 1_000_000.0;
const MAX_SAMPLE_RAND: f64 = 0.999_999;

#[must_use]
pub fn is_valid(sample_rand: f64) -> bool {
    sample_rand.is_finite() && (0.0..1.0).contains(&sample_rand)
}

/// Parses a baggage value, rejecting anything outside `[0, 1)`.
#[must_use]
pub fn parse(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| is_valid(*v))
}

/// Six decimals, rounded down.
#[must_use]
pub fn format(sample_rand: f64) -> String {
    let value = if sample_rand.is_finite() {
        floor(sample_rand)
    } else {
        0.0
    };
    format!("{value:.6}")
}

fn floor(value: f64) -> f64 {
    ((value * PRECISION).floor() / PRECISION).clamp(0.0, MAX_SAMPLE_RAND)
}

/// Same trace id, same value. Seeded from the low 64 bits of the id.
#[must_use]
pub fn generate_from_trace_id(trace_id: TraceId) -> f64 {
    let bytes = trace_id.as_bytes();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&bytes[8..]);
    let mut rng = StdRng::seed_from_u64(u64::from_be_bytes(seed));
    floor(rng.gen_range(0.0..1.0))
}

/// Derives a value consistent with an upstream decision: sampled traces get
/// a value below `sample_rate`, unsampled ones a value at or above it.
#[must_use]
pub fn generate_from_sampling_decision(
    parent_sampled: Option<bool>,
    sample_rate: Option<f64>,
    trace_id: TraceId,
) -> f64 {
    let random = generate_from_trace_id(trace_id);
    let (Some(sampled), Some(rate)) = (parent_sampled, sample_rate) else {
        return random;
    };
    if !(rate > 0.0 && rate <= 1.0) {
        return random;
    }

    if sampled {
        floor(random * rate)
    } else if (rate - 1.0).abs() < f64::EPSILON {
        random
    } else {
        floor(rate + random * (1.0 - rate))
    }
}
