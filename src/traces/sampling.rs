use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use crate::config::{Callbacks, Config, is_valid_sample_rate};
use crate::traces::transaction::TransactionContext;

/// What a `traces_sampler` gets to look at.
#[derive(Debug, Clone)]
pub struct SamplingContext {
    pub transaction_context: TransactionContext,
    pub parent_sampled: Option<bool>,
    pub parent_sample_rate: Option<f64>,
    /// Arbitrary data passed to `start_transaction_with`.
    pub custom: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingDecision {
    pub sampled: bool,
    /// Rate the decision was made with, after downsampling.
    pub sample_rate: Option<f64>,
}

impl SamplingDecision {
    const NOT_SAMPLED: SamplingDecision = SamplingDecision {
        sampled: false,
        sample_rate: None,
    };
}

/// Decides whether a new transaction is sampled.
///
/// An explicit decision wins, then the parent's decision, then the
/// sampler or the flat rate. Rates are divided by `2^downsample_factor`
/// while the collector is unhealthy.
#[must_use]
pub fn decide(
    config: &Config,
    callbacks: &Callbacks,
    context: &TransactionContext,
    custom: &BTreeMap<String, Value>,
    downsample_factor: u32,
) -> SamplingDecision {
    if !config.tracing_enabled(callbacks) {
        return SamplingDecision::NOT_SAMPLED;
    }

    if let Some(sampled) = context.sampled {
        return SamplingDecision {
            sampled,
            sample_rate: Some(if sampled { 1.0 } else { 0.0 }),
        };
    }

    let parent_sample_rate = context
        .baggage
        .as_ref()
        .and_then(|b| b.get("sample_rate"))
        .and_then(|r| r.parse::<f64>().ok())
        .filter(|r| is_valid_sample_rate(*r));

    if let Some(parent_sampled) = context.parent_sampled {
        return SamplingDecision {
            sampled: parent_sampled,
            sample_rate: parent_sample_rate.or(Some(if parent_sampled { 1.0 } else { 0.0 })),
        };
    }

    let rate = match &callbacks.traces_sampler {
        Some(sampler) => sampler(&SamplingContext {
            transaction_context: context.clone(),
            parent_sampled: context.parent_sampled,
            parent_sample_rate,
            custom: custom.clone(),
        }),
        None => config.traces_sample_rate.unwrap_or(0.0),
    };

    if !is_valid_sample_rate(rate) {
        warn!(
            "TRACES | Discarding transaction {} because of invalid sample rate {rate}",
            context.name
        );
        return SamplingDecision::NOT_SAMPLED;
    }
    if rate <= 0.0 {
        return SamplingDecision {
            sampled: false,
            sample_rate: Some(0.0),
        };
    }

    let rate = rate / f64::from(1u32 << downsample_factor.min(31));
    SamplingDecision {
        sampled: context.sample_rand < rate,
        sample_rate: Some(rate),
    }
}
