/// Pending logs that trigger an immediate flush.
pub const MAX_ITEMS: usize = 100;

/// Pending logs past which new ones are dropped.
pub const MAX_ITEMS_BEFORE_DROP: usize = 1_000;

pub const TEMPLATE_ATTRIBUTE: &str = "sentry.message.template";
pub const PARAMETER_ATTRIBUTE_PREFIX: &str = "sentry.message.parameter.";
pub const PARENT_SPAN_ATTRIBUTE: &str = "sentry.trace.parent_span_id";
