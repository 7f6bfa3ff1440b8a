/// Pending metrics that trigger an immediate flush.
pub const MAX_ITEMS: usize = 1_000;

/// Pending metrics past which new ones are dropped.
pub const MAX_ITEMS_BEFORE_DROP: usize = 10_000;
