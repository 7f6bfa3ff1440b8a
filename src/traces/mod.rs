pub mod instrumentation;
pub mod propagation;
pub mod sample_rand;
pub mod sampling;
pub mod span;
pub mod transaction;

pub use instrumentation::OutgoingRequest;
pub use propagation::PropagationContext;
pub use sampling::{SamplingContext, SamplingDecision};
pub use span::{Span, TransactionOrSpan};
pub use transaction::{Transaction, TransactionContext};
