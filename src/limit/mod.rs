//! Rate measurement and rate control primitives.

mod debounce;
mod deque;
mod frequency;
mod registry;
mod token_bucket;

pub use debounce::Debouncer;
pub use deque::EventDeque;
pub use frequency::{FrequencyAggregator, Retention, Sample};
pub use registry::LimiterRegistry;
pub use token_bucket::{TokenBucket, DEFAULT_POLL_INTERVAL};
