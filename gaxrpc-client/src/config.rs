//! Configuration for calls made through the runtime.
//!
//! - [`BackoffPolicy`]: Deterministic exponential delay sequence
//! - [`RetryPolicy`]: Retry spacing, timeout growth, expiration and predicate
//! - [`CallPolicy`]: Per-call options and override merging
//! - [`RequestTransform`]: Request rewriting before dispatch
//! - [`StreamingSettings`] / [`PollSettings`]: Duplex buffering and LRO polling

mod backoff;
mod interceptor;
mod policy;
mod retry;
mod settings;

pub use backoff::BackoffPolicy;
pub use interceptor::{
    Chain, HeaderTransform, PolicyTransform, RequestTransform, TransformChain,
};
pub use policy::CallPolicy;
pub use retry::{Expiration, RetryPolicy, RetryPredicate};
pub use settings::{
    PollSettings, StreamingSettings, default_retry_backoff, default_timeout_backoff, defaults,
};
