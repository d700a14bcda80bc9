pub mod constants;
pub mod error;
pub mod retry;
pub mod types;

pub use constants::*;
pub use error::WindwardError;
pub use retry::{retry_async, AttemptTimeout, Retryable, RetryPolicy};
pub use types::*;
