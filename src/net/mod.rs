//! HTTP transport with bounded retries, backoff and per-attempt timeouts.

mod retry;

pub use retry::{FetchClient, FetchError, RawResponse, RetryPolicy};
