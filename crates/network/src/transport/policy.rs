//! An utility trait for retrying requests based on the error type. See [TransportError].
use crate::error::TransportError;
use std::time::Duration;
use wallet_rpc::RpcError;

/// [RetryPolicy] defines which [TransportError]s the HTTP transport should retry and try to
/// recover from.
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    /// Whether to retry the request based on the given `error`
    fn should_retry(&self, error: &TransportError) -> bool;

    /// Providers may include the `backoff` in the error response directly
    fn backoff_hint(&self, error: &TransportError) -> Option<Duration>;
}

/// Implements [RetryPolicy] that will retry requests that errored with
/// status code 429 i.e. TOO_MANY_REQUESTS, or an unavailable gateway.
///
/// Infura often fails with a `"header not found"` rpc error which is apparently linked to load
/// balancing, which are retried as well.
#[derive(Clone, Debug, Default)]
pub struct RateLimitRetryPolicy;

impl RetryPolicy for RateLimitRetryPolicy {
    fn should_retry(&self, error: &TransportError) -> bool {
        match error {
            TransportError::Connection(_) | TransportError::Timeout => true,
            TransportError::Status { status, .. } => matches!(status, 429 | 503 | 504),
            TransportError::InvalidResponse(_) | TransportError::RegionBlocked => false,
            TransportError::Rpc(err) => should_retry_json_rpc_error(err),
        }
    }

    fn backoff_hint(&self, error: &TransportError) -> Option<Duration> {
        if let TransportError::Rpc(err) = error
            && let Some(data) = &err.data
        {
            // if daily rate limit exceeded, infura returns the requested backoff in the error
            // response
            let backoff_seconds = &data["rate"]["backoff_seconds"];
            if let Some(seconds) = backoff_seconds.as_u64() {
                return Some(Duration::from_secs(seconds));
            }
            if let Some(seconds) = backoff_seconds.as_f64() {
                return Some(Duration::from_secs(seconds as u64 + 1));
            }
        }
        None
    }
}

/// Analyzes the [RpcError] and decides if the request should be retried based on the
/// error code or the message.
fn should_retry_json_rpc_error(error: &RpcError) -> bool {
    let code = error.code.code();
    // alchemy throws it this way
    if code == 429 {
        return true;
    }

    // This is an infura error code for `exceeded project rate limit`
    if code == -32005 {
        return true;
    }

    // alternative alchemy error for specific IPs
    if code == -32016 && error.message.contains("rate limit") {
        return true;
    }

    match error.message.as_ref() {
        // this is commonly thrown by infura and is apparently a load balancer issue, see also <https://github.com/MetaMask/metamask-extension/issues/7234>
        "header not found" => true,
        // also thrown by infura if out of budget for the day and ratelimited
        "daily request count exceeded, request rate limited" => true,
        _ => false,
    }
}
