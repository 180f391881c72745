//! Per-call policy and override merging.
//!
//! Every RPC method carries a base [`CallPolicy`] (built once with the
//! client). Callers may pass a per-call override; the two are combined with
//! [`CallPolicy::merge`], where fields present on the override win and absent
//! fields are inherited from the base.

use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{CallError, Expiration, RetryPolicy};

/// Options governing one logical call.
///
/// # Example
///
/// ```
/// use gaxrpc_client::CallPolicy;
/// use std::time::Duration;
///
/// let base = CallPolicy::new().with_timeout(Duration::from_secs(10));
/// let per_call = CallPolicy::new()
///     .with_timeout(Duration::from_secs(5))
///     .header("x-request-id", "abc-123");
///
/// let effective = base.merge(Some(&per_call));
/// assert_eq!(effective.timeout(), Some(Duration::from_secs(5)));
/// ```
#[derive(Clone, Debug, Default)]
pub struct CallPolicy {
    retry: Option<RetryPolicy>,
    /// Explicit per-attempt timeout. Takes precedence over the retry
    /// policy's timeout backoff.
    timeout: Option<Duration>,
    cancellation: Option<CancellationToken>,
    headers: HeaderMap,
}

impl CallPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Bound the call by `deadline`, resolving relative limits at `now`.
    ///
    /// With a retry policy the total expiration becomes the earlier of the
    /// two; without one the single attempt's timeout is capped instead.
    pub fn with_earlier_deadline(mut self, deadline: Instant, now: Instant) -> Self {
        match self.retry.take() {
            Some(retry) => self.retry = Some(retry.with_earlier_deadline(deadline, now)),
            None => {
                let remaining = deadline.saturating_duration_since(now);
                self.timeout = Some(self.timeout.map_or(remaining, |t| t.min(remaining)));
            }
        }
        self
    }

    /// Add a metadata header.
    ///
    /// # Panics
    ///
    /// Panics if the header name or value is invalid.
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        K::Error: std::fmt::Debug,
        V: TryInto<HeaderValue>,
        V::Error: std::fmt::Debug,
    {
        let name = name.try_into().expect("invalid header name");
        let value = value.try_into().expect("invalid header value");
        self.headers.insert(name, value);
        self
    }

    /// Add a metadata header, failing on an invalid name or value.
    pub fn try_header<K, V>(mut self, name: K, value: V) -> Result<Self, CallError>
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
    {
        let name = name
            .try_into()
            .map_err(|_| CallError::invalid_configuration("invalid header name"))?;
        let value = value
            .try_into()
            .map_err(|_| CallError::invalid_configuration("invalid header value"))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn retry(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    /// The cancellation token to observe, or a token that never fires.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone().unwrap_or_default()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Combine this base policy with an optional override.
    ///
    /// Present override fields replace base fields; headers are overlaid
    /// name by name. The result owns all of its fields.
    pub fn merge(&self, overrides: Option<&CallPolicy>) -> CallPolicy {
        let Some(overrides) = overrides else {
            return self.clone();
        };
        let mut headers = self.headers.clone();
        for name in overrides.headers.keys() {
            headers.remove(name);
        }
        for (name, value) in overrides.headers.iter() {
            headers.append(name.clone(), value.clone());
        }
        CallPolicy {
            retry: overrides.retry.clone().or_else(|| self.retry.clone()),
            timeout: overrides.timeout.or(self.timeout),
            cancellation: overrides
                .cancellation
                .clone()
                .or_else(|| self.cancellation.clone()),
            headers,
        }
    }

    /// Reject policies whose explicit per-attempt timeout can never be
    /// reached because the overall expiration is shorter.
    pub fn validate(&self) -> Result<(), CallError> {
        if let (Some(timeout), Some(retry)) = (self.timeout, &self.retry) {
            if let Expiration::Timeout(total) = retry.total_expiration() {
                if timeout > total {
                    return Err(CallError::invalid_configuration(format!(
                        "per-attempt timeout {:?} exceeds total expiration {:?}",
                        timeout, total
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BackoffPolicy;

    fn retry(total: Duration) -> RetryPolicy {
        RetryPolicy::new(
            BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1), 2.0).unwrap(),
            BackoffPolicy::constant(Duration::from_secs(1)).unwrap(),
            Expiration::timeout(total),
        )
    }

    #[test]
    fn test_merge_override_timeout_keeps_base_retry() {
        let base = CallPolicy::new()
            .with_timeout(Duration::from_secs(10))
            .with_retry(retry(Duration::from_secs(30)));
        let overrides = CallPolicy::new().with_timeout(Duration::from_secs(5));

        let merged = base.merge(Some(&overrides));
        assert_eq!(merged.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(
            merged.retry().map(|r| r.total_expiration()),
            Some(Expiration::Timeout(Duration::from_secs(30)))
        );
    }

    #[test]
    fn test_merge_empty_override_is_base() {
        let base = CallPolicy::new()
            .with_timeout(Duration::from_secs(10))
            .header("x-api-key", "k");

        for merged in [base.merge(None), base.merge(Some(&CallPolicy::new()))] {
            assert_eq!(merged.timeout(), base.timeout());
            assert_eq!(merged.headers(), base.headers());
            assert!(merged.retry().is_none());
            assert!(merged.cancellation().is_none());
        }
    }

    #[test]
    fn test_merge_does_not_alias_override() {
        let base = CallPolicy::new().with_timeout(Duration::from_secs(10));
        let mut overrides = CallPolicy::new()
            .with_timeout(Duration::from_secs(5))
            .header("x-request-id", "first");

        let merged = base.merge(Some(&overrides));

        overrides
            .headers_mut()
            .insert("x-request-id", HeaderValue::from_static("second"));
        overrides = overrides.with_timeout(Duration::from_secs(1));

        assert_eq!(overrides.timeout(), Some(Duration::from_secs(1)));
        assert_eq!(merged.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(merged.headers().get("x-request-id").unwrap(), "first");
    }

    #[test]
    fn test_merge_headers_override_per_name() {
        let base = CallPolicy::new()
            .header("authorization", "Bearer base")
            .header("x-team", "core");
        let overrides = CallPolicy::new().header("authorization", "Bearer call");

        let merged = base.merge(Some(&overrides));
        assert_eq!(merged.headers().get("authorization").unwrap(), "Bearer call");
        assert_eq!(merged.headers().get("x-team").unwrap(), "core");
        assert_eq!(merged.headers().get_all("authorization").iter().count(), 1);
    }

    #[test]
    fn test_merge_cancellation() {
        let base_token = CancellationToken::new();
        let call_token = CancellationToken::new();
        let base = CallPolicy::new().with_cancellation(base_token.clone());

        let inherited = base.merge(Some(&CallPolicy::new()));
        base_token.cancel();
        assert!(inherited.cancellation_token().is_cancelled());

        let overridden =
            base.merge(Some(&CallPolicy::new().with_cancellation(call_token.clone())));
        assert!(!overridden.cancellation_token().is_cancelled());
    }

    #[test]
    fn test_default_cancellation_never_fires() {
        assert!(!CallPolicy::new().cancellation_token().is_cancelled());
    }

    #[test]
    fn test_validate_rejects_unreachable_timeout() {
        let policy = CallPolicy::new()
            .with_retry(retry(Duration::from_secs(2)))
            .with_timeout(Duration::from_secs(3));
        assert!(matches!(
            policy.validate(),
            Err(CallError::InvalidConfiguration(_))
        ));

        let ok = CallPolicy::new()
            .with_retry(retry(Duration::from_secs(5)))
            .with_timeout(Duration::from_secs(3));
        assert!(ok.validate().is_ok());

        // No retry policy means there is no total expiration to conflict with.
        assert!(CallPolicy::new().with_timeout(Duration::from_secs(3)).validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_deadline_caps_retry_or_timeout() {
        let now = Instant::now();
        let deadline = now + Duration::from_secs(4);

        let with_retry = CallPolicy::new()
            .with_retry(retry(Duration::from_secs(30)))
            .with_earlier_deadline(deadline, now);
        assert_eq!(
            with_retry.retry().map(|r| r.total_expiration()),
            Some(Expiration::Deadline(deadline))
        );
        assert!(with_retry.timeout().is_none());

        let single = CallPolicy::new()
            .with_timeout(Duration::from_secs(10))
            .with_earlier_deadline(deadline, now);
        assert_eq!(single.timeout(), Some(Duration::from_secs(4)));
        assert!(single.retry().is_none());
    }

    #[test]
    fn test_try_header_invalid() {
        assert!(CallPolicy::new().try_header("bad\0name", "v").is_err());
        assert!(CallPolicy::new().try_header("x-ok", "v").is_ok());
    }
}
