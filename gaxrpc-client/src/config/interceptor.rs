//! Request transforms run before dispatch.
//!
//! A [`RequestTransform`] sees each outgoing request (and, for unary calls,
//! the effective [`CallPolicy`]) just before it is sent. Transforms run in
//! the order they were added and may rewrite the request or the policy, for
//! example to fill in defaults or attach routing headers.
//!
//! # Example
//!
//! ```
//! use gaxrpc_client::{CallPolicy, RequestTransform, TransformChain};
//!
//! #[derive(Clone, Default)]
//! struct ListRequest {
//!     page_size: u32,
//! }
//!
//! let mut chain = TransformChain::new();
//! chain.push(|req: &mut ListRequest, _policy: &mut CallPolicy| {
//!     if req.page_size == 0 {
//!         req.page_size = 50;
//!     }
//! });
//!
//! let mut request = ListRequest::default();
//! let mut policy = CallPolicy::new();
//! chain.apply(&mut request, &mut policy);
//! assert_eq!(request.page_size, 50);
//! ```

use std::sync::Arc;

use http::{HeaderName, HeaderValue};

use crate::{CallError, CallPolicy};

/// A callback invoked on each request before it is dispatched.
pub trait RequestTransform<Req>: Send + Sync {
    /// Rewrite a unary request and its effective policy.
    fn transform(&self, request: &mut Req, policy: &mut CallPolicy);

    /// Rewrite a message about to be written to a duplex stream.
    ///
    /// Streamed messages have no per-message policy; the default passes the
    /// message through [`transform`](Self::transform) with a scratch policy.
    fn transform_message(&self, request: &mut Req) {
        let mut scratch = CallPolicy::new();
        self.transform(request, &mut scratch);
    }

    /// Rewrite the effective policy of a call that has no request of its
    /// own, such as opening a duplex stream. Does nothing by default.
    fn transform_policy(&self, _policy: &mut CallPolicy) {}
}

/// The unit type is the no-op transform.
impl<Req> RequestTransform<Req> for () {
    #[inline]
    fn transform(&self, _request: &mut Req, _policy: &mut CallPolicy) {}

    #[inline]
    fn transform_message(&self, _request: &mut Req) {}
}

impl<Req, F> RequestTransform<Req> for F
where
    F: Fn(&mut Req, &mut CallPolicy) + Send + Sync,
{
    fn transform(&self, request: &mut Req, policy: &mut CallPolicy) {
        self(request, policy)
    }
}

/// A compile-time pair of transforms: `A` runs first, then `B`.
#[derive(Clone, Debug)]
pub struct Chain<A, B>(pub A, pub B);

impl<Req, A, B> RequestTransform<Req> for Chain<A, B>
where
    A: RequestTransform<Req>,
    B: RequestTransform<Req>,
{
    #[inline]
    fn transform(&self, request: &mut Req, policy: &mut CallPolicy) {
        self.0.transform(request, policy);
        self.1.transform(request, policy);
    }

    #[inline]
    fn transform_message(&self, request: &mut Req) {
        self.0.transform_message(request);
        self.1.transform_message(request);
    }

    #[inline]
    fn transform_policy(&self, policy: &mut CallPolicy) {
        self.0.transform_policy(policy);
        self.1.transform_policy(policy);
    }
}

/// A transform that only rewrites the effective policy.
///
/// Applies to unary calls and to opening duplex streams; streamed messages
/// pass through untouched.
///
/// ```
/// use gaxrpc_client::{CallPolicy, PolicyTransform, TransformChain};
/// use std::time::Duration;
///
/// let mut chain: TransformChain<String> = TransformChain::new();
/// chain.push(PolicyTransform(|policy: &mut CallPolicy| {
///     *policy = policy.clone().with_timeout(Duration::from_secs(5));
/// }));
///
/// let mut policy = CallPolicy::new();
/// chain.apply_policy(&mut policy);
/// assert_eq!(policy.timeout(), Some(Duration::from_secs(5)));
/// ```
#[derive(Clone, Debug)]
pub struct PolicyTransform<F>(pub F);

impl<Req, F> RequestTransform<Req> for PolicyTransform<F>
where
    F: Fn(&mut CallPolicy) + Send + Sync,
{
    fn transform(&self, _request: &mut Req, policy: &mut CallPolicy) {
        (self.0)(policy)
    }

    fn transform_message(&self, _request: &mut Req) {}

    fn transform_policy(&self, policy: &mut CallPolicy) {
        (self.0)(policy)
    }
}

/// Adds a fixed metadata header to every unary call's policy.
#[derive(Clone, Debug)]
pub struct HeaderTransform {
    name: HeaderName,
    value: HeaderValue,
}

impl HeaderTransform {
    pub fn try_new(name: &str, value: &str) -> Result<Self, CallError> {
        let name = name
            .parse()
            .map_err(|_| CallError::invalid_configuration(format!("invalid header name: {}", name)))?;
        let value = value.parse().map_err(|_| {
            CallError::invalid_configuration(format!("invalid header value: {}", value))
        })?;
        Ok(Self { name, value })
    }

    pub fn from_parts(name: HeaderName, value: HeaderValue) -> Self {
        Self { name, value }
    }
}

impl<Req> RequestTransform<Req> for HeaderTransform {
    fn transform(&self, _request: &mut Req, policy: &mut CallPolicy) {
        policy
            .headers_mut()
            .insert(self.name.clone(), self.value.clone());
    }

    fn transform_message(&self, _request: &mut Req) {}

    fn transform_policy(&self, policy: &mut CallPolicy) {
        policy
            .headers_mut()
            .insert(self.name.clone(), self.value.clone());
    }
}

/// An ordered, dynamically built list of transforms.
pub struct TransformChain<Req> {
    transforms: Vec<Arc<dyn RequestTransform<Req>>>,
}

impl<Req> Clone for TransformChain<Req> {
    fn clone(&self) -> Self {
        Self {
            transforms: self.transforms.clone(),
        }
    }
}

impl<Req> std::fmt::Debug for TransformChain<Req> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformChain")
            .field("count", &self.transforms.len())
            .finish()
    }
}

impl<Req> Default for TransformChain<Req> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req> TransformChain<Req> {
    pub fn new() -> Self {
        Self {
            transforms: Vec::new(),
        }
    }

    /// Append a transform; it runs after every transform already present.
    pub fn push<T>(&mut self, transform: T)
    where
        T: RequestTransform<Req> + 'static,
    {
        self.transforms.push(Arc::new(transform));
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    /// Run every transform on a unary request, in order.
    pub fn apply(&self, request: &mut Req, policy: &mut CallPolicy) {
        for transform in &self.transforms {
            transform.transform(request, policy);
        }
    }

    /// Run every transform on a streamed message, in order.
    pub fn apply_message(&self, request: &mut Req) {
        for transform in &self.transforms {
            transform.transform_message(request);
        }
    }

    /// Run every transform's policy hook, in order.
    pub fn apply_policy(&self, policy: &mut CallPolicy) {
        for transform in &self.transforms {
            transform.transform_policy(policy);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, Default, PartialEq)]
    struct Req {
        steps: Vec<&'static str>,
    }

    #[test]
    fn test_chain_runs_in_insertion_order() {
        let mut chain = TransformChain::new();
        chain.push(|r: &mut Req, _: &mut CallPolicy| r.steps.push("first"));
        chain.push(|r: &mut Req, _: &mut CallPolicy| r.steps.push("second"));
        chain.push(());

        let mut req = Req::default();
        chain.apply(&mut req, &mut CallPolicy::new());
        assert_eq!(req.steps, vec!["first", "second"]);
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn test_transform_can_adjust_policy() {
        let mut chain = TransformChain::<Req>::new();
        chain.push(|_: &mut Req, p: &mut CallPolicy| {
            *p = p.clone().with_timeout(Duration::from_secs(2));
        });

        let mut policy = CallPolicy::new();
        chain.apply(&mut Req::default(), &mut policy);
        assert_eq!(policy.timeout(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_static_chain_and_messages() {
        let chain = Chain(
            |r: &mut Req, _: &mut CallPolicy| r.steps.push("a"),
            |r: &mut Req, _: &mut CallPolicy| r.steps.push("b"),
        );
        let mut req = Req::default();
        chain.transform_message(&mut req);
        assert_eq!(req.steps, vec!["a", "b"]);
    }

    #[test]
    fn test_header_transform() {
        let transform = HeaderTransform::try_new("x-goog-request-params", "name=ops/1").unwrap();
        let mut policy = CallPolicy::new();
        RequestTransform::<Req>::transform(&transform, &mut Req::default(), &mut policy);
        assert_eq!(
            policy.headers().get("x-goog-request-params").unwrap(),
            "name=ops/1"
        );
        assert!(HeaderTransform::try_new("bad name", "v").is_err());
    }

    #[test]
    fn test_policy_hook_skips_request_only_transforms() {
        let mut chain = TransformChain::<Req>::new();
        chain.push(|r: &mut Req, p: &mut CallPolicy| {
            r.steps.push("request");
            *p = p.clone().with_timeout(Duration::from_secs(99));
        });
        chain.push(HeaderTransform::try_new("x-team", "core").unwrap());
        chain.push(PolicyTransform(|p: &mut CallPolicy| {
            *p = p.clone().with_timeout(Duration::from_secs(3));
        }));

        let mut policy = CallPolicy::new();
        chain.apply_policy(&mut policy);
        assert_eq!(policy.timeout(), Some(Duration::from_secs(3)));
        assert_eq!(policy.headers().get("x-team").unwrap(), "core");

        let mut req = Req::default();
        chain.apply_message(&mut req);
        assert_eq!(req.steps, vec!["request"]);
    }
}
