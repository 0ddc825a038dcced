//! Lifecycle hooks.
//!
//! Three interception points around the pipeline: rewrite the descriptor
//! before execution, rewrite the envelope after a success, and rewrite the
//! error after a terminal failure. Hooks observe outcomes only; they cannot
//! re-enter the pipeline or turn a failure into a success.

use std::sync::Arc;

use crate::envelope::ResponseEnvelope;
use crate::error::Error;
use crate::request::RequestDescriptor;

/// Hook run before the pipeline executes; may rewrite the descriptor.
pub type PreRequestHook =
    Arc<dyn Fn(RequestDescriptor) -> RequestDescriptor + Send + Sync>;

/// Hook run after a successful call; may rewrite the envelope.
pub type PostSuccessHook =
    Arc<dyn Fn(&RequestDescriptor, ResponseEnvelope) -> ResponseEnvelope + Send + Sync>;

/// Hook run after a terminal failure; may rewrite the error.
pub type PostErrorHook = Arc<dyn Fn(&RequestDescriptor, Error) -> Error + Send + Sync>;

/// A set of lifecycle hooks attached to a client or a single request.
#[derive(Clone, Default)]
pub struct Hooks {
    pre_request: Option<PreRequestHook>,
    post_success: Option<PostSuccessHook>,
    post_error: Option<PostErrorHook>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("pre_request", &self.pre_request.is_some())
            .field("post_success", &self.post_success.is_some())
            .field("post_error", &self.post_error.is_some())
            .finish()
    }
}

impl Hooks {
    /// Creates an empty hook set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pre-request hook.
    pub fn with_pre_request<F>(mut self, hook: F) -> Self
    where
        F: Fn(RequestDescriptor) -> RequestDescriptor + Send + Sync + 'static,
    {
        self.pre_request = Some(Arc::new(hook));
        self
    }

    /// Sets the post-success hook.
    pub fn with_post_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RequestDescriptor, ResponseEnvelope) -> ResponseEnvelope + Send + Sync + 'static,
    {
        self.post_success = Some(Arc::new(hook));
        self
    }

    /// Sets the post-error hook.
    pub fn with_post_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RequestDescriptor, Error) -> Error + Send + Sync + 'static,
    {
        self.post_error = Some(Arc::new(hook));
        self
    }

    /// Applies the pre-request hook, if any.
    pub fn apply_pre_request(&self, request: RequestDescriptor) -> RequestDescriptor {
        match &self.pre_request {
            Some(hook) => hook(request),
            None => request,
        }
    }

    /// Applies the post-success hook, if any.
    pub fn apply_post_success(
        &self,
        request: &RequestDescriptor,
        envelope: ResponseEnvelope,
    ) -> ResponseEnvelope {
        match &self.post_success {
            Some(hook) => hook(request, envelope),
            None => envelope,
        }
    }

    /// Applies the post-error hook, if any.
    pub fn apply_post_error(&self, request: &RequestDescriptor, error: Error) -> Error {
        match &self.post_error {
            Some(hook) => hook(request, error),
            None => error,
        }
    }

    /// True when no hook is set.
    pub fn is_empty(&self) -> bool {
        self.pre_request.is_none() && self.post_success.is_none() && self.post_error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_hooks_pass_through() {
        let hooks = Hooks::new();
        assert!(hooks.is_empty());

        let request = RequestDescriptor::get("https://example.com/a");
        let rewritten = hooks.apply_pre_request(request.clone());
        assert_eq!(rewritten.url, request.url);

        let error = hooks.apply_post_error(&request, Error::network("boom"));
        assert!(matches!(error, Error::Network(_)));
    }

    #[test]
    fn test_pre_request_rewrites_descriptor() {
        let hooks = Hooks::new().with_pre_request(|mut request| {
            request.url = format!("{}?traced=1", request.url);
            request
        });

        let request = RequestDescriptor::get("https://example.com/a");
        let rewritten = hooks.apply_pre_request(request);
        assert_eq!(rewritten.url, "https://example.com/a?traced=1");
    }

    #[test]
    fn test_post_error_rewrites_error() {
        let hooks = Hooks::new()
            .with_post_error(|_request, _error| Error::network("replaced"));

        let request = RequestDescriptor::get("https://example.com/a");
        let error = hooks.apply_post_error(&request, Error::timeout_after(std::time::Duration::from_secs(1)));
        match error {
            Error::Network(message) => assert_eq!(message, "replaced"),
            other => panic!("expected Network, got {other:?}"),
        }
    }
}
