use serde_json::Value;
use subtle::ConstantTimeEq;
use tracing::debug;

use super::{Middleware, MiddlewareResult};
use crate::context::RequestContext;
use crate::error::HttpError;

/// Guard that fails with 401 unless an authentication middleware attached a user.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireUser;

impl Middleware for RequireUser {
    fn name(&self) -> &str {
        "RequireUser"
    }

    fn before(&self, ctx: &RequestContext) -> MiddlewareResult {
        if ctx.request.lock().user.is_some() {
            Ok(None)
        } else {
            Err(HttpError::unauthorized())
        }
    }
}

/// Attaches `user` to requests carrying `Authorization: Bearer <token>`.
///
/// Requests without a matching token continue anonymously; rejecting them is the guard's job.
#[derive(Debug, Clone)]
pub struct TokenAuth {
    token: String,
    user: Value,
}

impl TokenAuth {
    pub fn new(token: impl Into<String>, user: Value) -> Self {
        Self {
            token: token.into(),
            user,
        }
    }

    /// `true` for `Bearer <token>` (scheme case-insensitive) carrying the configured token.
    fn matches(&self, header: &str) -> bool {
        let Some((scheme, presented)) = header.trim().split_once(' ') else {
            return false;
        };
        if !scheme.eq_ignore_ascii_case("bearer") {
            return false;
        }
        bool::from(presented.trim().as_bytes().ct_eq(self.token.as_bytes()))
    }
}

impl Middleware for TokenAuth {
    fn name(&self) -> &str {
        "TokenAuth"
    }

    fn before(&self, ctx: &RequestContext) -> MiddlewareResult {
        let mut request = ctx.request.lock();
        let matched = request.header("authorization").map(|h| self.matches(h));
        match matched {
            Some(true) => request.user = Some(self.user.clone()),
            Some(false) => debug!(request_id = %request.request_id, "Bearer token rejected"),
            None => {}
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HttpRequest;
    use http::Method;
    use serde_json::json;

    #[test]
    fn test_require_user_rejects_anonymous() {
        let ctx = RequestContext::new(HttpRequest::new(Method::GET, "/"));
        assert_eq!(RequireUser.before(&ctx).unwrap_err().status, 401);
    }

    #[test]
    fn test_token_auth_then_guard() {
        let auth = TokenAuth::new("secret", json!({ "id": 1 }));
        let ctx = RequestContext::new(
            HttpRequest::new(Method::GET, "/").with_header("Authorization", "Bearer secret"),
        );
        auth.before(&ctx).unwrap();
        assert_eq!(ctx.request.user(), Some(json!({ "id": 1 })));
        assert!(RequireUser.before(&ctx).unwrap().is_none());
    }

    #[test]
    fn test_token_needs_bearer_scheme() {
        let auth = TokenAuth::new("secret", json!({ "id": 1 }));
        assert!(auth.matches("Bearer secret"));
        assert!(auth.matches("bearer  secret "));
        assert!(!auth.matches("secret"));
        assert!(!auth.matches("Basic secret"));
        assert!(!auth.matches("Bearer secre"));
        assert!(!auth.matches("Bearer "));
    }

    #[test]
    fn test_wrong_token_stays_anonymous() {
        let auth = TokenAuth::new("secret", json!({ "id": 1 }));
        let ctx = RequestContext::new(
            HttpRequest::new(Method::GET, "/").with_header("Authorization", "Bearer nope"),
        );
        auth.before(&ctx).unwrap();
        assert!(ctx.request.user().is_none());
    }
}
