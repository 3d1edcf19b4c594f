use crate::application::session::LOGIN_PATH;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

const PROTECTED_PREFIX: &str = "/tasks";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    Redirect(String),
}

/// Decides whether a page may be shown for the given `session` cookie.
pub struct RouteGuard {
    decoding_key: Option<DecodingKey>,
    validation: Validation,
}

impl RouteGuard {
    pub fn new(secret: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.leeway = 0;
        Self {
            decoding_key: secret.map(|secret| DecodingKey::from_secret(secret.as_bytes())),
            validation,
        }
    }

    pub fn is_protected(path: &str) -> bool {
        path == PROTECTED_PREFIX
            || path
                .strip_prefix(PROTECTED_PREFIX)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    pub fn check(&self, path: &str, session_cookie: Option<&str>) -> RouteDecision {
        if !Self::is_protected(path) {
            return RouteDecision::Allow;
        }
        let Some(cookie) = session_cookie.map(str::trim).filter(|value| !value.is_empty()) else {
            tracing::debug!(%path, "no session cookie");
            return RouteDecision::Redirect(login_redirect(path));
        };
        if self.verify(cookie) {
            RouteDecision::Allow
        } else {
            RouteDecision::Redirect(login_redirect(path))
        }
    }

    /// Only the signature and, when present, the expiry are checked.
    fn verify(&self, token: &str) -> bool {
        let Some(key) = self.decoding_key.as_ref() else {
            return true;
        };
        match decode::<serde_json::Map<String, serde_json::Value>>(token, key, &self.validation) {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!(%error, "session cookie rejected");
                false
            }
        }
    }
}

fn login_redirect(path: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("next", path)
        .finish();
    format!("{LOGIN_PATH}?{query}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    const SECRET: &str = "a-test-secret-that-is-long-enough";

    #[derive(Serialize)]
    struct Claims {
        sub: String,
        exp: i64,
    }

    fn token(secret: &str, expires_in: i64) -> String {
        let claims = Claims {
            sub: "1".to_string(),
            exp: chrono::Utc::now().timestamp() + expires_in,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).expect("encode")
    }

    #[test]
    fn unprotected_paths_are_always_allowed() {
        let guard = RouteGuard::new(Some(SECRET));
        assert_eq!(guard.check("/", None), RouteDecision::Allow);
        assert_eq!(guard.check("/login", None), RouteDecision::Allow);
        assert_eq!(guard.check("/tasksfoo", None), RouteDecision::Allow);
    }

    #[test]
    fn missing_cookie_redirects_with_next() {
        let guard = RouteGuard::new(Some(SECRET));
        assert_eq!(
            guard.check("/tasks/done", None),
            RouteDecision::Redirect("/login?next=%2Ftasks%2Fdone".to_string())
        );
        assert_eq!(
            guard.check("/tasks", Some("  ")),
            RouteDecision::Redirect("/login?next=%2Ftasks".to_string())
        );
    }

    #[test]
    fn signed_cookie_is_accepted() {
        let guard = RouteGuard::new(Some(SECRET));
        assert_eq!(guard.check("/tasks", Some(&token(SECRET, 600))), RouteDecision::Allow);
    }

    #[test]
    fn forged_or_expired_cookie_redirects() {
        let guard = RouteGuard::new(Some(SECRET));
        let forged = token("someone-elses-secret-value-123456", 600);
        assert!(matches!(guard.check("/tasks", Some(&forged)), RouteDecision::Redirect(_)));
        let expired = token(SECRET, -600);
        assert!(matches!(guard.check("/tasks/1", Some(&expired)), RouteDecision::Redirect(_)));
        assert!(matches!(guard.check("/tasks", Some("not-a-jwt")), RouteDecision::Redirect(_)));
    }

    #[test]
    fn without_secret_only_presence_is_checked() {
        let guard = RouteGuard::new(None);
        assert_eq!(guard.check("/tasks", Some("anything")), RouteDecision::Allow);
        assert!(matches!(guard.check("/tasks", None), RouteDecision::Redirect(_)));
    }
}
