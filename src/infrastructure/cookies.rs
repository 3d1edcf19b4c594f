use crate::domain::models::RefreshCredential;

pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";
pub const CSRF_TOKEN_COOKIE: &str = "csrf_token";
pub const SESSION_COOKIE: &str = "session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub removed: bool,
}

/// Parses the `name=value` pair of a `Set-Cookie` header. Attributes other than
/// `Max-Age=0` and an empty value (both meaning deletion) are ignored.
pub fn parse_set_cookie(header: &str) -> Option<SetCookie> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim().trim_matches('"').to_string();
    let expired = parts.any(|attribute| {
        attribute
            .split_once('=')
            .is_some_and(|(key, raw)| key.trim().eq_ignore_ascii_case("max-age") && raw.trim() == "0")
    });

    Some(SetCookie {
        name: name.to_string(),
        removed: expired || value.is_empty(),
        value,
    })
}

/// Folds the session cookies from a response into the stored credential.
/// Returns `true` when anything changed.
pub fn apply_set_cookies(credential: &mut RefreshCredential, headers: &[String]) -> bool {
    let mut changed = false;
    for cookie in headers.iter().filter_map(|header| parse_set_cookie(header)) {
        let slot = match cookie.name.as_str() {
            REFRESH_TOKEN_COOKIE => &mut credential.refresh_token,
            CSRF_TOKEN_COOKIE => &mut credential.csrf_token,
            SESSION_COOKIE => &mut credential.session,
            _ => continue,
        };
        let next = if cookie.removed { None } else { Some(cookie.value) };
        if *slot != next {
            *slot = next;
            changed = true;
        }
    }
    changed
}

/// `Cookie` header value for the stored credential, `None` when nothing is held.
pub fn cookie_header(credential: &RefreshCredential) -> Option<String> {
    let pairs = [
        (REFRESH_TOKEN_COOKIE, credential.refresh_token.as_deref()),
        (CSRF_TOKEN_COOKIE, credential.csrf_token.as_deref()),
        (SESSION_COOKIE, credential.session.as_deref()),
    ]
    .into_iter()
    .filter_map(|(name, value)| value.map(|value| format!("{name}={value}")))
    .collect::<Vec<_>>();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}
