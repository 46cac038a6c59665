//! Purpose: Hold the cookie token attached to every request.
//! Exports: `SessionState`, `LEGACY_TOKEN_LEN`, `CREDENTIALS_PLACEHOLDER`.
//! Invariants: Tokens taken from `set-cookie` are cut to the server's fixed length.

/// `JSESSIONID=` plus a 32 character id and the trailing separator.
pub const LEGACY_TOKEN_LEN: usize = 44;

/// Sent until a session is negotiated; the server falls back to basic credentials.
pub const CREDENTIALS_PLACEHOLDER: &str = "authentication_by_credentials";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionState {
    token: String,
}

impl SessionState {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn replace(&mut self, token: impl Into<String>) {
        self.token = token.into();
    }

    /// Adopts the token carried by a `set-cookie` header value.
    /// Returns true when the stored token changed.
    pub fn adopt_set_cookie(&mut self, header: &str) -> bool {
        let token = truncate_chars(header, LEGACY_TOKEN_LEN);
        if token == self.token {
            return false;
        }
        self.token = token.to_string();
        true
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(CREDENTIALS_PLACEHOLDER)
    }
}

fn truncate_chars(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}
