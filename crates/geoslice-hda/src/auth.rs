//! Credential sources for the archive bearer token

/// Environment variable read by [`EnvToken::default`]
pub const DEFAULT_TOKEN_ENV: &str = "HDA_ACCESS_TOKEN";

/// Opaque bearer token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Blank strings are not tokens
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Anything that can hand out an access token, once per run
pub trait CredentialSource: Send + Sync {
    fn token(&self) -> Option<AccessToken>;
}

/// Fixed token, mostly for tests and embedding
#[derive(Debug, Clone)]
pub struct StaticToken(Option<AccessToken>);

impl StaticToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(AccessToken::new(value))
    }
}

impl CredentialSource for StaticToken {
    fn token(&self) -> Option<AccessToken> {
        self.0.clone()
    }
}

/// Token read from an environment variable at call time
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    pub fn var(&self) -> &str {
        &self.var
    }
}

impl Default for EnvToken {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_ENV)
    }
}

impl CredentialSource for EnvToken {
    fn token(&self) -> Option<AccessToken> {
        let token = std::env::var(&self.var).ok().and_then(AccessToken::new);
        if token.is_none() {
            log::debug!("{} is unset or empty", self.var);
        }
        token
    }
}
