//! API credential lookup
//!
//! The key is read on every request so that a rotated credential takes effect
//! without restarting running batches.

/// Environment variable read by [`EnvCredential::default`]
pub const DEFAULT_API_KEY_VAR: &str = "MINERU_API_KEY";

/// Source of the current API key
pub trait CredentialSource: Send + Sync {
    /// Current key, or `None` when no credential is configured
    fn api_key(&self) -> Option<String>;
}

/// Fixed API key
#[derive(Clone)]
pub struct StaticCredential(String);

impl StaticCredential {
    /// Wrap a key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl std::fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticCredential(***)")
    }
}

impl CredentialSource for StaticCredential {
    fn api_key(&self) -> Option<String> {
        non_empty(&self.0)
    }
}

/// API key read from an environment variable on every request
#[derive(Clone, Debug)]
pub struct EnvCredential {
    var: String,
}

impl EnvCredential {
    /// Read the key from `var`
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvCredential {
    fn default() -> Self {
        Self::new(DEFAULT_API_KEY_VAR)
    }
}

impl CredentialSource for EnvCredential {
    fn api_key(&self) -> Option<String> {
        std::env::var(&self.var).ok().and_then(|v| non_empty(&v))
    }
}

fn non_empty(key: &str) -> Option<String> {
    let key = key.trim();
    (!key.is_empty()).then(|| key.to_string())
}
