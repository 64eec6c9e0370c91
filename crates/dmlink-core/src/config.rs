// ── Runtime session configuration ──
//
// These types describe *how* to talk to a datamodel server. They carry
// connection tuning and an optional token, but never touch disk. The CLI
// (or any embedding application) constructs a `SessionConfig` and hands it in.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (self-signed certs on a workstation).
    DangerAcceptInvalid,
}

/// Configuration for one session against one server.
///
/// Built by the caller and passed to `Session`; core never reads config files.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server base URL (e.g., `http://127.0.0.1:7410`).
    pub url: Url,
    /// Rules namespace used by [`Session::root`](crate::Session::root).
    pub default_rules: String,
    /// Optional bearer token.
    pub token: Option<SecretString>,
    /// TLS verification strategy.
    pub tls: TlsVerification,
    /// Bound on every unary call (get/set/execute/...). The event stream
    /// has no timeout.
    pub timeout: Duration,
    /// Compute `(changed, deleted)` key diffs for modified events.
    pub diff_state: bool,
}

impl SessionConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            default_rules: "datamodel".into(),
            token: None,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            diff_state: true,
        }
    }

    /// Config for an in-process backend where the URL is never dialled.
    pub fn local() -> Self {
        Self::new("memory://local".parse().expect("static URL is valid"))
    }

    pub fn with_rules(mut self, rules: impl Into<String>) -> Self {
        self.default_rules = rules.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_diff_state(mut self, enabled: bool) -> Self {
        self.diff_state = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_config_defaults() {
        let config = SessionConfig::local().with_rules("meshing");
        assert_eq!(config.url.scheme(), "memory");
        assert_eq!(config.default_rules, "meshing");
        assert!(config.diff_state);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }
}
