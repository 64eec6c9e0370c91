//! CLI configuration: a thin wrapper around `dmlink_config` shared types.
//!
//! Adds CLI-specific resolution that respects `GlobalOpts` flag overrides
//! (--server, --rules, --token, ...).

use std::time::Duration;

use secrecy::SecretString;

use dmlink_core::{SessionConfig, TlsVerification};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use dmlink_config::{
    Config, Profile, config_path, load_config_or_default, profile_to_session_config, save_config,
    store_token,
};

/// Scheme that selects the built-in demo server.
pub const MEMORY_SCHEME: &str = "memory";

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Build a `SessionConfig` from the config file, profile, and flag overrides.
///
/// Flags win over the profile, the profile over `[defaults]`. Without a
/// profile, `--server` alone is enough.
pub fn resolve_session_config(
    global: &GlobalOpts,
    config: &Config,
) -> Result<SessionConfig, CliError> {
    let profile_name = active_profile_name(global, config);

    let mut session = match config.profiles.get(&profile_name) {
        Some(profile) => profile_to_session_config(profile, &profile_name, &config.defaults)?,
        None if global.profile.is_some() => {
            return Err(dmlink_config::ConfigError::UnknownProfile {
                profile: profile_name,
            }
            .into());
        }
        None => {
            let url_str = global.server.as_deref().ok_or_else(|| CliError::NoConfig {
                path: config_path().display().to_string(),
            })?;
            let mut session = SessionConfig::new(parse_url(url_str)?)
                .with_timeout(Duration::from_secs(config.defaults.timeout))
                .with_diff_state(config.defaults.diff_state);
            if config.defaults.insecure {
                session.tls = TlsVerification::DangerAcceptInvalid;
            }
            session
        }
    };

    if let Some(ref url_str) = global.server {
        session.url = parse_url(url_str)?;
    }
    if let Some(ref rules) = global.rules {
        session.default_rules.clone_from(rules);
    } else if is_memory(&session) && !config.profiles.contains_key(&profile_name) {
        session.default_rules = dmlink_workflow::WORKFLOW_RULES.into();
    }
    if let Some(ref token) = global.token {
        session.token = Some(SecretString::from(token.clone()));
    }
    if global.insecure {
        session.tls = TlsVerification::DangerAcceptInvalid;
    }
    if let Some(secs) = global.timeout {
        session.timeout = Duration::from_secs(secs);
    }

    Ok(session)
}

/// Whether the session targets the built-in demo server.
pub fn is_memory(session: &SessionConfig) -> bool {
    session.url.scheme() == MEMORY_SCHEME
}

fn parse_url(raw: &str) -> Result<url::Url, CliError> {
    raw.parse().map_err(|_| CliError::Validation {
        field: "server".into(),
        reason: format!("invalid URL: {raw}"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::Cli;

    fn global(args: &[&str]) -> GlobalOpts {
        let mut argv = vec!["dmlink"];
        argv.extend_from_slice(args);
        argv.extend_from_slice(&["workflow", "tasks"]);
        Cli::try_parse_from(argv).unwrap().global
    }

    #[test]
    fn server_flag_works_without_a_profile() {
        let cfg = Config::default();
        let session =
            resolve_session_config(&global(&["--server", "http://127.0.0.1:7410"]), &cfg).unwrap();
        assert_eq!(session.url.as_str(), "http://127.0.0.1:7410/");
        assert_eq!(session.default_rules, "datamodel");
    }

    #[test]
    fn memory_server_defaults_to_workflow_rules() {
        let cfg = Config::default();
        let session = resolve_session_config(&global(&["--server", "memory://"]), &cfg).unwrap();
        assert!(is_memory(&session));
        assert_eq!(session.default_rules, "workflow");
    }

    #[test]
    fn flags_override_profile() {
        let mut cfg = Config::default();
        cfg.profiles
            .insert("lab".into(), Profile::new("http://lab.example:7410"));
        let session = resolve_session_config(
            &global(&["--profile", "lab", "--rules", "meshing", "--timeout", "3", "-k"]),
            &cfg,
        )
        .unwrap();
        assert_eq!(session.url.host_str(), Some("lab.example"));
        assert_eq!(session.default_rules, "meshing");
        assert_eq!(session.timeout, Duration::from_secs(3));
        assert_eq!(session.tls, TlsVerification::DangerAcceptInvalid);
    }

    #[test]
    fn missing_server_is_reported() {
        let err = resolve_session_config(&global(&[]), &Config::default()).unwrap_err();
        assert!(matches!(err, CliError::NoConfig { .. }));
    }
}
