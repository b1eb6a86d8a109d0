// src/config/validate.rs

use std::collections::HashSet;

use reqwest::Url;

use crate::config::model::{ConfigFile, ProxyConfig};
use crate::errors::{DevloopError, Result};
use crate::exec::Replacements;
use crate::watch::PatternSet;

/// Check everything that would otherwise fail only once the orchestrator is
/// running.
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    validate_compilers(cfg)?;
    validate_runners(cfg)?;
    for proxy in &cfg.httpproxies {
        validate_proxy(proxy)?;
    }
    Ok(())
}

fn validate_compilers(cfg: &ConfigFile) -> Result<()> {
    let mut seen = HashSet::new();
    for compiler in &cfg.compilers {
        if compiler.name.trim().is_empty() {
            return Err(DevloopError::ConfigError(
                "every compiler needs a non-empty `name`".to_string(),
            ));
        }
        if !seen.insert(compiler.name.as_str()) {
            return Err(DevloopError::ConfigError(format!(
                "compiler name '{}' is used more than once",
                compiler.name
            )));
        }

        // Base is irrelevant here; only the syntax is checked.
        PatternSet::parse_with_base(&compiler.pattern, &compiler.exclude, "/")?;
        Replacements::new(compiler.replace.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
    }
    Ok(())
}

fn validate_runners(cfg: &ConfigFile) -> Result<()> {
    for runner in &cfg.runners {
        if runner.name.trim().is_empty() {
            return Err(DevloopError::ConfigError(
                "every runner needs a non-empty `name`".to_string(),
            ));
        }
        Replacements::new(runner.replace.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
    }
    Ok(())
}

fn validate_proxy(proxy: &ProxyConfig) -> Result<()> {
    if proxy.listen.trim().is_empty() {
        return Err(DevloopError::ConfigError(
            "http proxy `listen` must not be empty".to_string(),
        ));
    }

    let url = Url::parse(&proxy.target).map_err(|err| {
        DevloopError::ConfigError(format!(
            "http proxy target '{}' is not a valid URL: {err}",
            proxy.target
        ))
    })?;

    if url.scheme() != "http" {
        return Err(DevloopError::ConfigError(format!(
            "http proxy target '{}' must use http://",
            proxy.target
        )));
    }
    if url.host_str().is_none() || url.port_or_known_default().is_none() {
        return Err(DevloopError::ConfigError(format!(
            "http proxy target '{}' needs a host and port",
            proxy.target
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{CompilerConfig, Profile, RunnerConfig};

    fn compiler(name: &str, pattern: &str) -> CompilerConfig {
        CompilerConfig {
            name: name.to_string(),
            pattern: pattern.to_string(),
            ..CompilerConfig::default()
        }
    }

    #[test]
    fn builtin_profiles_are_valid() {
        for profile in [Profile::Application, Profile::Library, Profile::Test] {
            validate_config(&ConfigFile::builtin(profile)).unwrap();
        }
    }

    #[test]
    fn duplicate_compiler_names_are_rejected() {
        let cfg = ConfigFile {
            compilers: vec![compiler("a", "*.go"), compiler("a", "*.tmpl")],
            ..ConfigFile::default()
        };
        let err = validate_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn empty_names_are_rejected() {
        let cfg = ConfigFile {
            runners: vec![RunnerConfig::default()],
            ..ConfigFile::default()
        };
        assert!(matches!(
            validate_config(&cfg),
            Err(DevloopError::ConfigError(_))
        ));
    }

    #[test]
    fn malformed_globs_are_fatal() {
        let cfg = ConfigFile {
            compilers: vec![compiler("a", "*.go, [bad")],
            ..ConfigFile::default()
        };
        assert!(matches!(
            validate_config(&cfg),
            Err(DevloopError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn proxy_targets_must_be_http_urls() {
        for target in ["127.0.0.1:3000", "https://localhost", "not a url"] {
            let cfg = ConfigFile {
                httpproxies: vec![ProxyConfig {
                    listen: ":1984".to_string(),
                    target: target.to_string(),
                }],
                ..ConfigFile::default()
            };
            assert!(validate_config(&cfg).is_err(), "{target} should be rejected");
        }
    }
}
