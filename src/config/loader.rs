// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::model::{ConfigFile, Profile};
use crate::config::validate::validate_config;
use crate::errors::{DevloopError, Result};
use crate::watch::imports::clean_path;

/// File picked up from the current directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "devloop.config";

/// Load a configuration file without validating it.
///
/// Files ending in `.toml` are read as TOML, everything else as JSON.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|err| {
        DevloopError::ConfigError(format!("can't read config file {path:?}: {err}"))
    })?;

    let is_toml = path.extension().map(|e| e == "toml").unwrap_or(false);
    let config: ConfigFile = if is_toml {
        toml::from_str(&contents)?
    } else {
        serde_json::from_str(&contents)?
    };

    Ok(config)
}

/// Pick the configuration file to use, if any.
///
/// An explicit path wins; otherwise [`DEFAULT_CONFIG_FILE`] in `cwd` is used
/// when it exists.
pub fn resolve_config_path(explicit: Option<&Path>, cwd: &Path) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let candidate = cwd.join(DEFAULT_CONFIG_FILE);
    candidate.is_file().then_some(candidate)
}

/// Load, absolutise and validate the effective configuration.
///
/// This is the entry point for the rest of the application:
///
/// - reads the explicit or discovered file, else the built-in `profile`,
/// - makes the watch root and all working directories absolute,
/// - rejects configurations that could only fail later.
pub fn load_and_validate(explicit: Option<&Path>, profile: Profile) -> Result<ConfigFile> {
    let cwd = std::env::current_dir()?;

    let config = match resolve_config_path(explicit, &cwd) {
        Some(path) => {
            info!(path = ?path, "loading configuration");
            load_from_path(&path)?
        }
        None => {
            debug!(?profile, "no config file; using built-in configuration");
            ConfigFile::builtin(profile)
        }
    };

    let config = absolutize(config, &cwd);
    validate_config(&config)?;
    Ok(config)
}

/// Resolve relative paths against `base`; an empty working directory means
/// `base` itself.
///
/// Directories that exist are canonicalized, so they compare equal to the
/// canonical paths the watcher reports.
pub fn absolutize(mut config: ConfigFile, base: &Path) -> ConfigFile {
    config.watchroot = resolve_dir(base, &config.watchroot);
    for compiler in &mut config.compilers {
        compiler.workingdir = resolve_dir(base, &compiler.workingdir);
        if let Some(root) = compiler.sourceroot.as_mut() {
            *root = resolve_dir(base, root);
        }
    }
    for runner in &mut config.runners {
        runner.workingdir = resolve_dir(base, &runner.workingdir);
    }
    config
}

fn resolve_dir(base: &Path, dir: &Path) -> PathBuf {
    let cleaned = clean_path(&base.join(dir));
    match cleaned.canonicalize() {
        Ok(real) => real,
        Err(err) => {
            debug!(dir = ?cleaned, error = %err, "keeping unresolved directory");
            cleaned
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_become_absolute() {
        let mut cfg = ConfigFile::builtin(Profile::Application);
        cfg.compilers[1].workingdir = PathBuf::from("web/../templates");
        let cfg = absolutize(cfg, Path::new("/proj"));
        assert_eq!(cfg.watchroot, PathBuf::from("/proj"));
        assert_eq!(cfg.compilers[0].workingdir, PathBuf::from("/proj"));
        assert_eq!(cfg.compilers[1].workingdir, PathBuf::from("/proj/templates"));
        assert_eq!(cfg.runners[0].workingdir, PathBuf::from("/proj"));
    }

    #[test]
    fn absolute_paths_are_kept() {
        let mut cfg = ConfigFile::builtin(Profile::Library);
        cfg.compilers[0].workingdir = PathBuf::from("/elsewhere");
        let cfg = absolutize(cfg, Path::new("/proj"));
        assert_eq!(cfg.compilers[0].workingdir, PathBuf::from("/elsewhere"));
    }

    #[test]
    fn default_file_is_discovered_in_cwd() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_config_path(None, dir.path()), None);

        fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "{}").unwrap();
        assert_eq!(
            resolve_config_path(None, dir.path()),
            Some(dir.path().join(DEFAULT_CONFIG_FILE))
        );

        let explicit = PathBuf::from("/x/other.toml");
        assert_eq!(
            resolve_config_path(Some(&explicit), dir.path()),
            Some(explicit.clone())
        );
    }

    #[test]
    fn symlinked_directories_resolve_to_their_target() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir(&real).unwrap();
        std::os::unix::fs::symlink(&real, dir.path().join("link")).unwrap();

        let mut cfg = ConfigFile::builtin(Profile::Application);
        cfg.compilers[0].workingdir = PathBuf::from("link");
        cfg.runners[0].workingdir = PathBuf::from("link/../link");
        let cfg = absolutize(cfg, dir.path());

        let real = real.canonicalize().unwrap();
        assert_eq!(cfg.compilers[0].workingdir, real);
        assert_eq!(cfg.runners[0].workingdir, real);
        assert_eq!(cfg.watchroot, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn missing_explicit_file_is_a_config_error() {
        let err = load_from_path("/definitely/not/here.config").unwrap_err();
        assert!(matches!(err, DevloopError::ConfigError(_)));
    }
}
