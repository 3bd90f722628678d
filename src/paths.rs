//! Centralized path resolution for hostward
//!
//! # Environment Variables
//!
//! - `HOSTWARD_CONFIG_DIR` - Override config directory (settings and declarations)
//! - `HOSTWARD_STATE_DIR` - Override state directory (the engine store lives here)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `HOSTWARD_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/hostward` (if set)
//! 3. `~/.config/hostward`
//!
//! For state_dir():
//! 1. `HOSTWARD_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/hostward` (if set)
//! 3. `~/.local/state/hostward`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "HOSTWARD_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "HOSTWARD_STATE_DIR";

const APP: &str = "hostward";

/// Get the hostward config directory path
pub fn config_dir() -> Result<PathBuf> {
    resolve_dir(
        ENV_CONFIG_DIR,
        "XDG_CONFIG_HOME",
        &[".config"],
        |key| std::env::var(key).ok(),
        dirs::home_dir(),
    )
}

/// Get the hostward state directory path
pub fn state_dir() -> Result<PathBuf> {
    resolve_dir(
        ENV_STATE_DIR,
        "XDG_STATE_HOME",
        &[".local", "state"],
        |key| std::env::var(key).ok(),
        dirs::home_dir(),
    )
}

/// Default location of the engine store
pub fn store_dir() -> Result<PathBuf> {
    Ok(state_dir()?.join("store"))
}

fn resolve_dir(
    override_var: &str,
    xdg_var: &str,
    home_default: &[&str],
    env: impl Fn(&str) -> Option<String>,
    home: Option<PathBuf>,
) -> Result<PathBuf> {
    // 1. Check environment variable override
    if let Some(dir) = env(override_var) {
        let path = expand(&dir);
        log::debug!("Using {} from {}: {}", APP, override_var, path.display());
        return Ok(path);
    }

    // 2. Check XDG variable
    if let Some(xdg) = env(xdg_var).filter(|v| !v.is_empty()) {
        let path = PathBuf::from(xdg).join(APP);
        log::debug!("Using {}: {}", xdg_var, path.display());
        return Ok(path);
    }

    // 3. Home default
    let home = home.context("Could not determine home directory")?;
    let path = home_default
        .iter()
        .fold(home, |path, part| path.join(part))
        .join(APP);
    log::debug!("Using default dir: {}", path.display());
    Ok(path)
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

/// Resolve a path from a settings file relative to the file's directory
pub fn resolve_relative(base: &Path, path: &str) -> PathBuf {
    let expanded = expand(path);
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn resolve_config(vars: &[(&str, &str)]) -> Result<PathBuf> {
        resolve_dir(
            ENV_CONFIG_DIR,
            "XDG_CONFIG_HOME",
            &[".config"],
            env_of(vars),
            Some(PathBuf::from("/home/op")),
        )
    }

    #[test]
    fn test_override_wins() {
        let result = resolve_config(&[
            (ENV_CONFIG_DIR, "/custom/config/path"),
            ("XDG_CONFIG_HOME", "/xdg"),
        ])
        .unwrap();
        assert_eq!(result, PathBuf::from("/custom/config/path"));
    }

    #[test]
    fn test_xdg_config_home() {
        let result = resolve_config(&[("XDG_CONFIG_HOME", "/xdg")]).unwrap();
        assert_eq!(result, PathBuf::from("/xdg/hostward"));
    }

    #[test]
    fn test_empty_xdg_is_ignored() {
        let result = resolve_config(&[("XDG_CONFIG_HOME", "")]).unwrap();
        assert_eq!(result, PathBuf::from("/home/op/.config/hostward"));
    }

    #[test]
    fn test_default_state_dir() {
        let result = resolve_dir(
            ENV_STATE_DIR,
            "XDG_STATE_HOME",
            &[".local", "state"],
            env_of(&[]),
            Some(PathBuf::from("/home/op")),
        )
        .unwrap();
        assert_eq!(result, PathBuf::from("/home/op/.local/state/hostward"));
    }

    #[test]
    fn test_missing_home_is_an_error() {
        let result = resolve_dir(ENV_STATE_DIR, "XDG_STATE_HOME", &[".local"], env_of(&[]), None);
        assert!(result.is_err());
    }

    #[test]
    fn test_expand_with_tilde() {
        let result = expand("~/test/path");
        let home = dirs::home_dir().unwrap();
        assert_eq!(result, home.join("test").join("path"));
    }

    #[test]
    fn test_expand_absolute() {
        assert_eq!(expand("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        let result = expand("/path/$NONEXISTENT_VAR_12345/file");
        assert_eq!(result, PathBuf::from("/path/$NONEXISTENT_VAR_12345/file"));
    }

    #[test]
    fn test_resolve_relative() {
        let base = Path::new("/etc/hostward");
        assert_eq!(resolve_relative(base, "conf.d"), PathBuf::from("/etc/hostward/conf.d"));
        assert_eq!(resolve_relative(base, "/srv/decl"), PathBuf::from("/srv/decl"));
    }
}
