//! Settings file and resource declarations
//!
//! `hostward.toml` in the config dir is optional:
//!
//! ```toml
//! store_dir = "/var/lib/hostward"
//! resources = ["conf.d"]
//! jobs = 8
//! ```
//!
//! Declarations are TOML files holding `[[resource]]` tables:
//!
//! ```toml
//! [[resource]]
//! kind = "file"
//! id = "/etc/motd"
//! state = { content = "hello\n", mode = 0o644, user = "root" }
//!
//! [[resource]]
//! kind = "apt"
//! id = "curl"
//!
//! [[resource]]
//! kind = "file"
//! id = "/etc/cron.d/legacy"
//! absent = true
//! ```
//!
//! Declaration order across files is dependency order, so directories are
//! walked in sorted file-name order.

use anyhow::{Context, Result, bail};
use converge::Resource;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::paths;

/// Settings file name inside the config dir
pub const SETTINGS_FILE: &str = "hostward.toml";

/// Contents of `hostward.toml`
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Engine store location (default: `<state dir>/store`)
    #[serde(default)]
    pub store_dir: Option<String>,

    /// Declaration files or directories used when none are given
    #[serde(default)]
    pub resources: Vec<String>,

    /// Steps loaded concurrently
    #[serde(default)]
    pub jobs: Option<usize>,

    /// Directory the settings were read from, for relative paths
    #[serde(skip)]
    base: PathBuf,
}

impl Settings {
    /// Load settings from the config dir; a missing file gives defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_dir()?)
    }

    pub fn load_from(dir: &Path) -> Result<Self> {
        let path = dir.join(SETTINGS_FILE);
        if !path.exists() {
            log::debug!("No settings at {}, using defaults", path.display());
            return Ok(Self {
                base: dir.to_path_buf(),
                ..Self::default()
            });
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let mut settings: Self =
            toml::from_str(&content).with_context(|| format!("Invalid {}", path.display()))?;
        settings.base = dir.to_path_buf();
        Ok(settings)
    }

    pub fn store_dir(&self) -> Result<PathBuf> {
        match &self.store_dir {
            Some(dir) => Ok(paths::resolve_relative(&self.base, dir)),
            None => paths::store_dir(),
        }
    }

    /// Declaration paths, resolved against the config dir
    pub fn resource_paths(&self) -> Vec<PathBuf> {
        self.resources
            .iter()
            .map(|p| paths::resolve_relative(&self.base, p))
            .collect()
    }
}

// ============================================================================
// Declarations
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeclarationFile {
    #[serde(default)]
    resource: Vec<Declaration>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Declaration {
    kind: String,
    id: String,
    #[serde(default)]
    state: Option<toml::Table>,
    /// The resource must not exist
    #[serde(default)]
    absent: bool,
}

impl Declaration {
    fn into_resource(self) -> Result<Resource> {
        match (self.absent, self.state) {
            (true, Some(_)) => bail!(
                "{}[{}]: `absent = true` cannot be combined with `state`",
                self.kind,
                self.id
            ),
            (true, None) => Ok(Resource::absent(self.kind, self.id)),
            (false, state) => {
                let state = serde_json::to_value(state.unwrap_or_default())?;
                Ok(Resource::new(self.kind, self.id, state))
            }
        }
    }
}

/// Parse one declaration document
pub fn parse_declarations(content: &str) -> Result<Vec<Resource>> {
    let file: DeclarationFile = toml::from_str(content)?;
    file.resource
        .into_iter()
        .map(Declaration::into_resource)
        .collect()
}

/// Load declarations from files and directories, in order
pub fn load_declarations(paths: &[PathBuf]) -> Result<Vec<Resource>> {
    let mut resources = Vec::new();
    for path in paths {
        for file in declaration_files(path)? {
            let content = fs::read_to_string(&file)
                .with_context(|| format!("Could not read {}", file.display()))?;
            let parsed = parse_declarations(&content)
                .with_context(|| format!("Invalid declarations in {}", file.display()))?;
            log::debug!("{}: {} resource(s)", file.display(), parsed.len());
            resources.extend(parsed);
        }
    }
    Ok(resources)
}

/// `*.toml` files under `path`, sorted by name; `path` itself if it is a file
fn declaration_files(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        bail!("{} does not exist", path.display());
    }
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Could not walk {}", path.display()))?;
        if entry.file_type().is_file() && entry.path().extension().is_some_and(|e| e == "toml") {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_parse_declarations() {
        let resources = parse_declarations(
            r#"
[[resource]]
kind = "file"
id = "/etc/motd"
state = { content = "hi\n", mode = 0o644 }

[[resource]]
kind = "apt"
id = "curl"

[[resource]]
kind = "file"
id = "/etc/old"
absent = true
"#,
        )
        .unwrap();
        assert_eq!(resources.len(), 3);
        assert_eq!(resources[0].state, Some(json!({ "content": "hi\n", "mode": 420 })));
        assert_eq!(resources[1].state, Some(json!({})));
        assert!(resources[2].is_absent());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = parse_declarations("[[resource]]\nkind = \"apt\"\nid = \"curl\"\nstat = {}\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_absent_with_state_rejected() {
        let err = parse_declarations(
            "[[resource]]\nkind = \"apt\"\nid = \"curl\"\nabsent = true\nstate = { version = \"1\" }\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("absent"));
    }

    #[test]
    fn test_directories_load_in_name_order() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("20-nested")).unwrap();
        fs::write(
            dir.path().join("30-last.toml"),
            "[[resource]]\nkind = \"apt\"\nid = \"c\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("20-nested").join("x.toml"),
            "[[resource]]\nkind = \"apt\"\nid = \"b\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("10-first.toml"),
            "[[resource]]\nkind = \"apt\"\nid = \"a\"\n",
        )
        .unwrap();
        fs::write(dir.path().join("README.md"), "not a declaration").unwrap();

        let resources = load_declarations(&[dir.path().to_path_buf()]).unwrap();
        let ids: Vec<&str> = resources.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn test_missing_path_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(load_declarations(&[dir.path().join("nope.toml")]).is_err());
    }

    #[test]
    fn test_settings_defaults_without_file() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_from(dir.path()).unwrap();
        assert!(settings.resources.is_empty());
        assert_eq!(settings.jobs, None);
    }

    #[test]
    fn test_settings_paths_are_relative_to_config_dir() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(SETTINGS_FILE),
            "store_dir = \"state\"\nresources = [\"conf.d\", \"/abs/x.toml\"]\njobs = 2\n",
        )
        .unwrap();
        let settings = Settings::load_from(dir.path()).unwrap();
        assert_eq!(settings.store_dir().unwrap(), dir.path().join("state"));
        assert_eq!(
            settings.resource_paths(),
            [dir.path().join("conf.d"), PathBuf::from("/abs/x.toml")]
        );
        assert_eq!(settings.jobs, Some(2));
    }

    #[test]
    fn test_settings_reject_unknown_keys() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(SETTINGS_FILE), "stor_dir = \"x\"\n").unwrap();
        assert!(Settings::load_from(dir.path()).is_err());
    }
}
