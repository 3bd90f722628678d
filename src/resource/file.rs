//! Regular file resource
//!
//! Manages the content, permission bits and ownership of one file. Owners
//! may be declared by name; resolving turns names into numeric ids so the
//! stored state matches what loading the file reports.

use anyhow::{Context as _, Result, bail};
use converge::{Cmd, Context, FileKind, Host, Resource, SingleKind};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const KIND: &str = "file";

/// Mode used when a new file declares none
const DEFAULT_MODE: u32 = 0o644;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileState {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    /// Owner name, replaced by `uid` when resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Group name, replaced by `gid` when resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
}

/// The `file` kind
#[derive(Debug, Default)]
pub struct File;

/// Check that `path` is absolute and normalised
fn validate_path(path: &str) -> Result<()> {
    let parsed = Path::new(path);
    if !parsed.is_absolute() {
        bail!("path must be absolute");
    }
    if path.len() > 1 && path.ends_with('/') {
        bail!("path must not end with '/'");
    }
    if path.contains("//") {
        bail!("path must not contain empty components");
    }
    if path.split('/').any(|part| part == "." || part == "..") {
        bail!("path must not contain '.' or '..'");
    }
    if parsed.parent().is_none() {
        bail!("cannot manage the root directory");
    }
    Ok(())
}

/// Numeric id of the account commands run as
fn current_id(ctx: &Context, host: &dyn Host, flag: &str) -> Result<u32> {
    let out = host.run_checked(ctx, &Cmd::new("id").arg(flag))?;
    out.stdout_str()
        .trim()
        .parse()
        .with_context(|| format!("unexpected output from `id {flag}`"))
}

impl SingleKind for File {
    fn name(&self) -> &'static str {
        KIND
    }

    fn validate(&self, resource: &Resource) -> Result<()> {
        validate_path(&resource.id)?;
        let Some(state) = resource.typed_state::<FileState>()? else {
            return Ok(());
        };
        if state.mode.is_some_and(|m| m > 0o7777) {
            bail!("mode must be at most 0o7777");
        }
        if state.user.is_some() && state.uid.is_some() {
            bail!("declare either `user` or `uid`, not both");
        }
        if state.group.is_some() && state.gid.is_some() {
            bail!("declare either `group` or `gid`, not both");
        }
        Ok(())
    }

    fn resolve(&self, ctx: &Context, host: &dyn Host, resource: &Resource) -> Result<Resource> {
        let Some(mut state) = resource.typed_state::<FileState>()? else {
            return Ok(resource.clone());
        };
        let current = host.lstat(ctx, Path::new(&resource.id))?;

        if let Some(user) = state.user.take() {
            state.uid = Some(host.lookup_uid(ctx, &user)?);
        }
        if let Some(group) = state.group.take() {
            state.gid = Some(host.lookup_gid(ctx, &group)?);
        }
        // undeclared attributes keep what the host has, or the defaults for new files
        if state.mode.is_none() {
            state.mode = Some(current.map_or(DEFAULT_MODE, |s| s.mode));
        }
        if state.uid.is_none() {
            state.uid = Some(match current {
                Some(stat) => stat.uid,
                None => current_id(ctx, host, "-u")?,
            });
        }
        if state.gid.is_none() {
            state.gid = Some(match current {
                Some(stat) => stat.gid,
                None => current_id(ctx, host, "-g")?,
            });
        }
        Resource::from_typed(KIND, &resource.id, Some(&state))
    }

    fn load(&self, ctx: &Context, host: &dyn Host, id: &str) -> Result<Resource> {
        let path = Path::new(id);
        let Some(stat) = host.lstat(ctx, path)? else {
            return Ok(Resource::absent(KIND, id));
        };
        if stat.kind != FileKind::Regular {
            bail!("{id} exists but is not a regular file");
        }
        let content = String::from_utf8(host.read_file(ctx, path)?)
            .with_context(|| format!("{id} is not valid UTF-8"))?;
        let state = FileState {
            content,
            mode: Some(stat.mode),
            user: None,
            group: None,
            uid: Some(stat.uid),
            gid: Some(stat.gid),
        };
        Resource::from_typed(KIND, id, Some(&state))
    }

    fn apply(&self, ctx: &Context, host: &dyn Host, resource: &Resource) -> Result<()> {
        let path = Path::new(&resource.id);
        let Some(state) = resource.typed_state::<FileState>()? else {
            if host.lstat(ctx, path)?.is_some() {
                log::debug!("Removing {}", path.display());
                host.remove(ctx, path)?;
            }
            return Ok(());
        };
        let mode = state.mode.unwrap_or(DEFAULT_MODE);
        log::debug!("Writing {} ({:o})", path.display(), mode);
        host.write_file(ctx, path, state.content.as_bytes(), mode)?;
        if let (Some(uid), Some(gid)) = (state.uid, state.gid) {
            host.chown(ctx, path, uid, gid)?;
        }
        Ok(())
    }
}
