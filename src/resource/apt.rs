//! Debian package resource
//!
//! Packages are a group kind: every `apt` resource of a run is installed or
//! removed by a single `apt-get` call so the package manager can solve them
//! together.

use anyhow::{Context as _, Result, bail};
use converge::{Cmd, Context, GroupKind, Host, Resource};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const KIND: &str = "apt";

/// `dpkg-query` format: one tab-separated line per package
const QUERY_FORMAT: &str = "${Package}\t${Status}\t${Version}\n";

/// Status of a fully installed package
const INSTALLED: &str = "install ok installed";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AptState {
    /// Exact package version; the installed or candidate version when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// The `apt` kind
#[derive(Debug, Default)]
pub struct Apt;

/// Debian package names: lowercase alphanumerics and `+-.`, starting with
/// an alphanumeric, at least two characters
fn validate_name(name: &str) -> Result<()> {
    if name.len() < 2 {
        bail!("package name must be at least two characters");
    }
    if !name.starts_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit()) {
        bail!("package name must start with a lowercase letter or digit");
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '-' | '.')))
    {
        bail!("invalid character {c:?} in package name");
    }
    Ok(())
}

/// Installed versions from `dpkg-query -W` output
fn parse_installed(output: &str) -> HashMap<String, String> {
    let mut installed = HashMap::new();
    for line in output.lines() {
        let mut fields = line.splitn(3, '\t');
        let (Some(name), Some(status), Some(version)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if status == INSTALLED && !version.is_empty() {
            installed
                .entry(name.to_string())
                .or_insert_with(|| version.to_string());
        }
    }
    installed
}

/// Candidate versions from `apt-cache policy` output
///
/// Packages apt knows nothing about are missing from the result; packages
/// without an installable version map to `None`.
fn parse_candidates(output: &str) -> HashMap<String, Option<String>> {
    let mut candidates = HashMap::new();
    let mut current: Option<String> = None;
    for line in output.lines() {
        if !line.starts_with(char::is_whitespace) {
            current = line.strip_suffix(':').map(ToString::to_string);
            continue;
        }
        let Some(name) = &current else {
            continue;
        };
        if let Some(candidate) = line.trim().strip_prefix("Candidate:") {
            let candidate = candidate.trim();
            let version = (candidate != "(none)").then(|| candidate.to_string());
            candidates.insert(name.clone(), version);
        }
    }
    candidates
}

fn query_installed(
    ctx: &Context,
    host: &dyn Host,
    names: &[String],
) -> Result<HashMap<String, String>> {
    if names.is_empty() {
        return Ok(HashMap::new());
    }
    let cmd = Cmd::new("dpkg-query")
        .args(["-W", "-f", QUERY_FORMAT])
        .args(names.iter().cloned());
    let output = host.run(ctx, &cmd)?;
    // exit status 1 only means some packages are unknown to dpkg
    if output.status > 1 {
        bail!(
            "`{cmd}` exited with status {}: {}",
            output.status,
            output.stderr_str().trim()
        );
    }
    Ok(parse_installed(&output.stdout_str()))
}

/// `apt-get install` argument for one resource
fn install_arg(resource: &Resource) -> Result<String> {
    Ok(match resource.typed_state::<AptState>()? {
        None => format!("{}-", resource.id),
        Some(AptState {
            version: Some(version),
        }) => format!("{}={version}", resource.id),
        Some(AptState { version: None }) => resource.id.clone(),
    })
}

impl GroupKind for Apt {
    fn name(&self) -> &'static str {
        KIND
    }

    fn validate(&self, resource: &Resource) -> Result<()> {
        validate_name(&resource.id)?;
        if let Some(AptState {
            version: Some(version),
        }) = resource.typed_state::<AptState>()?
            && (version.is_empty() || version.contains(char::is_whitespace))
        {
            bail!("invalid version {version:?}");
        }
        Ok(())
    }

    fn resolve(
        &self,
        ctx: &Context,
        host: &dyn Host,
        resources: &[Resource],
    ) -> Result<Vec<Resource>> {
        let unpinned: Vec<String> = resources
            .iter()
            .filter(|r| !r.is_absent())
            .filter(|r| matches!(r.typed_state::<AptState>(), Ok(Some(AptState { version: None }))))
            .map(|r| r.id.clone())
            .collect();
        if unpinned.is_empty() {
            return Ok(resources.to_vec());
        }

        // installed packages keep their version, the rest get apt's candidate
        let installed = query_installed(ctx, host, &unpinned)?;
        let missing: Vec<String> = unpinned
            .iter()
            .filter(|name| !installed.contains_key(*name))
            .cloned()
            .collect();
        let candidates = if missing.is_empty() {
            HashMap::new()
        } else {
            let cmd = Cmd::new("apt-cache").arg("policy").args(missing.iter().cloned());
            parse_candidates(&host.run_checked(ctx, &cmd)?.stdout_str())
        };

        resources
            .iter()
            .map(|resource| {
                if !unpinned.contains(&resource.id) {
                    return Ok(resource.clone());
                }
                let version = match installed.get(&resource.id) {
                    Some(version) => version.clone(),
                    None => candidates
                        .get(&resource.id)
                        .cloned()
                        .flatten()
                        .with_context(|| format!("no installation candidate for {}", resource.id))?,
                };
                Resource::from_typed(
                    KIND,
                    &resource.id,
                    Some(&AptState {
                        version: Some(version),
                    }),
                )
            })
            .collect()
    }

    fn load(&self, ctx: &Context, host: &dyn Host, ids: &[String]) -> Result<Vec<Resource>> {
        let installed = query_installed(ctx, host, ids)?;
        ids.iter()
            .map(|id| match installed.get(id) {
                Some(version) => Resource::from_typed(
                    KIND,
                    id,
                    Some(&AptState {
                        version: Some(version.clone()),
                    }),
                ),
                None => Ok(Resource::absent(KIND, id)),
            })
            .collect()
    }

    fn apply(&self, ctx: &Context, host: &dyn Host, resources: &[Resource]) -> Result<()> {
        if resources.is_empty() {
            return Ok(());
        }
        let args = resources
            .iter()
            .map(install_arg)
            .collect::<Result<Vec<_>>>()?;
        log::debug!("apt-get install {}", args.join(" "));
        let cmd = Cmd::new("apt-get")
            .args(["install", "-y", "-q", "--allow-downgrades"])
            .args(args)
            .env("DEBIAN_FRONTEND", "noninteractive");
        host.run_checked(ctx, &cmd)?;
        Ok(())
    }
}
