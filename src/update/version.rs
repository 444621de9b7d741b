use semver::Version;

use super::error::{Result, UpdateError};

/// Current version of the mwdl binary
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Accepts an optional 'v' prefix, as release tags carry one
fn parse_version(version_str: &str) -> Result<Version> {
    let cleaned = version_str.trim().trim_start_matches('v');
    Version::parse(cleaned).map_err(|e| UpdateError::Version {
        version: version_str.to_string(),
        reason: e.to_string(),
    })
}

/// True when the `remote` tag is a strictly newer semver than `current`
pub fn is_newer(remote: &str, current: &str) -> Result<bool> {
    let remote_ver = parse_version(remote)?;
    let current_ver = parse_version(current)?;
    Ok(remote_ver > current_ver)
}
