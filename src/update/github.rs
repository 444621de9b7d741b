use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::{Client, Response};
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::io::Read;
use tracing::{debug, info};

use super::error::{Result, UpdateError};
use crate::config::UpdateConfig;

const USER_AGENT: &str = concat!("mwdl/", env!("CARGO_PKG_VERSION"));
const GITHUB_JSON: &str = "application/vnd.github+json";
const OCTET_STREAM: &str = "application/octet-stream";

/// A published release on the feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub id: String,
    pub tag: String,
}

/// One downloadable file attached to a release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDescriptor {
    pub name: String,
    pub download_url: String,
}

/// Downloaded, not yet inspected asset bytes
#[derive(Debug)]
pub struct RawArtifact {
    pub bytes: Vec<u8>,
    pub asset: AssetDescriptor,
}

#[derive(Debug, Deserialize)]
struct LatestRelease {
    id: u64,
    tag_name: String,
}

#[derive(Debug, Deserialize)]
struct AssetEntry {
    name: String,
    browser_download_url: String,
}

/// OS and architecture tokens as they appear in artifact names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
}

impl Platform {
    /// Tokens for the platform this binary was compiled for
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            "powerpc64" => "ppc64",
            other => other,
        };
        Self { os, arch }
    }

    fn matches(&self, asset_name: &str) -> bool {
        asset_name.contains(self.os) && asset_name.contains(self.arch)
    }
}

/// The network half of the pipeline: resolve, list and download
pub trait ReleaseFeed {
    fn latest_release(&self) -> Result<Release>;
    fn list_assets(&self, release: &Release) -> Result<Vec<AssetDescriptor>>;
    fn download(&self, asset: &AssetDescriptor) -> Result<RawArtifact>;
}

/// Pick the asset built for `platform`. When several match, the one listed
/// last wins.
pub fn select_asset<'a>(
    assets: &'a [AssetDescriptor],
    platform: &Platform,
) -> Option<&'a AssetDescriptor> {
    let mut selected = None;
    for asset in assets {
        if platform.matches(&asset.name) {
            debug!(asset = %asset.name, "asset matches platform");
            selected = Some(asset);
        }
    }
    selected
}

/// GitHub releases API client
pub struct GithubFeed<'a> {
    config: &'a UpdateConfig,
    client: Client,
    show_progress: bool,
}

impl<'a> GithubFeed<'a> {
    pub fn new(config: &'a UpdateConfig, show_progress: bool) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| UpdateError::network("building HTTP client", e))?;

        Ok(Self {
            config,
            client,
            show_progress,
        })
    }

    fn repo_url(&self) -> String {
        format!(
            "{}/repos/{}/{}",
            self.config.api_base, self.config.owner, self.config.project
        )
    }

    fn get(&self, url: &str, accept: &str, action: &'static str) -> Result<Response> {
        debug!(url, "GET");
        let response = self
            .client
            .get(url)
            .header(ACCEPT, accept)
            .send()
            .map_err(|e| UpdateError::network(action, e))?;

        if !response.status().is_success() {
            return Err(UpdateError::Network {
                action,
                reason: format!("{} returned {}", url, response.status()),
            });
        }
        Ok(response)
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        action: &'static str,
        what: &'static str,
    ) -> Result<T> {
        let body = self
            .get(url, GITHUB_JSON, action)?
            .bytes()
            .map_err(|e| UpdateError::network(action, e))?;
        decode_json(&body, what)
    }
}

impl ReleaseFeed for GithubFeed<'_> {
    fn latest_release(&self) -> Result<Release> {
        let url = format!("{}/releases/latest", self.repo_url());
        let latest: LatestRelease =
            self.get_json(&url, "fetching latest release", "latest release")?;

        Ok(Release {
            id: latest.id.to_string(),
            tag: latest.tag_name,
        })
    }

    fn list_assets(&self, release: &Release) -> Result<Vec<AssetDescriptor>> {
        let url = format!("{}/releases/{}/assets", self.repo_url(), release.id);
        let entries: Vec<AssetEntry> =
            self.get_json(&url, "listing release assets", "release assets")?;

        Ok(entries
            .into_iter()
            .map(|entry| AssetDescriptor {
                name: entry.name,
                download_url: entry.browser_download_url,
            })
            .collect())
    }

    fn download(&self, asset: &AssetDescriptor) -> Result<RawArtifact> {
        const ACTION: &str = "downloading asset";

        let mut response = self.get(&asset.download_url, OCTET_STREAM, ACTION)?;
        let total_size = response.content_length();

        let pb = match total_size {
            Some(len) if self.show_progress => progress_bar(len),
            _ => ProgressBar::hidden(),
        };

        // Content-Length is only a hint for the progress bar.
        let mut bytes = Vec::new();
        let mut buffer = [0u8; 8192];

        loop {
            let bytes_read = response
                .read(&mut buffer)
                .map_err(|e| UpdateError::network(ACTION, e))?;
            if bytes_read == 0 {
                break;
            }
            bytes.extend_from_slice(&buffer[..bytes_read]);
            pb.set_position(bytes.len() as u64);
        }

        pb.finish_and_clear();
        if let Some(len) = total_size {
            if bytes.len() as u64 != len {
                return Err(UpdateError::Network {
                    action: ACTION,
                    reason: format!("expected {} bytes, received {}", len, bytes.len()),
                });
            }
        }
        info!(asset = %asset.name, size = bytes.len(), "downloaded asset");

        Ok(RawArtifact {
            bytes,
            asset: asset.clone(),
        })
    }
}

fn progress_bar(len: u64) -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    let pb = ProgressBar::new(len);
    pb.set_style(style);
    pb
}

/// Decode a JSON body into `T`. Malformed JSON and missing fields are
/// `Decode` errors; fields of the wrong JSON type are `Type` errors.
pub(crate) fn decode_json<T: DeserializeOwned>(body: &[u8], what: &'static str) -> Result<T> {
    let value: serde_json::Value = serde_json::from_slice(body).map_err(|e| UpdateError::Decode {
        what,
        reason: e.to_string(),
    })?;

    serde_json::from_value(value).map_err(|e| {
        let reason = e.to_string();
        if reason.starts_with("missing field") {
            UpdateError::Decode { what, reason }
        } else {
            UpdateError::Type { what, reason }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::test_server::{http_response, serve_after, serve_once};
    use std::time::{Duration, Instant};

    fn assets(names: &[&str]) -> Vec<AssetDescriptor> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| AssetDescriptor {
                name: name.to_string(),
                download_url: format!("https://example.invalid/{}/{}", i, name),
            })
            .collect()
    }

    const LINUX_AMD64: Platform = Platform {
        os: "linux",
        arch: "amd64",
    };

    #[test]
    fn test_select_asset_for_platform() {
        let list = assets(&[
            "mwdl_linux_amd64.tar.gz",
            "mwdl_windows_amd64.zip",
            "mwdl_linux_arm64.tar.gz",
        ]);
        let selected = select_asset(&list, &LINUX_AMD64).unwrap();
        assert_eq!(selected.name, "mwdl_linux_amd64.tar.gz");
    }

    #[test]
    fn test_select_asset_last_match_wins() {
        let list = assets(&[
            "mwdl_linux_amd64.tar.gz",
            "mwdl_darwin_amd64.tar.gz",
            "mwdl_linux_amd64.tar.gz",
        ]);
        let selected = select_asset(&list, &LINUX_AMD64).unwrap();
        assert_eq!(selected.download_url, "https://example.invalid/2/mwdl_linux_amd64.tar.gz");
    }

    #[test]
    fn test_select_asset_none() {
        let list = assets(&["mwdl_windows_amd64.zip", "mwdl_linux_arm64.tar.gz"]);
        assert!(select_asset(&list, &LINUX_AMD64).is_none());
        assert!(select_asset(&[], &LINUX_AMD64).is_none());
    }

    #[test]
    fn test_decode_latest_release() {
        let release: LatestRelease =
            decode_json(br#"{"id": 12345, "tag_name": "v1.2.0", "draft": false}"#, "release")
                .unwrap();
        assert_eq!(release.id, 12345);
        assert_eq!(release.tag_name, "v1.2.0");
    }

    #[test]
    fn test_decode_invalid_json() {
        let err = decode_json::<LatestRelease>(b"<html>rate limited</html>", "release").unwrap_err();
        assert!(matches!(err, UpdateError::Decode { .. }));
    }

    #[test]
    fn test_decode_missing_field() {
        let err = decode_json::<LatestRelease>(br#"{"id": 1}"#, "release").unwrap_err();
        assert!(matches!(err, UpdateError::Decode { .. }));
    }

    #[test]
    fn test_decode_wrong_type() {
        let err =
            decode_json::<LatestRelease>(br#"{"id": "1", "tag_name": "v1"}"#, "release").unwrap_err();
        assert!(matches!(err, UpdateError::Type { .. }));
    }

    #[test]
    fn test_decode_asset_list() {
        let body = br#"[
            {"name": "mwdl_linux_amd64.tar.gz", "browser_download_url": "https://x/a", "size": 10},
            {"name": "mwdl_windows_amd64.zip", "browser_download_url": "https://x/b"}
        ]"#;
        let entries: Vec<AssetEntry> = decode_json(body, "assets").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].browser_download_url, "https://x/b");
    }

    fn http_config(api_base: String, timeout_secs: u64) -> UpdateConfig {
        UpdateConfig {
            api_base,
            timeout: Duration::from_secs(timeout_secs),
            ..UpdateConfig::default()
        }
    }

    #[test]
    fn test_latest_release_over_http() {
        let body = br#"{"id": 7, "tag_name": "v2.0.0", "name": "2.0"}"#;
        let base = serve_once(http_response("200 OK", body));
        let config = http_config(base, 5);

        let release = GithubFeed::new(&config, false)
            .unwrap()
            .latest_release()
            .unwrap();
        assert_eq!(
            release,
            Release {
                id: "7".into(),
                tag: "v2.0.0".into()
            }
        );
    }

    #[test]
    fn test_latest_release_not_found() {
        let base = serve_once(http_response("404 Not Found", b"{\"message\": \"Not Found\"}"));
        let config = http_config(base, 5);

        let err = GithubFeed::new(&config, false)
            .unwrap()
            .latest_release()
            .unwrap_err();
        assert!(matches!(err, UpdateError::Network { .. }));
    }

    #[test]
    fn test_stalled_server_times_out() {
        let body = br#"{"id": 7, "tag_name": "v2.0.0"}"#;
        let base = serve_after(http_response("200 OK", body), Duration::from_secs(4));
        let config = http_config(base, 1);

        let started = Instant::now();
        let err = GithubFeed::new(&config, false)
            .unwrap()
            .latest_release()
            .unwrap_err();
        assert!(matches!(err, UpdateError::Network { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_download_body() {
        let base = serve_once(http_response("200 OK", b"\x1f\x8b payload"));
        let config = http_config(base.clone(), 5);
        let asset = AssetDescriptor {
            name: "mwdl_linux_amd64.tar.gz".into(),
            download_url: format!("{}/download/mwdl_linux_amd64.tar.gz", base),
        };

        let artifact = GithubFeed::new(&config, false).unwrap().download(&asset).unwrap();
        assert_eq!(artifact.bytes, b"\x1f\x8b payload");
        assert_eq!(artifact.asset, asset);
    }

    #[test]
    fn test_download_bogus_content_length() {
        let mut response =
            b"HTTP/1.1 200 OK\r\nContent-Length: 9223372036854775000\r\nConnection: close\r\n\r\n"
                .to_vec();
        response.extend_from_slice(&[0x1f, 0x8b, 0, 0]);
        let base = serve_once(response);
        let config = http_config(base.clone(), 5);
        let asset = AssetDescriptor {
            name: "mwdl_linux_amd64.tar.gz".into(),
            download_url: format!("{}/asset", base),
        };

        let err = GithubFeed::new(&config, false)
            .unwrap()
            .download(&asset)
            .unwrap_err();
        assert!(matches!(err, UpdateError::Network { .. }));
    }

    #[test]
    fn test_current_platform_tokens() {
        let platform = Platform::current();
        assert!(!platform.os.is_empty());
        assert_ne!(platform.os, "macos");
        assert_ne!(platform.arch, "x86_64");
    }
}
