pub mod archive;
pub mod error;
pub mod github;
pub mod installer;
#[cfg(test)]
mod test_server;
pub mod verify;
pub mod version;

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::UpdateConfig;
pub use error::{StageFailure, UpdateError, UpdateState};
pub use github::{AssetDescriptor, GithubFeed, Platform, Release, ReleaseFeed};
pub use verify::{
    Attestation, AttestationSource, HttpAttestationSource, IntegrityVerifier, StaticAttestation,
};
pub use version::CURRENT_VERSION;

/// Per-run knobs that are not part of the static configuration
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Executable to replace
    pub target: PathBuf,
    /// Version the running binary reports
    pub current_version: String,
    /// Install even when the latest release is not newer
    pub force: bool,
}

/// How a successful run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    UpToDate { tag: String },
    Updated { tag: String, asset: String, digest: String },
}

/// Drives one update attempt through its stages, strictly in order
pub struct Pipeline<'a, F, A> {
    config: &'a UpdateConfig,
    feed: &'a F,
    attestations: &'a A,
    platform: Platform,
    state: UpdateState,
}

impl<'a, F: ReleaseFeed, A: AttestationSource> Pipeline<'a, F, A> {
    pub fn new(config: &'a UpdateConfig, feed: &'a F, attestations: &'a A) -> Self {
        Self {
            config,
            feed,
            attestations,
            platform: Platform::current(),
            state: UpdateState::Idle,
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// Run every stage. The first failing stage ends the run; nothing after
    /// it executes and the target is only touched by the final stage.
    pub fn run(&mut self, options: &UpdateOptions) -> Result<Outcome, StageFailure> {
        match self.run_stages(options) {
            Ok(outcome) => {
                self.enter(UpdateState::Done);
                Ok(outcome)
            }
            Err(error) => {
                let stage = self.state;
                self.enter(UpdateState::Failed);
                Err(StageFailure { stage, error })
            }
        }
    }

    fn enter(&mut self, next: UpdateState) {
        debug!(from = %self.state, to = %next, "update stage");
        self.state = next;
    }

    fn run_stages(&mut self, options: &UpdateOptions) -> error::Result<Outcome> {
        self.enter(UpdateState::ResolvingRelease);
        let release = self.feed.latest_release()?;
        info!(id = %release.id, tag = %release.tag, "latest release");

        if !options.force && !version::is_newer(&release.tag, &options.current_version)? {
            return Ok(Outcome::UpToDate { tag: release.tag });
        }

        self.enter(UpdateState::LocatingAsset);
        let assets = self.feed.list_assets(&release)?;
        let asset = github::select_asset(&assets, &self.platform)
            .cloned()
            .ok_or_else(|| UpdateError::AssetNotFound {
                os: self.platform.os.to_string(),
                arch: self.platform.arch.to_string(),
            })?;
        info!(asset = %asset.name, "selected asset");

        self.enter(UpdateState::Downloading);
        let artifact = self.feed.download(&asset)?;

        self.enter(UpdateState::Extracting);
        let binary = archive::extract(artifact, self.config)?;

        self.enter(UpdateState::Verifying);
        let verifier = IntegrityVerifier::from_config(self.config)?;
        let attestation = self.attestations.attestation(&release, &asset)?;
        let verified = verifier.verify(binary, &attestation)?;

        self.enter(UpdateState::Applying);
        installer::replace_binary(&verified, &options.target)?;

        Ok(Outcome::Updated {
            tag: release.tag,
            asset: asset.name,
            digest: hex::encode(verified.result().digest),
        })
    }
}

/// Check for updates and return release info if available
pub fn check_for_update(feed: &impl ReleaseFeed, current: &str) -> Result<Option<Release>> {
    let release = feed.latest_release()?;
    if version::is_newer(&release.tag, current)? {
        Ok(Some(release))
    } else {
        Ok(None)
    }
}

/// Perform the update process against the configured GitHub feed
pub fn perform_update(
    config: &UpdateConfig,
    attestation: Option<Attestation>,
    force: bool,
    show_progress: bool,
) -> Result<()> {
    let target = std::env::current_exe().context("Failed to get current executable path")?;
    let feed = GithubFeed::new(config, show_progress)?;

    println!("{}", "Checking for updates...".cyan());

    let options = UpdateOptions {
        target,
        current_version: CURRENT_VERSION.to_string(),
        force,
    };

    let outcome = match attestation {
        Some(attestation) => run_pipeline(config, &feed, &StaticAttestation(attestation), &options)?,
        None => {
            let source = HttpAttestationSource::new(config)?;
            run_pipeline(config, &feed, &source, &options)?
        }
    };

    match outcome {
        Outcome::UpToDate { tag } => println!(
            "{} You're running the latest version ({}, latest release {})",
            "✓".green(),
            CURRENT_VERSION,
            tag.dimmed()
        ),
        Outcome::Updated { tag, asset, digest } => {
            println!("  {} {}", "asset".dimmed(), asset);
            println!("  {} {}", "sha256".dimmed(), digest);
            println!(
                "\n{} Updated {} to version {}",
                "✓".green(),
                options.target.display(),
                tag.green()
            );
        }
    }

    Ok(())
}

fn run_pipeline<F: ReleaseFeed, A: AttestationSource>(
    config: &UpdateConfig,
    feed: &F,
    attestations: &A,
    options: &UpdateOptions,
) -> Result<Outcome> {
    let mut pipeline = Pipeline::new(config, feed, attestations);
    let outcome = pipeline.run(options)?;
    Ok(outcome)
}
