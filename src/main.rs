use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mwdl::update::{self, Attestation};
use mwdl::UpdateConfig;

#[derive(Parser, Debug)]
#[command(name = "mwdl")]
#[command(about = "Keep mwdl up to date from its signed GitHub releases", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Show debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check for updates and optionally self-update
    Update {
        /// Only check for updates without installing
        #[arg(long)]
        check: bool,

        /// Reinstall even if the latest release is not newer
        #[arg(long)]
        force: bool,

        /// Expected SHA-256 of the new binary (hex)
        #[arg(long, requires = "signature")]
        checksum: Option<String>,

        /// DER-encoded ECDSA signature over the checksum (hex)
        #[arg(long, requires = "checksum")]
        signature: Option<String>,

        /// Do not draw a download progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Print the running version
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Update {
            check,
            force,
            checksum,
            signature,
            no_progress,
        } => run_update_command(check, force, checksum, signature, !no_progress),
        Command::Version => {
            println!("mwdl {}", update::CURRENT_VERSION);
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "mwdl=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run_update_command(
    check_only: bool,
    force: bool,
    checksum: Option<String>,
    signature: Option<String>,
    show_progress: bool,
) -> Result<()> {
    use colored::Colorize;

    let config = UpdateConfig::load()?;

    if check_only {
        let feed = update::GithubFeed::new(&config, false)?;
        match update::check_for_update(&feed, update::CURRENT_VERSION)? {
            Some(release) => {
                println!(
                    "{} New version available: {} → {}",
                    "↑".yellow(),
                    update::CURRENT_VERSION.dimmed(),
                    release.tag.green()
                );
                println!("  Run `mwdl update` to install");
            }
            None => {
                println!(
                    "{} You're running the latest version ({})",
                    "✓".green(),
                    update::CURRENT_VERSION
                );
            }
        }
        return Ok(());
    }

    let attestation = match (checksum, signature) {
        (Some(checksum), Some(signature)) => Some(
            Attestation::from_hex(&checksum, &signature)
                .context("Invalid --checksum/--signature")?,
        ),
        _ => None,
    };

    update::perform_update(&config, attestation, force, show_progress)
}
