//! Fusionfetch CLI: download a FusionSolar plant report.
//!
//! ## Usage
//!
//! ```bash
//! USERNAME=operator PASSWORD=secret fusionfetch
//! fusionfetch --plant "Nautica Shopping Centre" --output data/nautica_raw.xlsx
//! fusionfetch --headed -v        # watch the browser, debug logging
//! ```
//!
//! Exit code 0 on success; 1 on any unrecovered error, with the error
//! kind and message on stderr. On failure a full-page screenshot is
//! left next to the working directory for diagnosis.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fusionfetch::{
    BrowserConfig, CdpDriver, Credentials, DownloadArtifact, FetchResult, Pacing,
    PortalDownloader, RunConfig, Timeouts,
};

#[derive(Parser, Debug)]
#[command(name = "fusionfetch", version, about = "Export a FusionSolar plant report to disk")]
struct Cli {
    /// Portal account identifier
    #[arg(long, env = "USERNAME", hide_env_values = true)]
    username: String,

    /// Portal account secret
    #[arg(long, env = "PASSWORD", hide_env_values = true)]
    password: String,

    /// Plant to locate and export
    #[arg(long, default_value = "Nautica Shopping Centre")]
    plant: String,

    /// Artifact destination (overwritten each run)
    #[arg(long, default_value = "data/nautica_raw.xlsx")]
    output: PathBuf,

    /// Diagnostic screenshot path (written only on failure)
    #[arg(long, default_value = "error_screenshot.png")]
    screenshot: PathBuf,

    /// Path to the chromium binary (auto-detected when omitted)
    #[arg(long)]
    chromium: Option<PathBuf>,

    /// Run with a visible browser window
    #[arg(long)]
    headed: bool,

    /// Disable randomized human-like pacing
    #[arg(long)]
    no_pacing: bool,

    /// Per-wait timeout in seconds (navigation, elements, download)
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn log_directive(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }

    fn run_config(&self) -> RunConfig {
        let timeouts = Timeouts {
            navigation_ms: self.timeout_secs * 1000,
            element_ms: self.timeout_secs * 1000,
            download_ms: self.timeout_secs * 1000,
            ..Timeouts::default()
        };
        let pacing = if self.no_pacing {
            Pacing::off()
        } else {
            Pacing::default()
        };
        RunConfig::default()
            .with_plant_name(&self.plant)
            .with_destination(&self.output)
            .with_failure_screenshot(&self.screenshot)
            .with_timeouts(timeouts)
            .with_pacing(pacing)
    }

    fn browser_config(&self) -> BrowserConfig {
        let mut config = BrowserConfig::default().with_headless(!self.headed);
        if let Some(ref path) = self.chromium {
            config = config.with_chromium_path(path);
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_directive())),
        )
        .with_target(false)
        .init();

    match run(&cli).await {
        Ok(artifact) => {
            info!(
                path = %artifact.path.display(),
                bytes = artifact.bytes,
                "report exported"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error [{}]: {err}", err.kind());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> FetchResult<DownloadArtifact> {
    let credentials = Credentials::new(cli.username.clone(), cli.password.clone())?;
    info!(user = %credentials.masked_username(), plant = %cli.plant, "starting export");

    let config = cli.run_config();
    let driver = CdpDriver::launch(
        &cli.browser_config(),
        config.timeouts.clone(),
        config.pacing.clone(),
    )
    .await?;

    PortalDownloader::new(driver, config).run(&credentials).await
}
