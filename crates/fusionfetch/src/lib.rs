//! Fusionfetch: headless export of FusionSolar plant reports.
//!
//! Drives an isolated chromium session through the vendor portal --
//! authenticate, locate the target plant, open report management,
//! trigger the export, capture the download -- and persists exactly
//! one artifact at a deterministic path. A failed run leaves zero
//! artifacts, at most one diagnostic screenshot, and a stage-tagged
//! error.
//!
//! # Flow
//!
//! ```text
//! Start -> SessionAcquired -> Authenticated -> SurfaceResolved
//!       -> TargetLocated -> ReportScreenReached -> ExportTriggered
//!       -> DownloadCaptured -> ArtifactPersisted -> Closed
//! ```
//!
//! Every wait on the portal is bounded; the session is torn down on
//! all exit paths, cancellation included.
//!
//! # Example
//!
//! ```no_run
//! use fusionfetch::{
//!     BrowserConfig, CdpDriver, Credentials, PortalDownloader, RunConfig,
//! };
//!
//! # async fn demo() -> fusionfetch::FetchResult<()> {
//! let credentials = Credentials::new("demo", "demo")?;
//! let config = RunConfig::default();
//! let driver = CdpDriver::launch(
//!     &BrowserConfig::default(),
//!     config.timeouts.clone(),
//!     config.pacing.clone(),
//! )
//! .await?;
//! let artifact = PortalDownloader::new(driver, config).run(&credentials).await?;
//! println!("saved {} ({} bytes)", artifact.path.display(), artifact.bytes);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod artifact;
mod browser;
pub mod config;
mod driver;
pub mod flow;
pub mod locator;
mod result;
mod wait;

pub use artifact::DownloadArtifact;
pub use browser::{Browser, BrowserConfig, DownloadWaiter, Surface};
pub use config::{Credentials, Pacing, RunConfig, Timeouts};
pub use driver::{CdpDriver, PortalDriver, SurfaceResolution};
pub use flow::{PortalDownloader, Stage};
pub use locator::{LocatorChain, Selector};
pub use result::{FetchError, FetchResult};
