//! The end-to-end export flow.
//!
//! A strictly linear state machine: acquire session, authenticate,
//! resolve the navigation surface, locate the target plant, reach the
//! report screen, trigger the export, capture the download, persist
//! the artifact, close. The only branch is the popup-vs-same-page race
//! after login; every other failure transitions straight to teardown
//! with the triggering error.

use tracing::{error, info, warn};

use crate::artifact::{self, DownloadArtifact};
use crate::config::{Credentials, RunConfig};
use crate::driver::PortalDriver;
use crate::result::{FetchError, FetchResult};

/// States of one run, in order. Used for stage-tagged timeout errors
/// and progress logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Browser session started, login surface loading
    SessionAcquired,
    /// Credentials submitted and accepted
    Authenticated,
    /// Active surface settled (popup adopted or fallback navigation)
    SurfaceResolved,
    /// Target plant found and selected
    TargetLocated,
    /// Report management screen open
    ReportScreenReached,
    /// Export dialog open
    ExportTriggered,
    /// Download event observed and file captured
    DownloadCaptured,
    /// Artifact written to its destination
    ArtifactPersisted,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phrase = match self {
            Self::SessionAcquired => "acquiring session",
            Self::Authenticated => "authenticating",
            Self::SurfaceResolved => "resolving navigation surface",
            Self::TargetLocated => "locating target plant",
            Self::ReportScreenReached => "reaching report screen",
            Self::ExportTriggered => "triggering export",
            Self::DownloadCaptured => "capturing download",
            Self::ArtifactPersisted => "persisting artifact",
        };
        f.write_str(phrase)
    }
}

/// Locator chains for each UI step.
///
/// Priority order per chain: accessibility role first, then label or
/// attribute matching, then fixed ids and raw text. The fixed ids
/// (`#btn_outerverify`, `#pvmsReport`) are carried because some portal
/// builds expose nothing better.
pub mod steps {
    use crate::locator::{LocatorChain, Selector};

    /// Login username input
    #[must_use]
    pub fn username_field() -> LocatorChain {
        LocatorChain::new(
            "username field",
            vec![
                Selector::role("textbox", "Username or email"),
                Selector::label("Username"),
                Selector::css("#username"),
            ],
        )
    }

    /// Login password input
    #[must_use]
    pub fn password_field() -> LocatorChain {
        LocatorChain::new(
            "password field",
            vec![
                Selector::role("textbox", "Password"),
                Selector::css("input[type='password']"),
            ],
        )
    }

    /// Login submit control
    #[must_use]
    pub fn login_button() -> LocatorChain {
        LocatorChain::new(
            "login button",
            vec![
                Selector::css("#btn_outerverify"),
                Selector::role("button", "Log In"),
                Selector::text("Log In"),
            ],
        )
    }

    /// Plant search input on the list surface
    #[must_use]
    pub fn plant_search_input() -> LocatorChain {
        LocatorChain::new(
            "plant search input",
            vec![
                Selector::role("textbox", "Plant name"),
                Selector::label("Plant name"),
                Selector::css(".ant-input-search input"),
            ],
        )
    }

    /// Plant search submit control
    #[must_use]
    pub fn plant_search_submit() -> LocatorChain {
        LocatorChain::new(
            "plant search submit",
            vec![
                Selector::role("button", "Search"),
                Selector::css(".ant-input-search-button"),
                Selector::text("Search"),
            ],
        )
    }

    /// Result entry for the target plant. Falls back to the leading
    /// word of the name, since some builds truncate long plant names.
    #[must_use]
    pub fn plant_entry(name: &str) -> LocatorChain {
        let mut selectors = vec![Selector::role("link", name), Selector::text(name)];
        if let Some(token) = name.split_whitespace().next() {
            if token != name {
                selectors.push(Selector::text(token));
            }
        }
        LocatorChain::new(format!("plant entry {name:?}"), selectors)
    }

    /// Report-management navigation entry on the plant detail view
    #[must_use]
    pub fn report_management() -> LocatorChain {
        LocatorChain::new(
            "report management entry",
            vec![
                Selector::css("#pvmsReport"),
                Selector::role("link", "Report Management"),
                Selector::text("Report Management"),
            ],
        )
    }

    /// Export action on the report screen
    #[must_use]
    pub fn export_button() -> LocatorChain {
        LocatorChain::new(
            "export button",
            vec![Selector::role("button", "Export"), Selector::text("Export")],
        )
    }

    /// Download trigger inside the export dialog
    #[must_use]
    pub fn download_trigger() -> LocatorChain {
        LocatorChain::new(
            "download trigger",
            vec![
                Selector::attribute("title", "Download"),
                Selector::role("button", "Download"),
                Selector::text("Download"),
            ],
        )
    }

    /// Export dialog dismiss control (best-effort step)
    #[must_use]
    pub fn dialog_close() -> LocatorChain {
        LocatorChain::new(
            "export dialog close",
            vec![
                Selector::role("button", "Close"),
                Selector::css(".ant-modal-close"),
                Selector::text("Close"),
            ],
        )
    }
}

// A bounded element wait that ran out during a navigation step is a
// navigation timeout at that stage, not a generic lookup failure.
fn nav_timeout(stage: Stage, ms: u64) -> impl Fn(FetchError) -> FetchError {
    move |err| match err {
        FetchError::ElementNotFound { .. } => FetchError::NavigationTimeout {
            stage: stage.to_string(),
            ms,
        },
        other => other,
    }
}

// Missing login controls are an authentication failure per taxonomy.
fn auth_failure(err: FetchError) -> FetchError {
    match err {
        FetchError::ElementNotFound { locator } => FetchError::Authentication {
            message: format!("login control not found: {locator}"),
        },
        other => other,
    }
}

/// Drives one authenticate → locate → export → download run.
#[derive(Debug)]
pub struct PortalDownloader<D: PortalDriver> {
    driver: D,
    config: RunConfig,
}

impl<D: PortalDriver> PortalDownloader<D> {
    /// Build a downloader over an already-launched driver.
    pub fn new(driver: D, config: RunConfig) -> Self {
        Self { driver, config }
    }

    /// Execute the full flow.
    ///
    /// Exactly one artifact is produced on success. On failure a
    /// full-page screenshot is captured best-effort before the error
    /// is returned. The session is torn down on every exit path; if
    /// the future itself is cancelled, the driver's drop kills the
    /// browser child instead.
    pub async fn run(mut self, credentials: &Credentials) -> FetchResult<DownloadArtifact> {
        let outcome = self.execute(credentials).await;
        if let Err(ref err) = outcome {
            error!(kind = err.kind(), "run failed: {err}");
            self.capture_failure().await;
        }
        if let Err(close_err) = self.driver.close().await {
            warn!("session teardown reported an error: {close_err}");
        }
        outcome
    }

    async fn execute(&mut self, credentials: &Credentials) -> FetchResult<DownloadArtifact> {
        let ms = self.config.timeouts.element_ms;
        let login_url = self.config.login_url.clone();
        let plant_list_url = self.config.plant_list_url.clone();
        let plant = self.config.plant_name.clone();

        info!(url = %login_url, "navigating to the login surface");
        self.driver
            .navigate(&login_url)
            .await
            .map_err(nav_timeout(Stage::SessionAcquired, ms))?;
        self.driver.settle().await?;

        info!(user = %credentials.masked_username(), "authenticating");
        self.driver
            .fill(&steps::username_field(), credentials.username())
            .await
            .map_err(auth_failure)?;
        self.driver.pause().await;
        self.driver
            .fill(&steps::password_field(), credentials.password())
            .await
            .map_err(auth_failure)?;
        self.driver.pause().await;
        self.driver
            .click(&steps::login_button())
            .await
            .map_err(auth_failure)?;
        self.driver.settle().await?;
        if self.driver.is_present(&steps::username_field()).await? {
            return Err(FetchError::Authentication {
                message: "portal rejected the credentials (still on the login surface)"
                    .to_string(),
            });
        }
        info!(stage = %Stage::Authenticated, "login accepted");

        let resolution = self
            .driver
            .adopt_popup_or(&plant_list_url, &steps::plant_search_input())
            .await
            .map_err(nav_timeout(Stage::SurfaceResolved, ms))?;
        self.driver.settle().await?;
        info!(?resolution, stage = %Stage::SurfaceResolved, "navigation surface resolved");

        info!(plant = %plant, "searching for the target plant");
        self.driver
            .fill(&steps::plant_search_input(), &plant)
            .await
            .map_err(nav_timeout(Stage::TargetLocated, ms))?;
        self.driver
            .click(&steps::plant_search_submit())
            .await
            .map_err(nav_timeout(Stage::TargetLocated, ms))?;
        self.driver.settle().await?;

        let entry = steps::plant_entry(&plant);
        if !self.driver.is_present(&entry).await? {
            return Err(FetchError::TargetNotFound { name: plant });
        }
        // Multiple matches: the chain selects the first, by design.
        self.driver.click(&entry).await.map_err(|err| match err {
            FetchError::ElementNotFound { .. } => FetchError::TargetNotFound {
                name: plant.clone(),
            },
            other => other,
        })?;
        self.driver.settle().await?;
        info!(stage = %Stage::TargetLocated, "plant selected");

        self.driver
            .click(&steps::report_management())
            .await
            .map_err(nav_timeout(Stage::ReportScreenReached, ms))?;
        self.driver.settle().await?;
        info!(stage = %Stage::ReportScreenReached, "report screen open");

        self.driver
            .click(&steps::export_button())
            .await
            .map_err(nav_timeout(Stage::ExportTriggered, ms))?;
        self.driver.pause().await;
        info!(stage = %Stage::ExportTriggered, "export dialog open");

        // The listener must be armed before the trigger is clicked; a
        // download event fired into an unarmed session is lost and the
        // run would only end via the bounded timeout.
        self.driver.arm_download().await?;
        self.driver
            .click(&steps::download_trigger())
            .await
            .map_err(nav_timeout(Stage::DownloadCaptured, ms))?;
        let captured = self.driver.wait_download().await?;
        info!(stage = %Stage::DownloadCaptured, capture = %captured.display(), "download captured");

        let artifact = artifact::persist(&captured, &self.config.destination)?;
        info!(
            stage = %Stage::ArtifactPersisted,
            path = %artifact.path.display(),
            bytes = artifact.bytes,
            "artifact persisted"
        );

        // Best-effort: a stuck dialog does not invalidate the export.
        if let Err(err) = self.driver.click(&steps::dialog_close()).await {
            warn!("could not close the export dialog: {err}");
        }

        Ok(artifact)
    }

    async fn capture_failure(&mut self) {
        match self.driver.screenshot().await {
            Ok(png) if !png.is_empty() => {
                let path = self.config.failure_screenshot.clone();
                match std::fs::write(&path, &png) {
                    Ok(()) => info!(path = %path.display(), "diagnostic screenshot saved"),
                    Err(err) => warn!("could not save diagnostic screenshot: {err}"),
                }
            }
            Ok(_) => warn!("diagnostic screenshot came back empty"),
            Err(err) => warn!("could not capture diagnostic screenshot: {err}"),
        }
    }
}
