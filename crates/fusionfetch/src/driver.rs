//! Seam between the flow and the browser.
//!
//! The flow is written against [`PortalDriver`] so the whole state
//! machine can be exercised against a scripted portal double, the same
//! way it runs against real chromium. [`CdpDriver`] is the production
//! implementation.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::browser::{Browser, BrowserConfig, DownloadWaiter, Surface};
use crate::config::{Pacing, Timeouts};
use crate::locator::LocatorChain;
use crate::result::{FetchError, FetchResult};

/// How the post-login navigation surface was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceResolution {
    /// A popup surface appeared and was adopted
    Popup,
    /// The current surface had already transitioned to the plant list
    CurrentSurface,
    /// No popup appeared; the known list URL was navigated directly
    DirectNavigation,
}

/// Browser operations the flow needs, at UI-step altitude.
///
/// Exactly one surface is active at a time; `adopt_popup_or` may swap
/// it, after which all later calls run against the adopted surface.
#[async_trait]
pub trait PortalDriver: Send {
    /// Navigate the active surface
    async fn navigate(&mut self, url: &str) -> FetchResult<()>;

    /// Wait for the network to settle plus the fixed settling delay
    async fn settle(&mut self) -> FetchResult<()>;

    /// Focus the control matched by `chain` and type `text`
    async fn fill(&mut self, chain: &LocatorChain, text: &str) -> FetchResult<()>;

    /// Click the element matched by `chain`, waiting for it first
    async fn click(&mut self, chain: &LocatorChain) -> FetchResult<()>;

    /// Single non-waiting presence probe
    async fn is_present(&mut self, chain: &LocatorChain) -> FetchResult<bool>;

    /// Resolve the navigation surface: adopt a popup if one appears
    /// within the race window, otherwise fall back to `fallback_url`
    /// (or stay put if `already_there` probes true).
    async fn adopt_popup_or(
        &mut self,
        fallback_url: &str,
        already_there: &LocatorChain,
    ) -> FetchResult<SurfaceResolution>;

    /// Subscribe to download events. Must be called before the click
    /// that triggers the download.
    async fn arm_download(&mut self) -> FetchResult<()>;

    /// Await the armed download's completion; returns the captured file
    async fn wait_download(&mut self) -> FetchResult<PathBuf>;

    /// Full-page screenshot of the active surface
    async fn screenshot(&mut self) -> FetchResult<Vec<u8>>;

    /// Pause inside the humanized delay band
    async fn pause(&mut self);

    /// Deterministic session teardown
    async fn close(&mut self) -> FetchResult<()>;
}

/// Production driver backed by a chromiumoxide session.
#[derive(Debug)]
pub struct CdpDriver {
    browser: Browser,
    surface: Surface,
    waiter: Option<DownloadWaiter>,
    timeouts: Timeouts,
    pacing: Pacing,
}

impl CdpDriver {
    /// Launch chromium and open the initial surface.
    pub async fn launch(
        config: &BrowserConfig,
        timeouts: Timeouts,
        pacing: Pacing,
    ) -> FetchResult<Self> {
        let mut browser = Browser::launch(config).await?;
        let surface = browser.new_surface().await?;
        Ok(Self {
            browser,
            surface,
            waiter: None,
            timeouts,
            pacing,
        })
    }
}

#[async_trait]
impl PortalDriver for CdpDriver {
    async fn navigate(&mut self, url: &str) -> FetchResult<()> {
        self.surface.goto(url).await
    }

    async fn settle(&mut self) -> FetchResult<()> {
        self.surface
            .settle(self.timeouts.navigation(), self.timeouts.settle())
            .await?;
        self.surface.attention_drift().await;
        Ok(())
    }

    async fn fill(&mut self, chain: &LocatorChain, text: &str) -> FetchResult<()> {
        self.surface
            .fill(
                chain,
                text,
                self.timeouts.element(),
                self.timeouts.poll_interval(),
                &self.pacing,
            )
            .await
    }

    async fn click(&mut self, chain: &LocatorChain) -> FetchResult<()> {
        self.surface
            .click(chain, self.timeouts.element(), self.timeouts.poll_interval())
            .await
    }

    async fn is_present(&mut self, chain: &LocatorChain) -> FetchResult<bool> {
        self.surface.is_present(chain).await
    }

    async fn adopt_popup_or(
        &mut self,
        fallback_url: &str,
        already_there: &LocatorChain,
    ) -> FetchResult<SurfaceResolution> {
        let adopted = self
            .browser
            .adopt_popup(self.timeouts.popup(), self.timeouts.poll_interval())
            .await?;
        if let Some(surface) = adopted {
            self.surface = surface;
            return Ok(SurfaceResolution::Popup);
        }
        if self.surface.is_present(already_there).await? {
            debug!("no popup; current surface already shows the plant list");
            return Ok(SurfaceResolution::CurrentSurface);
        }
        debug!(url = %fallback_url, "no popup; navigating to the plant list directly");
        self.surface.goto(fallback_url).await?;
        Ok(SurfaceResolution::DirectNavigation)
    }

    async fn arm_download(&mut self) -> FetchResult<()> {
        // Listen at browser level: download routing is browser-wide,
        // so the progress events carry no page session.
        self.waiter = Some(self.browser.arm_download().await?);
        Ok(())
    }

    async fn wait_download(&mut self) -> FetchResult<PathBuf> {
        let waiter = self.waiter.take().ok_or_else(|| FetchError::Cdp {
            message: "download listener was not armed before the trigger".to_string(),
        })?;
        waiter.wait(self.timeouts.download()).await
    }

    async fn screenshot(&mut self) -> FetchResult<Vec<u8>> {
        let url = self.surface.url().await;
        debug!(url = %url, "capturing surface diagnostics");
        self.surface.screenshot().await
    }

    async fn pause(&mut self) {
        tokio::time::sleep(self.pacing.step_delay()).await;
    }

    async fn close(&mut self) -> FetchResult<()> {
        self.browser.close().await
    }
}
