//! Chromium session control over CDP.
//!
//! Wraps chromiumoxide with the pieces one portal run needs: an
//! isolated profile per launch, a stealth init script, locator-chain
//! waits, per-character typing, popup adoption, download capture and
//! full-page screenshots.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    DownloadProgressState, EventDownloadProgress, SetDownloadBehaviorBehavior,
    SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat,
};
use chromiumoxide::cdp::browser_protocol::target::TargetId;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::{Stream, StreamExt};
use tempfile::TempDir;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace, warn};

use crate::config::Pacing;
use crate::locator::LocatorChain;
use crate::result::{FetchError, FetchResult};
use crate::wait::poll_until;

const STEALTH_INIT_SCRIPT: &str =
    "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

fn cdp_err(e: impl ToString) -> FetchError {
    FetchError::Cdp {
        message: e.to_string(),
    }
}

/// Browser launch configuration
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Run in headless mode
    pub headless: bool,
    /// Viewport width
    pub viewport_width: u32,
    /// Viewport height
    pub viewport_height: u32,
    /// Path to the chromium binary (None = auto-detect)
    pub chromium_path: Option<PathBuf>,
    /// User agent string presented to the portal
    pub user_agent: String,
    /// Sandbox mode (disable in containers)
    pub sandbox: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1920,
            viewport_height: 1080,
            chromium_path: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            sandbox: false,
        }
    }
}

impl BrowserConfig {
    /// Set headless mode
    #[must_use]
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set viewport dimensions
    #[must_use]
    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport_width = width;
        self.viewport_height = height;
        self
    }

    /// Set the chromium binary path
    #[must_use]
    pub fn with_chromium_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.chromium_path = Some(path.into());
        self
    }

    /// Set the user agent
    #[must_use]
    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = ua.into();
        self
    }

    /// Enable the chromium sandbox
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: bool) -> Self {
        self.sandbox = sandbox;
        self
    }
}

/// One isolated browser session.
///
/// Each launch gets a fresh temp profile, so no cookies or storage
/// survive across runs. Downloads are routed into a session-private
/// temp directory and named by their CDP guid. Dropping the session
/// kills the chromium child via the chromiumoxide handler, which is
/// what guarantees teardown when the run future is cancelled.
pub struct Browser {
    inner: CdpBrowser,
    handler_task: tokio::task::JoinHandle<()>,
    // Every target this session has already seen, starting with the
    // tab chromium opens at launch. A popup is a target outside this
    // set; matching against the current surface alone would adopt the
    // launch tab.
    known_targets: Vec<TargetId>,
    // Held for their Drop impls: chromium writes into both until exit.
    _profile_dir: TempDir,
    download_dir: TempDir,
}

impl Browser {
    /// Launch chromium with a fresh profile and download routing armed.
    pub async fn launch(config: &BrowserConfig) -> FetchResult<Self> {
        let launch_err = |e: &dyn ToString| FetchError::BrowserLaunch {
            message: e.to_string(),
        };

        let profile_dir = tempfile::tempdir()?;
        let download_dir = tempfile::tempdir()?;

        let mut builder = CdpConfig::builder()
            .window_size(config.viewport_width, config.viewport_height)
            .viewport(Viewport {
                width: config.viewport_width,
                height: config.viewport_height,
                device_scale_factor: Some(1.0),
                ..Viewport::default()
            })
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg(format!("--user-agent={}", config.user_agent))
            .user_data_dir(profile_dir.path());

        if !config.sandbox {
            builder = builder.no_sandbox();
        }

        if config.headless {
            // New headless mode; .with_head() stops chromiumoxide from
            // adding the legacy --headless flag on its own.
            builder = builder.with_head().arg("--headless=new");
        } else {
            builder = builder.with_head();
        }

        if let Some(ref path) = config.chromium_path {
            builder = builder.chrome_executable(path);
        }

        let cdp_config = builder.build().map_err(|e| launch_err(&e))?;

        let (browser, mut handler) = CdpBrowser::launch(cdp_config)
            .await
            .map_err(|e| launch_err(&e))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let mut session = Self {
            inner: browser,
            handler_task,
            known_targets: Vec::new(),
            _profile_dir: profile_dir,
            download_dir,
        };
        session.arm_download_behavior().await?;
        // Snapshot the targets chromium opened on its own, launch tab
        // included, so the popup race never adopts one of them.
        for page in session.inner.pages().await.map_err(cdp_err)? {
            session.known_targets.push(page.target_id().clone());
        }
        Ok(session)
    }

    // Route downloads into the session temp dir, named by guid, with
    // progress events enabled so a completion can be observed.
    async fn arm_download_behavior(&self) -> FetchResult<()> {
        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::AllowAndName)
            .download_path(self.download_dir.path().to_string_lossy().to_string())
            .events_enabled(true)
            .build()
            .map_err(cdp_err)?;
        self.inner.execute(params).await.map_err(cdp_err)?;
        Ok(())
    }

    /// Open a new surface with the stealth init script installed.
    pub async fn new_surface(&mut self) -> FetchResult<Surface> {
        let page = self
            .inner
            .new_page("about:blank")
            .await
            .map_err(cdp_err)?;
        self.known_targets.push(page.target_id().clone());
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
            STEALTH_INIT_SCRIPT.to_string(),
        ))
        .await
        .map_err(cdp_err)?;
        Ok(Surface::new(page))
    }

    /// Race a popup surface against the clock: if a target this session
    /// has never seen appears within `timeout`, adopt it; otherwise
    /// report that navigation stayed on the current surface.
    pub async fn adopt_popup(
        &mut self,
        timeout: Duration,
        interval: Duration,
    ) -> FetchResult<Option<Surface>> {
        let deadline = Instant::now() + timeout;
        loop {
            let pages = self.inner.pages().await.map_err(cdp_err)?;
            if let Some(page) = pages
                .into_iter()
                .find(|p| !self.known_targets.contains(p.target_id()))
            {
                debug!("adopting popup surface {:?}", page.target_id());
                self.known_targets.push(page.target_id().clone());
                return Ok(Some(Surface::new(page)));
            }
            if Instant::now() + interval > deadline {
                return Ok(None);
            }
            sleep(interval).await;
        }
    }

    /// Arm the download listener. Must happen before the trigger is
    /// clicked; the returned waiter then owns the event stream.
    ///
    /// Download routing is configured browser-wide, so the progress
    /// events arrive without a page session and only a browser-level
    /// listener receives them.
    pub async fn arm_download(&self) -> FetchResult<DownloadWaiter> {
        let events = self
            .inner
            .event_listener::<EventDownloadProgress>()
            .await
            .map_err(cdp_err)?;
        Ok(DownloadWaiter {
            events: Box::pin(events),
            download_dir: self.download_dir.path().to_path_buf(),
        })
    }

    /// Deterministic teardown. Closing twice is harmless; dropping
    /// without closing still kills the child process.
    pub async fn close(&mut self) -> FetchResult<()> {
        self.inner.close().await.map_err(cdp_err)?;
        if let Err(e) = self.inner.wait().await {
            warn!("browser did not exit cleanly: {e}");
        }
        self.handler_task.abort();
        Ok(())
    }
}

impl std::fmt::Debug for Browser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Browser")
            .field("download_dir", &self.download_dir.path())
            .finish_non_exhaustive()
    }
}

/// An armed download listener.
///
/// Created strictly before the UI action that triggers the download;
/// an event fired before arming would otherwise be missed and the run
/// would only terminate via the bounded timeout.
pub struct DownloadWaiter {
    events: Pin<Box<dyn Stream<Item = Arc<EventDownloadProgress>> + Send>>,
    download_dir: PathBuf,
}

impl DownloadWaiter {
    /// Await the first completed download, bounded by `timeout`.
    pub async fn wait(mut self, timeout: Duration) -> FetchResult<PathBuf> {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let completed = tokio::time::timeout(timeout, async {
            while let Some(event) = self.events.next().await {
                trace!(
                    guid = %event.guid,
                    received = event.received_bytes,
                    total = event.total_bytes,
                    "download progress"
                );
                match event.state {
                    DownloadProgressState::Completed => {
                        return Ok(self.download_dir.join(&event.guid));
                    }
                    DownloadProgressState::Canceled => {
                        return Err(cdp_err("download was canceled by the portal"));
                    }
                    DownloadProgressState::InProgress => {}
                }
            }
            Err(cdp_err("download event stream ended unexpectedly"))
        })
        .await;

        match completed {
            Ok(result) => result,
            Err(_elapsed) => Err(FetchError::DownloadTimeout { ms }),
        }
    }
}

impl std::fmt::Debug for DownloadWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadWaiter")
            .field("download_dir", &self.download_dir)
            .finish_non_exhaustive()
    }
}

/// The active browser tab/window all flow steps run against.
#[derive(Debug)]
pub struct Surface {
    page: Page,
}

impl Surface {
    fn new(page: Page) -> Self {
        Self { page }
    }

    /// Navigate and wait for the load to complete.
    pub async fn goto(&self, url: &str) -> FetchResult<()> {
        self.page.goto(url).await.map_err(cdp_err)?;
        Ok(())
    }

    /// Current URL, for diagnostics
    pub async fn url(&self) -> String {
        match self.page.url().await {
            Ok(Some(url)) => url,
            _ => String::from("unknown"),
        }
    }

    /// Wait for any pending navigation to finish, bounded by
    /// `navigation`, then apply the fixed settling delay. The portal's
    /// post-login redirect timing is not deterministic, so both are
    /// required.
    pub async fn settle(&self, navigation: Duration, delay: Duration) -> FetchResult<()> {
        match tokio::time::timeout(navigation, self.page.wait_for_navigation()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!("no pending navigation to settle: {e}"),
            Err(_elapsed) => {
                return Err(FetchError::NavigationTimeout {
                    stage: "waiting for page load".to_string(),
                    ms: u64::try_from(navigation.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }
        sleep(delay).await;
        Ok(())
    }

    /// Poll a locator chain until any selector matches, bounded.
    pub async fn wait_for(
        &self,
        chain: &LocatorChain,
        timeout: Duration,
        interval: Duration,
    ) -> FetchResult<()> {
        let found = poll_until(timeout, interval, || async {
            self.probe(chain).await.unwrap_or(false)
        })
        .await;
        if found {
            Ok(())
        } else {
            Err(FetchError::ElementNotFound {
                locator: chain.to_string(),
            })
        }
    }

    /// Single non-waiting probe of a locator chain.
    pub async fn is_present(&self, chain: &LocatorChain) -> FetchResult<bool> {
        self.probe(chain).await
    }

    async fn probe(&self, chain: &LocatorChain) -> FetchResult<bool> {
        for selector in chain.selectors() {
            if self.eval_bool(selector.to_exists_js()).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Wait for the chain, then click the first selector that matches.
    pub async fn click(
        &self,
        chain: &LocatorChain,
        timeout: Duration,
        interval: Duration,
    ) -> FetchResult<()> {
        self.wait_for(chain, timeout, interval).await?;
        for selector in chain.selectors() {
            if self.eval_bool(selector.to_click_js()).await? {
                trace!("clicked {selector}");
                return Ok(());
            }
        }
        // Matched during the wait but gone by the time we clicked.
        Err(FetchError::ElementNotFound {
            locator: chain.to_string(),
        })
    }

    /// Wait for the chain, focus the matching control, and type `text`
    /// one character at a time with humanized keystroke delays.
    pub async fn fill(
        &self,
        chain: &LocatorChain,
        text: &str,
        timeout: Duration,
        interval: Duration,
        pacing: &Pacing,
    ) -> FetchResult<()> {
        self.wait_for(chain, timeout, interval).await?;
        let mut focused = false;
        for selector in chain.selectors() {
            if self.eval_bool(selector.to_focus_js()).await? {
                focused = true;
                break;
            }
        }
        if !focused {
            return Err(FetchError::ElementNotFound {
                locator: chain.to_string(),
            });
        }
        self.type_text(text, pacing).await
    }

    // CDP key events reach the focused element the way a keyboard
    // would, which also fires the portal's input listeners.
    async fn type_text(&self, text: &str, pacing: &Pacing) -> FetchResult<()> {
        for ch in text.chars() {
            let down = DispatchKeyEventParams::builder()
                .r#type(DispatchKeyEventType::KeyDown)
                .key(ch.to_string())
                .text(ch.to_string())
                .build()
                .map_err(cdp_err)?;
            self.page.execute(down).await.map_err(cdp_err)?;

            let up = DispatchKeyEventParams::builder()
                .r#type(DispatchKeyEventType::KeyUp)
                .key(ch.to_string())
                .build()
                .map_err(cdp_err)?;
            self.page.execute(up).await.map_err(cdp_err)?;

            sleep(pacing.keystroke_delay()).await;
        }
        Ok(())
    }

    /// Light attention drift: touch a few random points so the session
    /// does not sit perfectly still between steps. Best-effort.
    pub async fn attention_drift(&self) {
        let points: Vec<(u32, u32)> = {
            let mut rng = rand::rng();
            use rand::distr::{Distribution, Uniform};
            let (Ok(xs), Ok(ys)) = (Uniform::new(100u32, 1800), Uniform::new(100u32, 950)) else {
                return;
            };
            (0..3).map(|_| (xs.sample(&mut rng), ys.sample(&mut rng))).collect()
        };
        for (x, y) in points {
            let _ = self
                .page
                .evaluate(format!("document.elementFromPoint({x}, {y})?.tagName"))
                .await;
            sleep(Duration::from_millis(80)).await;
        }
    }

    /// Full-page PNG screenshot for failure diagnostics.
    pub async fn screenshot(&self) -> FetchResult<Vec<u8>> {
        self.page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(true)
                    .build(),
            )
            .await
            .map_err(cdp_err)
    }

    async fn eval_bool(&self, js: String) -> FetchResult<bool> {
        let result = self.page.evaluate(js).await.map_err(cdp_err)?;
        Ok(result.into_value::<bool>().unwrap_or(false))
    }
}
