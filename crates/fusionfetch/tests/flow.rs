//! End-to-end flow tests against a scripted portal double.
//!
//! The double implements `PortalDriver` the way the real portal
//! behaves at the seam: it accepts one credential pair, knows one set
//! of plants, and either serves a fixed report payload or never fires
//! the download event.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use fusionfetch::{
    Credentials, FetchError, FetchResult, LocatorChain, PortalDownloader, PortalDriver, RunConfig,
    Selector, SurfaceResolution, Timeouts,
};

const REPORT_PAYLOAD: &[u8] = b"PK\x03\x04 fixed spreadsheet payload";

#[derive(Clone, Default)]
struct Probes {
    close_calls: Arc<AtomicU32>,
    dropped: Arc<AtomicBool>,
    log: Arc<Mutex<Vec<String>>>,
}

impl Probes {
    fn record(&self, event: impl Into<String>) {
        self.log.lock().unwrap().push(event.into());
    }

    fn position(&self, event: &str) -> Option<usize> {
        self.log.lock().unwrap().iter().position(|e| e == event)
    }
}

/// How the portal behaves right after login.
#[derive(Clone, Copy)]
enum SurfaceScript {
    /// A popup window carries the plant list
    PopupAppears,
    /// The login tab itself transitions to the plant list
    AlreadyOnList,
    /// Neither; the plant list must be navigated to directly
    NoPopup,
}

struct ScriptedPortal {
    valid_username: String,
    valid_password: String,
    plants: Vec<String>,
    payload: Vec<u8>,
    download_fires: bool,
    stall_on_settle: bool,
    stall_navigation: bool,
    surface_script: SurfaceScript,
    capture_dir: TempDir,
    filled_username: String,
    filled_password: String,
    login_submitted: bool,
    armed: bool,
    probes: Probes,
}

impl ScriptedPortal {
    fn new(probes: Probes) -> Self {
        Self {
            valid_username: "demo".to_string(),
            valid_password: "demo".to_string(),
            plants: vec!["Nautica Shopping Centre".to_string()],
            payload: REPORT_PAYLOAD.to_vec(),
            download_fires: true,
            stall_on_settle: false,
            stall_navigation: false,
            surface_script: SurfaceScript::AlreadyOnList,
            capture_dir: tempfile::tempdir().unwrap(),
            filled_username: String::new(),
            filled_password: String::new(),
            login_submitted: false,
            armed: false,
            probes,
        }
    }

    fn credentials_accepted(&self) -> bool {
        self.filled_username == self.valid_username && self.filled_password == self.valid_password
    }

    fn knows_plant(&self, chain: &LocatorChain) -> bool {
        chain.selectors().iter().any(|sel| match sel {
            Selector::Text(name) | Selector::Role { name, .. } => {
                self.plants.iter().any(|p| p == name || p.contains(name.as_str()))
            }
            _ => false,
        })
    }
}

impl Drop for ScriptedPortal {
    fn drop(&mut self) {
        self.probes.dropped.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PortalDriver for ScriptedPortal {
    async fn navigate(&mut self, url: &str) -> FetchResult<()> {
        self.probes.record(format!("navigate {url}"));
        Ok(())
    }

    async fn settle(&mut self) -> FetchResult<()> {
        if self.stall_on_settle {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.stall_navigation {
            // The bounded navigation wait elapsed without a load event.
            return Err(FetchError::NavigationTimeout {
                stage: "waiting for page load".to_string(),
                ms: 300,
            });
        }
        Ok(())
    }

    async fn fill(&mut self, chain: &LocatorChain, text: &str) -> FetchResult<()> {
        match chain.description() {
            "username field" => self.filled_username = text.to_string(),
            "password field" => self.filled_password = text.to_string(),
            _ => {}
        }
        self.probes.record(format!("fill {}", chain.description()));
        Ok(())
    }

    async fn click(&mut self, chain: &LocatorChain) -> FetchResult<()> {
        self.probes.record(format!("click {}", chain.description()));
        match chain.description() {
            "login button" => {
                self.login_submitted = true;
                Ok(())
            }
            desc if desc.starts_with("plant entry") => {
                if self.knows_plant(chain) {
                    Ok(())
                } else {
                    Err(FetchError::ElementNotFound {
                        locator: chain.to_string(),
                    })
                }
            }
            _ => Ok(()),
        }
    }

    async fn is_present(&mut self, chain: &LocatorChain) -> FetchResult<bool> {
        match chain.description() {
            // Still showing the login form means the portal bounced us.
            "username field" => Ok(self.login_submitted && !self.credentials_accepted()),
            desc if desc.starts_with("plant entry") => Ok(self.knows_plant(chain)),
            _ => Ok(true),
        }
    }

    async fn adopt_popup_or(
        &mut self,
        fallback_url: &str,
        _already_there: &LocatorChain,
    ) -> FetchResult<SurfaceResolution> {
        self.probes.record("resolve surface");
        match self.surface_script {
            SurfaceScript::PopupAppears => {
                self.probes.record("adopt popup");
                Ok(SurfaceResolution::Popup)
            }
            SurfaceScript::AlreadyOnList => Ok(SurfaceResolution::CurrentSurface),
            SurfaceScript::NoPopup => {
                self.probes.record(format!("navigate {fallback_url}"));
                Ok(SurfaceResolution::DirectNavigation)
            }
        }
    }

    async fn arm_download(&mut self) -> FetchResult<()> {
        self.armed = true;
        self.probes.record("arm download");
        Ok(())
    }

    async fn wait_download(&mut self) -> FetchResult<PathBuf> {
        if !self.armed {
            return Err(FetchError::Cdp {
                message: "download listener was not armed".to_string(),
            });
        }
        if self.download_fires {
            let capture = self.capture_dir.path().join("8f2c41d7-guid");
            std::fs::write(&capture, &self.payload)?;
            Ok(capture)
        } else {
            // The event never fires; the bounded wait elapses instead.
            tokio::time::sleep(Duration::from_millis(30)).await;
            Err(FetchError::DownloadTimeout { ms: 30 })
        }
    }

    async fn screenshot(&mut self) -> FetchResult<Vec<u8>> {
        Ok(b"\x89PNG fake full-page capture".to_vec())
    }

    async fn pause(&mut self) {}

    async fn close(&mut self) -> FetchResult<()> {
        self.probes.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn run_config(dir: &TempDir) -> RunConfig {
    RunConfig::default()
        .with_destination(dir.path().join("data/nautica_raw.xlsx"))
        .with_failure_screenshot(dir.path().join("error_screenshot.png"))
        .with_timeouts(Timeouts::default().scaled_down(100))
        .with_pacing(fusionfetch::Pacing::off())
}

#[tokio::test]
async fn successful_run_saves_exactly_one_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let probes = Probes::default();
    let portal = ScriptedPortal::new(probes.clone());
    let config = run_config(&dir);
    let destination = config.destination.clone();

    let credentials = Credentials::new("demo", "demo").unwrap();
    let artifact = PortalDownloader::new(portal, config)
        .run(&credentials)
        .await
        .unwrap();

    assert_eq!(artifact.path, destination);
    assert_eq!(artifact.bytes, REPORT_PAYLOAD.len() as u64);
    assert_eq!(std::fs::read(&destination).unwrap(), REPORT_PAYLOAD);
    // No diagnostic screenshot on success.
    assert!(!dir.path().join("error_screenshot.png").exists());
    assert_eq!(probes.close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn listener_is_armed_before_the_download_trigger() {
    let dir = tempfile::tempdir().unwrap();
    let probes = Probes::default();
    let portal = ScriptedPortal::new(probes.clone());

    let credentials = Credentials::new("demo", "demo").unwrap();
    PortalDownloader::new(portal, run_config(&dir))
        .run(&credentials)
        .await
        .unwrap();

    let armed_at = probes.position("arm download").unwrap();
    let triggered_at = probes.position("click download trigger").unwrap();
    assert!(
        armed_at < triggered_at,
        "download listener must be armed before the trigger is clicked"
    );
}

#[tokio::test]
async fn invalid_credentials_fail_authentication_with_zero_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let probes = Probes::default();
    let portal = ScriptedPortal::new(probes.clone());
    let config = run_config(&dir);
    let destination = config.destination.clone();

    let credentials = Credentials::new("demo", "not-the-password").unwrap();
    let err = PortalDownloader::new(portal, config)
        .run(&credentials)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "authentication");
    assert!(!destination.exists());
    // Exactly one diagnostic screenshot.
    assert!(dir.path().join("error_screenshot.png").exists());
    assert_eq!(probes.close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_plant_fails_target_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let probes = Probes::default();
    let portal = ScriptedPortal::new(probes.clone());
    let config = run_config(&dir).with_plant_name("Nonexistent Entity");
    let destination = config.destination.clone();

    let credentials = Credentials::new("demo", "demo").unwrap();
    let err = PortalDownloader::new(portal, config)
        .run(&credentials)
        .await
        .unwrap_err();

    match err {
        FetchError::TargetNotFound { name } => assert_eq!(name, "Nonexistent Entity"),
        other => panic!("expected TargetNotFound, got {other:?}"),
    }
    assert!(!destination.exists());
    assert_eq!(probes.close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_download_event_fails_bounded_not_hung() {
    let dir = tempfile::tempdir().unwrap();
    let probes = Probes::default();
    let mut portal = ScriptedPortal::new(probes.clone());
    portal.download_fires = false;
    let config = run_config(&dir);
    let destination = config.destination.clone();

    let credentials = Credentials::new("demo", "demo").unwrap();
    let run = PortalDownloader::new(portal, config).run(&credentials);
    // The whole run must terminate well inside the outer bound.
    let err = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run must not hang when the download event never fires")
        .unwrap_err();

    assert_eq!(err.kind(), "download-timeout");
    assert!(!destination.exists());
    assert_eq!(probes.close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn teardown_runs_when_the_flow_is_cancelled_mid_flight() {
    let dir = tempfile::tempdir().unwrap();
    let probes = Probes::default();
    let mut portal = ScriptedPortal::new(probes.clone());
    portal.stall_on_settle = true;

    let credentials = Credentials::new("demo", "demo").unwrap();
    let downloader = PortalDownloader::new(portal, run_config(&dir));
    let task = tokio::spawn(async move { downloader.run(&credentials).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    // Cancellation skips close(); the driver drop is the teardown path.
    assert!(probes.dropped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn popup_surface_is_adopted_when_one_appears() {
    let dir = tempfile::tempdir().unwrap();
    let probes = Probes::default();
    let mut portal = ScriptedPortal::new(probes.clone());
    portal.surface_script = SurfaceScript::PopupAppears;
    let config = run_config(&dir);
    let destination = config.destination.clone();

    let credentials = Credentials::new("demo", "demo").unwrap();
    PortalDownloader::new(portal, config)
        .run(&credentials)
        .await
        .unwrap();

    assert!(probes.position("adopt popup").is_some());
    assert_eq!(std::fs::read(&destination).unwrap(), REPORT_PAYLOAD);
}

#[tokio::test]
async fn missing_popup_falls_back_to_direct_navigation() {
    let dir = tempfile::tempdir().unwrap();
    let probes = Probes::default();
    let mut portal = ScriptedPortal::new(probes.clone());
    portal.surface_script = SurfaceScript::NoPopup;
    let config = run_config(&dir);
    let destination = config.destination.clone();
    let fallback = format!("navigate {}", config.plant_list_url);

    let credentials = Credentials::new("demo", "demo").unwrap();
    PortalDownloader::new(portal, config)
        .run(&credentials)
        .await
        .unwrap();

    // The plant-list URL was visited only after the popup window failed
    // to appear, and the run still completed.
    let resolved_at = probes.position("resolve surface").unwrap();
    let navigated_at = probes.position(&fallback).unwrap();
    assert!(resolved_at < navigated_at);
    assert_eq!(std::fs::read(&destination).unwrap(), REPORT_PAYLOAD);
}

#[tokio::test]
async fn stalled_navigation_fails_bounded_with_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    let probes = Probes::default();
    let mut portal = ScriptedPortal::new(probes.clone());
    portal.stall_navigation = true;
    let config = run_config(&dir);
    let destination = config.destination.clone();

    let credentials = Credentials::new("demo", "demo").unwrap();
    let err = PortalDownloader::new(portal, config)
        .run(&credentials)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "navigation-timeout");
    assert!(!destination.exists());
    assert!(dir.path().join("error_screenshot.png").exists());
    assert_eq!(probes.close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rerunning_overwrites_the_same_destination() {
    let dir = tempfile::tempdir().unwrap();
    let credentials = Credentials::new("demo", "demo").unwrap();

    let first = ScriptedPortal::new(Probes::default());
    PortalDownloader::new(first, run_config(&dir))
        .run(&credentials)
        .await
        .unwrap();

    let mut second = ScriptedPortal::new(Probes::default());
    second.payload = b"second run payload, different bytes".to_vec();
    let artifact = PortalDownloader::new(second, run_config(&dir))
        .run(&credentials)
        .await
        .unwrap();

    let data_dir = dir.path().join("data");
    assert_eq!(std::fs::read_dir(&data_dir).unwrap().count(), 1);
    assert_eq!(
        std::fs::read(data_dir.join("nautica_raw.xlsx")).unwrap(),
        b"second run payload, different bytes"
    );
    assert_eq!(artifact.bytes, 35);
}
