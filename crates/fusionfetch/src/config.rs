//! Run configuration: credentials, portal endpoints, timeouts, pacing.
//!
//! The library never reads environment variables itself; the CLI (or
//! another embedder) resolves them and hands over explicit values.

use std::path::PathBuf;
use std::time::Duration;

use rand::distr::{Distribution, Uniform};

use crate::result::{FetchError, FetchResult};

/// Default portal login surface
pub const DEFAULT_LOGIN_URL: &str =
    "https://intl.fusionsolar.huawei.com/pvmswebsite/login/build/index.html";

/// Plant list used as a direct-navigation fallback when no popup
/// surface appears after login
pub const DEFAULT_PLANT_LIST_URL: &str =
    "https://intl.fusionsolar.huawei.com/pvmswebsite/assets/build/index.html#/view/station/station-management";

/// Default target plant
pub const DEFAULT_PLANT_NAME: &str = "Nautica Shopping Centre";

/// Default artifact destination, relative to the working directory
pub const DEFAULT_DESTINATION: &str = "data/nautica_raw.xlsx";

/// Default diagnostic screenshot path, written only on failure
pub const DEFAULT_FAILURE_SCREENSHOT: &str = "error_screenshot.png";

/// Portal account credentials.
///
/// `Debug` redacts the secret; the username is logged masked by the
/// CLI and never appears here in full either.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Create credentials, rejecting empty values up front.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> FetchResult<Self> {
        let username = username.into();
        let password = password.into();
        if username.is_empty() || password.is_empty() {
            return Err(FetchError::Authentication {
                message: "username and password must be non-empty".to_string(),
            });
        }
        Ok(Self { username, password })
    }

    /// Account identifier
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Account secret
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Username masked for logging (first four characters kept)
    #[must_use]
    pub fn masked_username(&self) -> String {
        let head: String = self.username.chars().take(4).collect();
        format!("{head}***")
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.masked_username())
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Bounds for every wait on the portal. No operation blocks without one.
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// Page navigation / load completion
    pub navigation_ms: u64,
    /// Element appearance within a locator chain
    pub element_ms: u64,
    /// Popup-surface race after login
    pub popup_ms: u64,
    /// Download completion after the trigger is clicked
    pub download_ms: u64,
    /// Fixed settling delay applied after the network goes quiet
    pub settle_ms: u64,
    /// Polling interval for element and popup waits
    pub poll_interval_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation_ms: 30_000,
            element_ms: 30_000,
            popup_ms: 10_000,
            download_ms: 30_000,
            settle_ms: 5_000,
            poll_interval_ms: 250,
        }
    }
}

impl Timeouts {
    /// Navigation wait as a `Duration`
    #[must_use]
    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    /// Element wait as a `Duration`
    #[must_use]
    pub fn element(&self) -> Duration {
        Duration::from_millis(self.element_ms)
    }

    /// Popup race window as a `Duration`
    #[must_use]
    pub fn popup(&self) -> Duration {
        Duration::from_millis(self.popup_ms)
    }

    /// Download wait as a `Duration`
    #[must_use]
    pub fn download(&self) -> Duration {
        Duration::from_millis(self.download_ms)
    }

    /// Settling delay as a `Duration`
    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Poll interval as a `Duration`
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Scale every bound by dividing with `divisor`. Used by tests to
    /// keep the bounded-wait semantics while running fast.
    #[must_use]
    pub fn scaled_down(mut self, divisor: u64) -> Self {
        let d = divisor.max(1);
        self.navigation_ms /= d;
        self.element_ms /= d;
        self.popup_ms /= d;
        self.download_ms /= d;
        self.settle_ms /= d;
        self.poll_interval_ms = (self.poll_interval_ms / d).max(1);
        self
    }
}

/// Randomized human-like delay bands.
///
/// The portal fronts its login with bot detection; pacing every
/// interaction inside a randomized band keeps the session from looking
/// scripted. `Pacing::off()` disables all sleeps for tests.
#[derive(Debug, Clone)]
pub struct Pacing {
    /// Minimum inter-step delay in milliseconds
    pub min_ms: u64,
    /// Maximum inter-step delay in milliseconds
    pub max_ms: u64,
    /// Minimum per-keystroke delay in milliseconds
    pub type_min_ms: u64,
    /// Maximum per-keystroke delay in milliseconds
    pub type_max_ms: u64,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            min_ms: 1_000,
            max_ms: 3_000,
            type_min_ms: 50,
            type_max_ms: 150,
        }
    }
}

impl Pacing {
    /// No delays at all
    #[must_use]
    pub fn off() -> Self {
        Self {
            min_ms: 0,
            max_ms: 0,
            type_min_ms: 0,
            type_max_ms: 0,
        }
    }

    /// Sample one inter-step delay
    #[must_use]
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(sample_band(self.min_ms, self.max_ms))
    }

    /// Sample one keystroke delay
    #[must_use]
    pub fn keystroke_delay(&self) -> Duration {
        Duration::from_millis(sample_band(self.type_min_ms, self.type_max_ms))
    }
}

// Rng is created per sample so no generator is held across awaits.
fn sample_band(min: u64, max: u64) -> u64 {
    if max <= min {
        return min;
    }
    let mut rng = rand::rng();
    match Uniform::new_inclusive(min, max) {
        Ok(dist) => dist.sample(&mut rng),
        Err(_) => min,
    }
}

/// Everything one run needs besides the credentials.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Portal login surface
    pub login_url: String,
    /// Direct plant-list URL, used when no popup surface appears
    pub plant_list_url: String,
    /// Plant to locate and export
    pub plant_name: String,
    /// Artifact destination, overwritten each run
    pub destination: PathBuf,
    /// Full-page screenshot written on failure
    pub failure_screenshot: PathBuf,
    /// Wait bounds
    pub timeouts: Timeouts,
    /// Human-like delay bands
    pub pacing: Pacing,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            login_url: DEFAULT_LOGIN_URL.to_string(),
            plant_list_url: DEFAULT_PLANT_LIST_URL.to_string(),
            plant_name: DEFAULT_PLANT_NAME.to_string(),
            destination: PathBuf::from(DEFAULT_DESTINATION),
            failure_screenshot: PathBuf::from(DEFAULT_FAILURE_SCREENSHOT),
            timeouts: Timeouts::default(),
            pacing: Pacing::default(),
        }
    }
}

impl RunConfig {
    /// Set the target plant name
    #[must_use]
    pub fn with_plant_name(mut self, name: impl Into<String>) -> Self {
        self.plant_name = name.into();
        self
    }

    /// Set the artifact destination
    #[must_use]
    pub fn with_destination(mut self, path: impl Into<PathBuf>) -> Self {
        self.destination = path.into();
        self
    }

    /// Set the failure screenshot path
    #[must_use]
    pub fn with_failure_screenshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.failure_screenshot = path.into();
        self
    }

    /// Set the wait bounds
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the pacing bands
    #[must_use]
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }
}
