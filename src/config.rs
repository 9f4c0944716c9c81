//! # Global collector host configuration.
//!
//! Provides [`Config`] centralized settings for the collector host runtime.
//!
//! Config is used in three places:
//! 1. **Event dispatch**: [`Config::event_timeout`] bounds every fan-out
//! 2. **Attachment transfer**: queue limits and the default results folder
//! 3. **Host manager**: [`CollectorHostManager::new`](crate::CollectorHostManager::new)
//!
//! ## Sentinel values
//! - `queue_max_jobs = 0` → unbounded job count
//! - `queue_max_bytes = 0` → unbounded cumulative size
//! - `event_timeout = 0s` → clamped to 1ms (a fan-out always has a deadline)
//!
//! ## Environment overrides
//! [`Config::from_env`] overlays these variables on the defaults:
//!
//! | variable                         | field                   | format            |
//! |----------------------------------|-------------------------|-------------------|
//! | `DATACOLLECTOR_EVENT_TIMEOUT`    | `event_timeout`         | humantime (`90s`) |
//! | `DATACOLLECTOR_RESULTS_FOLDER`   | `results_folder_name`   | string            |
//! | `DATACOLLECTOR_QUEUE_MAX_JOBS`   | `queue_max_jobs`        | integer           |
//! | `DATACOLLECTOR_QUEUE_MAX_BYTES`  | `queue_max_bytes`       | integer           |
//! | `DATACOLLECTOR_QUEUE_BLOCK`      | `queue_block_when_full` | `true` / `false`  |

use std::time::Duration;

use tracing::warn;

/// Default shared timeout applied to one event fan-out.
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default folder created under the temp directory when no results directory is configured.
pub const DEFAULT_RESULTS_FOLDER: &str = "TestResults";

const ENV_EVENT_TIMEOUT: &str = "DATACOLLECTOR_EVENT_TIMEOUT";
const ENV_RESULTS_FOLDER: &str = "DATACOLLECTOR_RESULTS_FOLDER";
const ENV_QUEUE_MAX_JOBS: &str = "DATACOLLECTOR_QUEUE_MAX_JOBS";
const ENV_QUEUE_MAX_BYTES: &str = "DATACOLLECTOR_QUEUE_MAX_BYTES";
const ENV_QUEUE_BLOCK: &str = "DATACOLLECTOR_QUEUE_BLOCK";

/// Global configuration for the collector host.
///
/// ## Field semantics
/// - `event_timeout`: one deadline for the whole fan-out of a single event
/// - `results_folder_name`: folder under the temp dir used when no hint is given
/// - `queue_max_jobs`: transfer queue job limit (`0` = unbounded)
/// - `queue_max_bytes`: transfer queue size limit in bytes (`0` = unbounded)
/// - `queue_block_when_full`: `true` = producers wait for space, `false` = reject
///
/// ## Notes
/// All fields are public for flexibility. Prefer the helper accessors to avoid
/// sprinkling sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    /// Shared timeout for one event fan-out.
    ///
    /// Handlers still running when it elapses are recorded as timed out and
    /// aborted out-of-band.
    pub event_timeout: Duration,

    /// Name of the default results folder created under the temp directory.
    pub results_folder_name: String,

    /// Maximum number of queued transfers (`0` = unbounded).
    pub queue_max_jobs: usize,

    /// Maximum cumulative size of queued transfers in bytes (`0` = unbounded).
    pub queue_max_bytes: u64,

    /// Whether a full transfer queue blocks the producer (`true`) or rejects the job (`false`).
    pub queue_block_when_full: bool,
}

impl Config {
    /// Builds a config from defaults overlaid with `DATACOLLECTOR_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Overlays values from an arbitrary key lookup (used by [`Config::from_env`]).
    pub fn overlay<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_EVENT_TIMEOUT) {
            match humantime::parse_duration(raw.trim()) {
                Ok(timeout) => self.event_timeout = timeout,
                Err(err) => warn!(key = ENV_EVENT_TIMEOUT, value = %raw, error = %err, "ignoring invalid config value"),
            }
        }
        if let Some(raw) = lookup(ENV_RESULTS_FOLDER) {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                warn!(key = ENV_RESULTS_FOLDER, "ignoring empty config value");
            } else {
                self.results_folder_name = trimmed.to_string();
            }
        }
        if let Some(raw) = lookup(ENV_QUEUE_MAX_JOBS) {
            match raw.trim().parse() {
                Ok(n) => self.queue_max_jobs = n,
                Err(err) => warn!(key = ENV_QUEUE_MAX_JOBS, value = %raw, error = %err, "ignoring invalid config value"),
            }
        }
        if let Some(raw) = lookup(ENV_QUEUE_MAX_BYTES) {
            match raw.trim().parse() {
                Ok(n) => self.queue_max_bytes = n,
                Err(err) => warn!(key = ENV_QUEUE_MAX_BYTES, value = %raw, error = %err, "ignoring invalid config value"),
            }
        }
        if let Some(raw) = lookup(ENV_QUEUE_BLOCK) {
            match raw.trim().parse() {
                Ok(flag) => self.queue_block_when_full = flag,
                Err(err) => warn!(key = ENV_QUEUE_BLOCK, value = %raw, error = %err, "ignoring invalid config value"),
            }
        }
        self
    }

    /// Returns the fan-out timeout clamped to at least one millisecond.
    #[inline]
    pub fn event_timeout_clamped(&self) -> Duration {
        self.event_timeout.max(Duration::from_millis(1))
    }

    /// Returns the job count limit as an `Option`.
    ///
    /// - `None` → unbounded
    /// - `Some(n)` → at most `n` queued transfers
    #[inline]
    pub fn queue_job_limit(&self) -> Option<usize> {
        if self.queue_max_jobs == 0 {
            None
        } else {
            Some(self.queue_max_jobs)
        }
    }

    /// Returns the cumulative size limit as an `Option`.
    #[inline]
    pub fn queue_byte_limit(&self) -> Option<u64> {
        if self.queue_max_bytes == 0 {
            None
        } else {
            Some(self.queue_max_bytes)
        }
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `event_timeout = 60s`
    /// - `results_folder_name = "TestResults"`
    /// - `queue_max_jobs = 0` (unbounded)
    /// - `queue_max_bytes = 0` (unbounded)
    /// - `queue_block_when_full = true` (back-pressure, never drop)
    fn default() -> Self {
        Self {
            event_timeout: DEFAULT_EVENT_TIMEOUT,
            results_folder_name: DEFAULT_RESULTS_FOLDER.to_string(),
            queue_max_jobs: 0,
            queue_max_bytes: 0,
            queue_block_when_full: true,
        }
    }
}
