//! Run configuration.
//!
//! A single [`VisualConfig`] value is built once (defaults, YAML file, or
//! builder calls) and handed to every component at construction. Nothing
//! reads configuration from ambient state.

use crate::detector::DetectorConfig;
use crate::result::{VistazoError, VistazoResult};
use crate::similarity::SimilarityMetric;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides [`VisualConfig::target_url`]
pub const TARGET_URL_ENV: &str = "TARGET_URL";

/// Browser viewport in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Viewport {
    /// Viewport width
    pub width: u32,
    /// Viewport height
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

impl Viewport {
    /// Create a viewport
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Viewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Configuration for visual regression runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    /// Minimum similarity (0.0-1.0) for a comparison to pass; inclusive
    pub threshold: f64,
    /// Luminance cutoff (0-255) above which a pixel counts as changed
    pub diff_cutoff: u8,
    /// Similarity metric used for scoring
    pub metric: SimilarityMetric,
    /// Browser viewport for captures
    pub viewport: Viewport,
    /// Capture the whole scrollable page instead of just the viewport
    pub full_page: bool,
    /// First navigation attempt timeout
    pub navigate_timeout_ms: u64,
    /// Timeout of the single retry after a failed first attempt
    pub retry_timeout_ms: u64,
    /// Timeout for one comparison (decode, score, diff, write)
    pub compare_timeout_ms: u64,
    /// Wait after page load before capturing, for animations to finish
    pub settle_delay_ms: u64,
    /// Maximum concurrent units of work (tests or browsers)
    pub workers: usize,
    /// Root of the `baselines/`, `current/` and `diffs/` directories
    pub screenshots_dir: PathBuf,
    /// Directory receiving run reports
    pub reports_dir: PathBuf,
    /// Default URL for tests that do not name one
    pub target_url: String,
    /// Reject blank (single-color) captures as first-run baselines
    pub validate_baselines: bool,
    /// Minimum pixel area of a changed region reported in results
    pub min_region_area: u32,
    /// Embed screenshots into the HTML report as data URIs
    pub embed_images: bool,
    /// UI element detector bands
    pub detector: DetectorConfig,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            threshold: 0.95,
            diff_cutoff: 30,
            metric: SimilarityMetric::Ssim,
            viewport: Viewport::default(),
            full_page: true,
            navigate_timeout_ms: 30_000,
            retry_timeout_ms: 60_000,
            compare_timeout_ms: 60_000,
            settle_delay_ms: 1_000,
            workers: 3,
            screenshots_dir: PathBuf::from("./screenshots"),
            reports_dir: PathBuf::from("./reports"),
            target_url: String::from("https://example.com"),
            validate_baselines: true,
            min_region_area: 4,
            embed_images: false,
            detector: DetectorConfig::default(),
        }
    }
}

impl VisualConfig {
    /// Create a configuration with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from YAML text; missing keys take defaults
    pub fn from_yaml_str(yaml: &str) -> VistazoResult<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> VistazoResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Apply overrides from the process environment (`TARGET_URL`)
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(TARGET_URL_ENV) {
            if !url.trim().is_empty() {
                self.target_url = url;
            }
        }
        self
    }

    /// Set the pass threshold
    #[must_use]
    pub const fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the diff luminance cutoff
    #[must_use]
    pub const fn with_diff_cutoff(mut self, cutoff: u8) -> Self {
        self.diff_cutoff = cutoff;
        self
    }

    /// Set the similarity metric
    #[must_use]
    pub const fn with_metric(mut self, metric: SimilarityMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Set viewport dimensions
    #[must_use]
    pub const fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = Viewport::new(width, height);
        self
    }

    /// Set the screenshots root directory
    #[must_use]
    pub fn with_screenshots_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshots_dir = dir.into();
        self
    }

    /// Set the reports directory
    #[must_use]
    pub fn with_reports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = dir.into();
        self
    }

    /// Set the worker pool size
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set navigation and retry timeouts
    #[must_use]
    pub const fn with_timeouts(mut self, navigate_ms: u64, retry_ms: u64) -> Self {
        self.navigate_timeout_ms = navigate_ms;
        self.retry_timeout_ms = retry_ms;
        self
    }

    /// Set the comparison timeout
    #[must_use]
    pub const fn with_compare_timeout(mut self, ms: u64) -> Self {
        self.compare_timeout_ms = ms;
        self
    }

    /// Set the post-load settle delay
    #[must_use]
    pub const fn with_settle_delay(mut self, ms: u64) -> Self {
        self.settle_delay_ms = ms;
        self
    }

    /// Enable or disable first-run baseline validation
    #[must_use]
    pub const fn with_validate_baselines(mut self, validate: bool) -> Self {
        self.validate_baselines = validate;
        self
    }

    /// Enable or disable image embedding in HTML reports
    #[must_use]
    pub const fn with_embed_images(mut self, embed: bool) -> Self {
        self.embed_images = embed;
        self
    }

    /// Replace the detector configuration
    #[must_use]
    pub fn with_detector(mut self, detector: DetectorConfig) -> Self {
        self.detector = detector;
        self
    }

    /// First navigation attempt timeout
    #[must_use]
    pub const fn navigate_timeout(&self) -> Duration {
        Duration::from_millis(self.navigate_timeout_ms)
    }

    /// Retry attempt timeout
    #[must_use]
    pub const fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }

    /// Per-comparison timeout
    #[must_use]
    pub const fn compare_timeout(&self) -> Duration {
        Duration::from_millis(self.compare_timeout_ms)
    }

    /// Post-load settle delay
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Check that every value is in range
    pub fn validate(&self) -> VistazoResult<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(VistazoError::invalid_config(format!(
                "threshold must be within 0.0..=1.0, got {}",
                self.threshold
            )));
        }
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(VistazoError::invalid_config(format!(
                "viewport must be non-empty, got {}",
                self.viewport
            )));
        }
        if self.workers == 0 {
            return Err(VistazoError::invalid_config("workers must be at least 1"));
        }
        if self.navigate_timeout_ms == 0 || self.compare_timeout_ms == 0 {
            return Err(VistazoError::invalid_config("timeouts must be non-zero"));
        }
        if self.retry_timeout_ms < self.navigate_timeout_ms {
            return Err(VistazoError::invalid_config(format!(
                "retry timeout ({}ms) must not be shorter than navigate timeout ({}ms)",
                self.retry_timeout_ms, self.navigate_timeout_ms
            )));
        }
        self.detector.validate()
    }
}
