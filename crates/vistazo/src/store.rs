//! Image store: on-disk layout for baselines, current captures and diffs.
//!
//! ```text
//! <root>/
//!   baselines/<test_id>.png   (+ <test_id>.json capture record)
//!   current/<test_id>.png     (+ <test_id>.json capture record)
//!   diffs/<test_id>_diff.png
//!   diffs/<test_id>_<a>_vs_<b>_diff.png
//! ```
//!
//! The store derives paths and guarantees the directories exist. It makes no
//! pass/fail decisions.

use crate::config::Viewport;
use crate::result::{VistazoError, VistazoResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Normalized test identifier: lower-case, spaces replaced by underscores
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(String);

impl TestId {
    /// Normalize a test name into an identifier
    ///
    /// Names that would escape the store directories (path separators, `..`)
    /// or that normalize to nothing are rejected.
    pub fn new(name: &str) -> VistazoResult<Self> {
        let id = name.trim().to_lowercase().replace(' ', "_");
        if id.is_empty() {
            return Err(VistazoError::invalid_config("test name must not be empty"));
        }
        if id.contains('/') || id.contains('\\') || id.contains("..") {
            return Err(VistazoError::invalid_config(format!(
                "test name {name:?} contains path components"
            )));
        }
        Ok(Self(id))
    }

    /// The identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize a browser name into the id used in paths and pair keys
///
/// Ids are lower-case ASCII letters, digits and `-`. Anything else would
/// either escape the store directories or make `a_vs_b` keys ambiguous.
pub fn browser_id(name: &str) -> VistazoResult<String> {
    let id = name.trim().to_lowercase();
    if id.is_empty() {
        return Err(VistazoError::invalid_config("browser name must not be empty"));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(VistazoError::invalid_config(format!(
            "browser name {name:?} may only contain ASCII letters, digits and '-'"
        )));
    }
    Ok(id)
}

/// Metadata for one screenshot on disk
///
/// Baselines carry the record of the capture they were promoted from,
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRecord {
    /// Test identifier
    pub test_id: TestId,
    /// Source URL
    pub url: String,
    /// Capture time
    pub captured_at: DateTime<Utc>,
    /// Viewport used for the capture
    pub viewport: Viewport,
    /// Location of the PNG
    pub image_path: PathBuf,
    /// Browser that produced the capture, for cross-browser runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
}

impl CaptureRecord {
    /// Create a record stamped with the current time
    #[must_use]
    pub fn new(test_id: TestId, url: impl Into<String>, viewport: Viewport, image_path: PathBuf) -> Self {
        Self {
            test_id,
            url: url.into(),
            captured_at: Utc::now(),
            viewport,
            image_path,
            browser: None,
        }
    }

    /// Tag the record with a browser name
    #[must_use]
    pub fn with_browser(mut self, browser: impl Into<String>) -> Self {
        self.browser = Some(browser.into());
        self
    }
}

/// Sidecar path holding the [`CaptureRecord`] of an image
#[must_use]
pub fn record_path(image_path: &Path) -> PathBuf {
    image_path.with_extension("json")
}

/// Directory layout for one screenshots root
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
    baselines: PathBuf,
    current: PathBuf,
    diffs: PathBuf,
}

impl ImageStore {
    /// Open a store rooted at `root`, creating the three directories
    ///
    /// Failure here is an environment failure and aborts the run.
    pub fn open(root: impl Into<PathBuf>) -> VistazoResult<Self> {
        let root = root.into();
        let store = Self {
            baselines: root.join("baselines"),
            current: root.join("current"),
            diffs: root.join("diffs"),
            root,
        };
        for dir in [&store.baselines, &store.current, &store.diffs] {
            std::fs::create_dir_all(dir).map_err(|e| VistazoError::store(dir, e.to_string()))?;
        }
        tracing::debug!(root = %store.root.display(), "image store ready");
        Ok(store)
    }

    /// Store root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `baselines/` directory
    #[must_use]
    pub fn baselines_dir(&self) -> &Path {
        &self.baselines
    }

    /// `current/` directory
    #[must_use]
    pub fn current_dir(&self) -> &Path {
        &self.current
    }

    /// `diffs/` directory
    #[must_use]
    pub fn diffs_dir(&self) -> &Path {
        &self.diffs
    }

    /// Baseline image path for a test
    #[must_use]
    pub fn baseline_path(&self, id: &TestId) -> PathBuf {
        self.baselines.join(format!("{id}.png"))
    }

    /// Current capture path for a test
    #[must_use]
    pub fn current_path(&self, id: &TestId) -> PathBuf {
        self.current.join(format!("{id}.png"))
    }

    /// Current capture path for one browser of a cross-browser test
    ///
    /// `browser` is expected to come from [`browser_id`].
    #[must_use]
    pub fn browser_capture_path(&self, id: &TestId, browser: &str) -> PathBuf {
        self.current
            .join(format!("{id}_{}.png", browser.to_lowercase()))
    }

    /// Diff composite path for a test
    #[must_use]
    pub fn diff_path(&self, id: &TestId) -> PathBuf {
        self.diffs.join(format!("{id}_diff.png"))
    }

    /// Diff composite path for a browser pair, keyed `a_vs_b`
    #[must_use]
    pub fn pair_diff_path(&self, id: &TestId, pair_key: &str) -> PathBuf {
        self.diffs.join(format!("{id}_{pair_key}_diff.png"))
    }

    /// Whether a baseline exists for a test
    #[must_use]
    pub fn has_baseline(&self, id: &TestId) -> bool {
        self.baseline_path(id).is_file()
    }

    /// Write a capture image and its record
    pub fn write_capture(&self, record: &CaptureRecord, png: &[u8]) -> VistazoResult<()> {
        std::fs::write(&record.image_path, png)
            .map_err(|e| VistazoError::store(&record.image_path, e.to_string()))?;
        write_record(record)
    }

    /// Copy a capture (image and record, verbatim) into the baseline slot
    ///
    /// Overwrites any existing baseline; callers on the normal comparison
    /// path check [`Self::has_baseline`] first.
    pub fn promote_to_baseline(&self, id: &TestId, capture_path: &Path) -> VistazoResult<PathBuf> {
        let baseline = self.baseline_path(id);
        std::fs::copy(capture_path, &baseline)
            .map_err(|e| VistazoError::store(&baseline, e.to_string()))?;

        let source_record = record_path(capture_path);
        if source_record.is_file() {
            let target_record = record_path(&baseline);
            std::fs::copy(&source_record, &target_record)
                .map_err(|e| VistazoError::store(&target_record, e.to_string()))?;
        }
        Ok(baseline)
    }

    /// Delete a diff left behind by an earlier run; a missing file is fine
    pub fn remove_stale_diff(&self, path: &Path) -> VistazoResult<()> {
        match std::fs::remove_file(path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "stale diff removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VistazoError::store(path, e.to_string())),
        }
    }

    /// Read the record stored beside an image, if any
    pub fn read_record(&self, image_path: &Path) -> VistazoResult<Option<CaptureRecord>> {
        let path = record_path(image_path);
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }
}

fn write_record(record: &CaptureRecord) -> VistazoResult<()> {
    let path = record_path(&record.image_path);
    let json = serde_json::to_string_pretty(record)?;
    std::fs::write(&path, json).map_err(|e| VistazoError::store(&path, e.to_string()))
}
