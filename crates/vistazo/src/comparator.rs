//! Baseline lifecycle and per-test verdicts.
//!
//! ```text
//!            compare(id, capture)
//!                    |
//!         baseline exists for id?
//!           no /            \ yes
//!   validate + copy       decode both, score, diff
//!   BaselineCreated        Compared(result)
//! ```
//!
//! Any decode or artifact-write failure becomes an [`ComparisonOutcome::Error`]
//! for that test; the comparator never reports a silent pass.

use crate::config::VisualConfig;
use crate::contour::Bounds;
use crate::diff::{visualize, DiffMask, PanelLabels};
use crate::raster::RasterImage;
use crate::result::{VistazoError, VistazoResult};
use crate::similarity::{similarity, SimilarityScore};
use crate::store::{ImageStore, TestId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Verdict of one unit of work (test, browser pair)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// Similarity met the threshold, or a baseline was created
    Passed,
    /// Similarity fell below the threshold
    Failed,
    /// The comparison could not be carried out
    Error,
}

impl TestStatus {
    /// Lower-case name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of comparing a capture against its baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    /// Test identifier
    pub test_id: TestId,
    /// Score and the metric that produced it
    pub similarity: SimilarityScore,
    /// Threshold the score was judged against
    pub threshold: f64,
    /// `similarity >= threshold`
    pub passed: bool,
    /// Whether the diff mask has any set pixel, regardless of the threshold
    pub differences_found: bool,
    /// Number of set mask pixels
    pub diff_pixels: u64,
    /// Bounding boxes of connected changed areas
    pub changed_regions: Vec<Bounds>,
    /// Baseline the capture was scored against
    pub baseline_path: PathBuf,
    /// The scored capture
    pub current_path: PathBuf,
    /// Diff composite, written only when differences were found
    pub diff_path: Option<PathBuf>,
}

impl ComparisonResult {
    /// Pass/fail status
    #[must_use]
    pub const fn status(&self) -> TestStatus {
        if self.passed {
            TestStatus::Passed
        } else {
            TestStatus::Failed
        }
    }
}

/// What a comparison did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ComparisonOutcome {
    /// First run: the capture became the baseline
    BaselineCreated {
        /// Test identifier
        test_id: TestId,
        /// Newly written baseline
        baseline_path: PathBuf,
        /// Capture it was copied from
        current_path: PathBuf,
    },
    /// The capture was scored against an existing baseline
    Compared(ComparisonResult),
    /// The comparison failed
    Error {
        /// Test identifier
        test_id: TestId,
        /// What went wrong
        message: String,
        /// Baseline slot of the test, which may not exist
        baseline_path: PathBuf,
    },
}

impl ComparisonOutcome {
    /// Status of the outcome; a created baseline counts as passed
    #[must_use]
    pub const fn status(&self) -> TestStatus {
        match self {
            Self::BaselineCreated { .. } => TestStatus::Passed,
            Self::Compared(result) => result.status(),
            Self::Error { .. } => TestStatus::Error,
        }
    }

    /// Whether this outcome created the baseline
    #[must_use]
    pub const fn baseline_created(&self) -> bool {
        matches!(self, Self::BaselineCreated { .. })
    }

    /// Test identifier
    #[must_use]
    pub const fn test_id(&self) -> &TestId {
        match self {
            Self::BaselineCreated { test_id, .. } | Self::Error { test_id, .. } => test_id,
            Self::Compared(result) => &result.test_id,
        }
    }

    /// Similarity value; 1.0 for a created baseline, none for an error
    #[must_use]
    pub fn similarity_value(&self) -> Option<f64> {
        match self {
            Self::BaselineCreated { .. } => Some(1.0),
            Self::Compared(result) => Some(result.similarity.value),
            Self::Error { .. } => None,
        }
    }

    /// Detailed result, when a comparison was carried out
    #[must_use]
    pub const fn result(&self) -> Option<&ComparisonResult> {
        match self {
            Self::Compared(result) => Some(result),
            _ => None,
        }
    }

    /// Error message, for error outcomes
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Error { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Commit point shared by a blocking comparison and the caller awaiting it
///
/// The comparison calls [`WriteGate::commit`] right before it writes any
/// artifact. A caller that gives up waiting calls [`WriteGate::cancel`].
/// Exactly one of the two wins: a cancelled comparison writes nothing, and a
/// caller that loses the race must wait for the result, because the
/// artifacts are already being written.
#[derive(Debug, Clone, Default)]
pub struct WriteGate {
    state: Arc<Mutex<GateState>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum GateState {
    #[default]
    Open,
    Committed,
    Cancelled,
}

impl WriteGate {
    /// A gate that has not been committed or cancelled
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the right to write artifacts; fails once cancelled
    pub fn commit(&self, operation: &str) -> VistazoResult<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == GateState::Cancelled {
            return Err(VistazoError::ImageProcessing {
                message: format!("{operation} cancelled before writing artifacts"),
            });
        }
        *state = GateState::Committed;
        Ok(())
    }

    /// Stop a pending comparison from writing; `false` if it already committed
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == GateState::Committed {
            return false;
        }
        *state = GateState::Cancelled;
        true
    }

    /// Whether [`Self::cancel`] won
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) == GateState::Cancelled
    }
}

/// Compares captures against stored baselines
#[derive(Debug, Clone)]
pub struct VisualComparator {
    config: VisualConfig,
    store: ImageStore,
}

impl VisualComparator {
    /// Create a comparator over an opened store
    #[must_use]
    pub const fn new(config: VisualConfig, store: ImageStore) -> Self {
        Self { config, store }
    }

    /// Configuration
    #[must_use]
    pub const fn config(&self) -> &VisualConfig {
        &self.config
    }

    /// Image store
    #[must_use]
    pub const fn store(&self) -> &ImageStore {
        &self.store
    }

    /// Compare the capture at `current_path` with the baseline of `test_id`
    ///
    /// Creates the baseline when none exists. Existing baselines are never
    /// modified here.
    pub fn compare(&self, test_id: &TestId, current_path: &Path) -> ComparisonOutcome {
        self.compare_gated(test_id, current_path, &WriteGate::new())
    }

    /// [`Self::compare`] that writes its baseline or diff only after
    /// committing through `gate`
    pub fn compare_gated(&self, test_id: &TestId, current_path: &Path, gate: &WriteGate) -> ComparisonOutcome {
        let baseline_path = self.store.baseline_path(test_id);

        if !self.store.has_baseline(test_id) {
            return match self.create_baseline(test_id, current_path, gate) {
                Ok(baseline_path) => {
                    tracing::info!(test = %test_id, baseline = %baseline_path.display(), "baseline created");
                    ComparisonOutcome::BaselineCreated {
                        test_id: test_id.clone(),
                        baseline_path,
                        current_path: current_path.to_path_buf(),
                    }
                }
                Err(e) => error_outcome(test_id, &e, baseline_path),
            };
        }

        match self.compare_with_baseline(test_id, &baseline_path, current_path, gate) {
            Ok(result) => {
                tracing::info!(
                    test = %test_id,
                    similarity = result.similarity.value,
                    metric = %result.similarity.metric,
                    passed = result.passed,
                    diff_pixels = result.diff_pixels,
                    "comparison complete"
                );
                ComparisonOutcome::Compared(result)
            }
            Err(e) => error_outcome(test_id, &e, baseline_path),
        }
    }

    /// Overwrite the baseline of `test_id` with the capture at `current_path`
    ///
    /// This is the only way an existing baseline changes.
    pub fn replace_baseline(&self, test_id: &TestId, current_path: &Path) -> VistazoResult<PathBuf> {
        self.replace_baseline_gated(test_id, current_path, &WriteGate::new())
    }

    /// [`Self::replace_baseline`] behind a [`WriteGate`]
    pub fn replace_baseline_gated(
        &self,
        test_id: &TestId,
        current_path: &Path,
        gate: &WriteGate,
    ) -> VistazoResult<PathBuf> {
        let path = self.create_baseline(test_id, current_path, gate)?;
        tracing::warn!(test = %test_id, baseline = %path.display(), "baseline replaced");
        Ok(path)
    }

    fn create_baseline(&self, test_id: &TestId, current_path: &Path, gate: &WriteGate) -> VistazoResult<PathBuf> {
        if self.config.validate_baselines {
            validate_capture(current_path)?;
        }
        gate.commit(&format!("baseline creation for {test_id}"))?;
        self.store.promote_to_baseline(test_id, current_path)
    }

    fn compare_with_baseline(
        &self,
        test_id: &TestId,
        baseline_path: &Path,
        current_path: &Path,
        gate: &WriteGate,
    ) -> VistazoResult<ComparisonResult> {
        let baseline = RasterImage::open(baseline_path)?;
        let current = RasterImage::open(current_path)?;
        if baseline.dimensions() != current.dimensions() {
            tracing::debug!(
                test = %test_id,
                baseline = ?baseline.dimensions(),
                current = ?current.dimensions(),
                "dimension mismatch, resizing capture to baseline"
            );
        }

        let score = similarity(&baseline, &current, self.config.metric)?;
        let mask = DiffMask::compute(&baseline, &current, self.config.diff_cutoff);
        let differences_found = mask.has_differences();
        let changed_regions = mask
            .changed_regions(self.config.min_region_area)
            .into_iter()
            .map(|c| c.bounds)
            .collect();

        gate.commit(&format!("comparison of {test_id}"))?;
        let path = self.store.diff_path(test_id);
        let diff_path = if differences_found {
            write_composite(&baseline, &current, &mask, &PanelLabels::default(), &path)?;
            Some(path)
        } else {
            self.store.remove_stale_diff(&path)?;
            None
        };

        Ok(ComparisonResult {
            test_id: test_id.clone(),
            passed: score.passes(self.config.threshold),
            similarity: score,
            threshold: self.config.threshold,
            differences_found,
            diff_pixels: mask.changed_pixels(),
            changed_regions,
            baseline_path: baseline_path.to_path_buf(),
            current_path: current_path.to_path_buf(),
            diff_path,
        })
    }
}

/// Reject captures that cannot be decoded or are a single flat color
fn validate_capture(path: &Path) -> VistazoResult<()> {
    let image = RasterImage::open(path)?;
    if image.is_uniform() {
        return Err(VistazoError::ImageProcessing {
            message: format!(
                "capture {} is blank (single color {:?}), refusing to use it as a baseline",
                path.display(),
                image.pixel(0, 0)
            ),
        });
    }
    Ok(())
}

/// Render the three-panel composite and write it to `path`
pub(crate) fn write_composite(
    reference: &RasterImage,
    current: &RasterImage,
    mask: &DiffMask,
    labels: &PanelLabels,
    path: &Path,
) -> VistazoResult<()> {
    let composite = visualize(reference, current, mask, labels)?;
    composite
        .save_png(path)
        .map_err(|e| VistazoError::store(path, e.to_string()))
}

fn error_outcome(test_id: &TestId, error: &VistazoError, baseline_path: PathBuf) -> ComparisonOutcome {
    tracing::error!(test = %test_id, error = %error, "comparison failed");
    ComparisonOutcome::Error {
        test_id: test_id.clone(),
        message: error.to_string(),
        baseline_path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::SimilarityMetric;

    struct Fixture {
        _dir: tempfile::TempDir,
        comparator: VisualComparator,
    }

    fn fixture(config: VisualConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path().join("shots")).unwrap();
        Fixture {
            _dir: dir,
            comparator: VisualComparator::new(config, store),
        }
    }

    fn page() -> RasterImage {
        RasterImage::from_fn(96, 64, |x, y| {
            if (20..60).contains(&x) && (10..30).contains(&y) {
                [30, 90, 200]
            } else {
                [250, 250, (x * 2) as u8]
            }
        })
        .unwrap()
    }

    fn write_current(f: &Fixture, id: &TestId, img: &RasterImage) -> PathBuf {
        let path = f.comparator.store().current_path(id);
        img.save_png(&path).unwrap();
        path
    }

    mod lifecycle_tests {
        use super::*;

        #[test]
        fn test_first_run_creates_baseline() {
            let f = fixture(VisualConfig::default());
            let id = TestId::new("Home Page").unwrap();
            let current = write_current(&f, &id, &page());

            let outcome = f.comparator.compare(&id, &current);
            assert!(outcome.baseline_created());
            assert_eq!(outcome.status(), TestStatus::Passed);
            assert_eq!(outcome.similarity_value(), Some(1.0));
            assert!(f.comparator.store().has_baseline(&id));
            assert_eq!(
                std::fs::read(f.comparator.store().baseline_path(&id)).unwrap(),
                std::fs::read(&current).unwrap()
            );
        }

        #[test]
        fn test_second_run_is_a_real_comparison() {
            let f = fixture(VisualConfig::default());
            let id = TestId::new("home").unwrap();
            let current = write_current(&f, &id, &page());
            f.comparator.compare(&id, &current);

            let outcome = f.comparator.compare(&id, &current);
            assert!(!outcome.baseline_created());
            let result = outcome.result().unwrap();
            assert!(result.passed);
            assert_eq!(result.similarity.value, 1.0);
            assert!(!result.differences_found);
            assert!(result.diff_path.is_none());
            assert!(!f.comparator.store().diff_path(&id).exists());
        }

        #[test]
        fn test_changed_capture_fails_and_writes_composite() {
            let f = fixture(VisualConfig::default());
            let id = TestId::new("checkout").unwrap();
            let current = write_current(&f, &id, &page());
            f.comparator.compare(&id, &current);

            let mut changed = page();
            changed.fill_rect(0, 0, 70, 50, [255, 0, 255]);
            changed.save_png(&current).unwrap();

            let outcome = f.comparator.compare(&id, &current);
            assert_eq!(outcome.status(), TestStatus::Failed);
            let result = outcome.result().unwrap();
            assert!(result.differences_found);
            assert!(result.diff_pixels > 0);
            assert!(!result.changed_regions.is_empty());
            let diff = result.diff_path.as_ref().unwrap();
            assert_eq!(RasterImage::open(diff).unwrap().dimensions(), (96 * 3, 64));
        }

        #[test]
        fn test_baseline_not_overwritten_by_failing_compare() {
            let f = fixture(VisualConfig::default());
            let id = TestId::new("stable").unwrap();
            let current = write_current(&f, &id, &page());
            f.comparator.compare(&id, &current);
            let before = std::fs::read(f.comparator.store().baseline_path(&id)).unwrap();

            let mut changed = page();
            changed.fill_rect(0, 0, 96, 64, [0, 0, 0]);
            changed.save_png(&current).unwrap();
            f.comparator.compare(&id, &current);

            let after = std::fs::read(f.comparator.store().baseline_path(&id)).unwrap();
            assert_eq!(before, after);
        }

        #[test]
        fn test_replace_baseline_overwrites() {
            let f = fixture(VisualConfig::default());
            let id = TestId::new("redesign").unwrap();
            let current = write_current(&f, &id, &page());
            f.comparator.compare(&id, &current);

            let mut redesigned = page();
            redesigned.fill_rect(0, 40, 96, 24, [10, 10, 10]);
            redesigned.save_png(&current).unwrap();
            f.comparator.replace_baseline(&id, &current).unwrap();

            let outcome = f.comparator.compare(&id, &current);
            assert_eq!(outcome.status(), TestStatus::Passed);
            assert_eq!(outcome.similarity_value(), Some(1.0));
        }
    }

    mod threshold_tests {
        use super::*;

        #[test]
        fn test_threshold_equality_passes() {
            let config = VisualConfig::default()
                .with_metric(SimilarityMetric::PixelMatch)
                .with_threshold(0.75);
            let f = fixture(config);
            let id = TestId::new("edge").unwrap();
            let base = RasterImage::from_fn(10, 10, |x, y| [(x * 20) as u8, (y * 20) as u8, 0]).unwrap();
            let current = write_current(&f, &id, &base);
            f.comparator.compare(&id, &current);

            // 25 of 100 pixels changed: pixel match is exactly 0.75
            let mut changed = base;
            changed.fill_rect(0, 0, 5, 5, [255, 255, 255]);
            changed.save_png(&current).unwrap();
            let outcome = f.comparator.compare(&id, &current);
            let result = outcome.result().unwrap();
            assert_eq!(result.similarity.value, 0.75);
            assert!(result.passed);
            assert!(result.differences_found);
        }

        #[test]
        fn test_differences_reported_even_when_passing() {
            let config = VisualConfig::default().with_threshold(0.0);
            let f = fixture(config);
            let id = TestId::new("lenient").unwrap();
            let current = write_current(&f, &id, &page());
            f.comparator.compare(&id, &current);

            let mut changed = page();
            changed.fill_rect(80, 50, 10, 10, [0, 0, 0]);
            changed.save_png(&current).unwrap();
            let outcome = f.comparator.compare(&id, &current);
            assert_eq!(outcome.status(), TestStatus::Passed);
            assert!(outcome.result().unwrap().differences_found);
            assert!(outcome.result().unwrap().diff_path.is_some());
        }

        #[test]
        fn test_resized_capture_is_compared() {
            let f = fixture(VisualConfig::default());
            let id = TestId::new("retina").unwrap();
            let current = write_current(&f, &id, &page());
            f.comparator.compare(&id, &current);

            page().resized(192, 128).save_png(&current).unwrap();
            let outcome = f.comparator.compare(&id, &current);
            assert_ne!(outcome.status(), TestStatus::Error);
            assert!(outcome.similarity_value().unwrap() > 0.5);
        }

        #[test]
        fn test_clean_run_removes_previous_diff() {
            let f = fixture(VisualConfig::default());
            let id = TestId::new("flaky").unwrap();
            let current = write_current(&f, &id, &page());
            f.comparator.compare(&id, &current);

            let mut changed = page();
            changed.fill_rect(0, 0, 40, 40, [0, 0, 0]);
            changed.save_png(&current).unwrap();
            f.comparator.compare(&id, &current);
            let diff = f.comparator.store().diff_path(&id);
            assert!(diff.is_file());

            page().save_png(&current).unwrap();
            let outcome = f.comparator.compare(&id, &current);
            assert_eq!(outcome.status(), TestStatus::Passed);
            assert!(outcome.result().unwrap().diff_path.is_none());
            assert!(!diff.exists());
        }
    }

    mod gate_tests {
        use super::*;

        #[test]
        fn test_commit_then_cancel_loses() {
            let gate = WriteGate::new();
            gate.commit("compare").unwrap();
            assert!(!gate.cancel());
            assert!(!gate.is_cancelled());
        }

        #[test]
        fn test_cancel_blocks_commit() {
            let gate = WriteGate::new();
            assert!(gate.cancel());
            assert!(gate.is_cancelled());
            let err = gate.commit("compare").unwrap_err();
            assert!(err.to_string().contains("cancelled"));
        }

        #[test]
        fn test_cancelled_first_run_writes_no_baseline() {
            let f = fixture(VisualConfig::default());
            let id = TestId::new("late").unwrap();
            let current = write_current(&f, &id, &page());
            let gate = WriteGate::new();
            gate.cancel();

            let outcome = f.comparator.compare_gated(&id, &current, &gate);
            assert_eq!(outcome.status(), TestStatus::Error);
            assert!(!f.comparator.store().has_baseline(&id));
        }

        #[test]
        fn test_cancelled_comparison_writes_no_diff() {
            let f = fixture(VisualConfig::default());
            let id = TestId::new("late diff").unwrap();
            let current = write_current(&f, &id, &page());
            f.comparator.compare(&id, &current);

            let mut changed = page();
            changed.fill_rect(0, 0, 50, 50, [0, 0, 0]);
            changed.save_png(&current).unwrap();
            let gate = WriteGate::new();
            gate.cancel();

            let outcome = f.comparator.compare_gated(&id, &current, &gate);
            assert_eq!(outcome.status(), TestStatus::Error);
            assert!(!f.comparator.store().diff_path(&id).exists());
        }

        #[test]
        fn test_cancelled_replace_keeps_old_baseline() {
            let f = fixture(VisualConfig::default());
            let id = TestId::new("keep").unwrap();
            let current = write_current(&f, &id, &page());
            f.comparator.compare(&id, &current);
            let before = std::fs::read(f.comparator.store().baseline_path(&id)).unwrap();

            let mut redesigned = page();
            redesigned.fill_rect(0, 0, 96, 20, [5, 5, 5]);
            redesigned.save_png(&current).unwrap();
            let gate = WriteGate::new();
            gate.cancel();
            assert!(f.comparator.replace_baseline_gated(&id, &current, &gate).is_err());
            assert_eq!(std::fs::read(f.comparator.store().baseline_path(&id)).unwrap(), before);
        }
    }

    mod error_tests {
        use super::*;

        #[test]
        fn test_blank_first_capture_rejected() {
            let f = fixture(VisualConfig::default());
            let id = TestId::new("blank").unwrap();
            let current = write_current(&f, &id, &RasterImage::filled(50, 50, [255, 255, 255]).unwrap());
            let outcome = f.comparator.compare(&id, &current);
            assert_eq!(outcome.status(), TestStatus::Error);
            assert!(outcome.error().unwrap().contains("blank"));
            assert!(!f.comparator.store().has_baseline(&id));
        }

        #[test]
        fn test_blank_first_capture_accepted_without_validation() {
            let f = fixture(VisualConfig::default().with_validate_baselines(false));
            let id = TestId::new("blank").unwrap();
            let current = write_current(&f, &id, &RasterImage::filled(50, 50, [255, 255, 255]).unwrap());
            assert!(f.comparator.compare(&id, &current).baseline_created());
        }

        #[test]
        fn test_corrupt_capture_is_error_not_pass() {
            let f = fixture(VisualConfig::default());
            let id = TestId::new("corrupt").unwrap();
            let current = write_current(&f, &id, &page());
            f.comparator.compare(&id, &current);

            std::fs::write(&current, b"truncated").unwrap();
            let outcome = f.comparator.compare(&id, &current);
            assert_eq!(outcome.status(), TestStatus::Error);
            assert_eq!(outcome.similarity_value(), None);
            assert!(outcome.error().is_some());
        }

        #[test]
        fn test_missing_capture_is_error() {
            let f = fixture(VisualConfig::default());
            let id = TestId::new("ghost").unwrap();
            let path = f.comparator.store().current_path(&id);
            let outcome = f.comparator.compare(&id, &path);
            assert_eq!(outcome.status(), TestStatus::Error);
            assert!(!f.comparator.store().has_baseline(&id));
        }

        #[test]
        fn test_outcome_serializes_with_tag() {
            let id = TestId::new("tagged").unwrap();
            let outcome = ComparisonOutcome::Error {
                test_id: id,
                message: "boom".into(),
                baseline_path: PathBuf::from("b.png"),
            };
            let json = serde_json::to_value(&outcome).unwrap();
            assert_eq!(json["outcome"], "error");
            assert_eq!(json["message"], "boom");
        }
    }
}
