//! Vistazo: Visual Regression Engine for Web Pages
//!
//! Vistazo captures screenshots through a browser driver, compares them
//! against stored baselines with SSIM, renders labelled diff composites,
//! compares browsers pairwise, and writes HTML, JSON and JUnit reports.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    VISTAZO Architecture                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐            │
//! │   │ Capture    │    │ Comparator │    │ Report     │            │
//! │   │ Driver     │───►│ (baseline, │───►│ (HTML,     │            │
//! │   │ (chromium) │    │ SSIM, diff)│    │ JSON, XML) │            │
//! │   └────────────┘    └────────────┘    └────────────┘            │
//! │         │                 │                                     │
//! │         ▼                 ▼                                     │
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐            │
//! │   │ Image      │    │ Cross-     │    │ UI Element │            │
//! │   │ Store      │    │ Browser    │    │ Detector   │            │
//! │   │            │    │ Matrix     │    │            │            │
//! │   └────────────┘    └────────────┘    └────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use vistazo::{ImageStore, TestId, VisualComparator, VisualConfig};
//!
//! # fn main() -> vistazo::VistazoResult<()> {
//! let config = VisualConfig::default();
//! let store = ImageStore::open(&config.screenshots_dir)?;
//! let comparator = VisualComparator::new(config, store.clone());
//!
//! let id = TestId::new("Home Page")?;
//! let outcome = comparator.compare(&id, &store.current_path(&id));
//! println!("{}: {}", id, outcome.status());
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

mod capture;
mod comparator;
mod config;
mod contour;
mod detector;
mod diff;
mod font;
mod logging;
mod matrix;
mod raster;
mod report;
mod result;
mod runner;
mod similarity;
mod store;

#[cfg(feature = "browser")]
pub use capture::{ChromiumConfig, ChromiumDriver};
pub use capture::{capture_with_retry, CaptureDriver, CaptureRequest, WaitPolicy};
pub use comparator::{ComparisonOutcome, ComparisonResult, TestStatus, VisualComparator, WriteGate};
pub use config::{Viewport, VisualConfig, TARGET_URL_ENV};
pub use contour::{Bounds, Component};
pub use detector::{
    annotate, ButtonBands, DetectorConfig, ElementCandidate, ElementCandidates, ElementKind,
    ImageBands, InputBands, TextBands, UiElementDetector,
};
pub use diff::{highlight_diff, visualize, DiffMask, PanelLabels, DEFAULT_DIFF_CUTOFF, MASK_SET};
pub use logging::{init_tracing, LogFormat};
pub use matrix::{pair_key, BrowserCapture, CrossBrowserComparator, CrossBrowserMatrix, MatrixEntry};
pub use raster::{luminance, RasterImage, HIGHLIGHT_RED};
pub use report::{ReportPaths, RunReport, VisualTestResult, REPORT_STEM};
pub use result::{VistazoError, VistazoResult};
pub use runner::{BaselineSuiteReport, CaptureMode, VisualSuite, VisualTest, VisualTestRunner};
pub use similarity::{similarity, similarity_of_files, SimilarityMetric, SimilarityScore, SSIM_WINDOW};
pub use store::{browser_id, record_path, CaptureRecord, ImageStore, TestId};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::{
        CaptureDriver, CaptureMode, ComparisonOutcome, CrossBrowserMatrix, ImageStore,
        RasterImage, RunReport, TestId, TestStatus, UiElementDetector, VisualComparator,
        VisualConfig, VisualTest, VisualTestRunner, VistazoError, VistazoResult,
    };
}
