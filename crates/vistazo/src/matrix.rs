//! Pairwise cross-browser comparison.
//!
//! Every unordered pair of participating browsers is scored once. Browsers
//! whose capture failed are excluded from all pairs; a browser whose image
//! cannot be decoded turns its pairs into error entries without touching the
//! others. Two captures that normalize to the same browser id are rejected
//! up front rather than silently merged.

use crate::comparator::{write_composite, TestStatus, WriteGate};
use crate::config::VisualConfig;
use crate::diff::{DiffMask, PanelLabels};
use crate::raster::RasterImage;
use crate::result::{VistazoError, VistazoResult};
use crate::similarity::{similarity, SimilarityScore};
use crate::store::{browser_id, ImageStore, TestId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Outcome of capturing one browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserCapture {
    /// Screenshot written to this path
    Captured(PathBuf),
    /// Capture failed with this message
    Failed(String),
}

/// A decoded capture shared by every pair it takes part in, or why decoding failed
pub(crate) type DecodedCapture = Result<Arc<RasterImage>, String>;

/// Matrix key for a browser pair, `a` sorting before `b`
///
/// Both ids come from [`browser_id`], which keeps `_vs_` out of them.
#[must_use]
pub fn pair_key(a: &str, b: &str) -> String {
    format!("{a}_vs_{b}")
}

/// Comparison of one browser pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixEntry {
    /// The pair, alphabetical
    pub browsers: (String, String),
    /// Verdict for the pair
    pub status: TestStatus,
    /// Score, absent when the pair could not be compared
    pub similarity: Option<SimilarityScore>,
    /// Whether the diff mask has any set pixel
    pub differences_found: bool,
    /// Labelled composite, written only when differences were found
    pub diff_path: Option<PathBuf>,
    /// Why the pair could not be compared
    pub error: Option<String>,
}

impl MatrixEntry {
    pub(crate) fn error(a: &str, b: &str, message: String) -> Self {
        Self {
            browsers: (a.to_string(), b.to_string()),
            status: TestStatus::Error,
            similarity: None,
            differences_found: false,
            diff_path: None,
            error: Some(message),
        }
    }
}

/// All pairwise comparisons for one test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossBrowserMatrix {
    /// Test the browsers were captured for
    pub test_id: TestId,
    /// Browsers that produced a capture, alphabetical
    pub browsers: Vec<String>,
    /// Browsers whose capture failed, with the failure message
    pub excluded: BTreeMap<String, String>,
    /// `"a_vs_b"` to entry
    pub entries: BTreeMap<String, MatrixEntry>,
}

impl CrossBrowserMatrix {
    /// Number of pairs
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no pairs
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for a pair, in either order
    #[must_use]
    pub fn get(&self, a: &str, b: &str) -> Option<&MatrixEntry> {
        let (a, b) = (a.to_lowercase(), b.to_lowercase());
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        self.entries.get(&pair_key(&first, &second))
    }

    /// Number of entries with the given status
    #[must_use]
    pub fn count(&self, status: TestStatus) -> usize {
        self.entries.values().filter(|e| e.status == status).count()
    }

    /// Whether every pair passed; vacuously true for an empty matrix
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.entries.values().all(|e| e.status == TestStatus::Passed)
    }
}

/// Captures split into participants and exclusions, before any scoring
#[derive(Debug, Clone)]
pub(crate) struct MatrixPlan {
    test_id: TestId,
    participants: BTreeMap<String, PathBuf>,
    excluded: BTreeMap<String, String>,
}

impl MatrixPlan {
    /// Normalize browser ids; duplicate or malformed ids are a configuration error
    pub(crate) fn new(test_id: &TestId, captures: &BTreeMap<String, BrowserCapture>) -> VistazoResult<Self> {
        let mut participants = BTreeMap::new();
        let mut excluded = BTreeMap::new();
        for (name, capture) in captures {
            let browser = browser_id(name)?;
            if participants.contains_key(&browser) || excluded.contains_key(&browser) {
                return Err(VistazoError::invalid_config(format!(
                    "browser id {browser:?} appears more than once for {test_id}"
                )));
            }
            match capture {
                BrowserCapture::Captured(path) => {
                    participants.insert(browser, path.clone());
                }
                BrowserCapture::Failed(message) => {
                    tracing::warn!(test = %test_id, browser = %browser, error = %message, "browser excluded from matrix");
                    excluded.insert(browser, message.clone());
                }
            }
        }
        Ok(Self {
            test_id: test_id.clone(),
            participants,
            excluded,
        })
    }

    /// Browsers with a capture, alphabetical, and where each capture lives
    pub(crate) const fn participants(&self) -> &BTreeMap<String, PathBuf> {
        &self.participants
    }

    /// Every unordered pair of participants, `a < b`
    pub(crate) fn pairs(&self) -> Vec<(String, String)> {
        let browsers: Vec<&String> = self.participants.keys().collect();
        let mut pairs = Vec::new();
        for (i, a) in browsers.iter().enumerate() {
            for b in &browsers[i + 1..] {
                pairs.push(((*a).clone(), (*b).clone()));
            }
        }
        pairs
    }

    /// Assemble the matrix from one entry per pair
    pub(crate) fn finish(self, entries: impl IntoIterator<Item = MatrixEntry>) -> CrossBrowserMatrix {
        let entries: BTreeMap<String, MatrixEntry> = entries
            .into_iter()
            .map(|e| (pair_key(&e.browsers.0, &e.browsers.1), e))
            .collect();
        tracing::info!(
            test = %self.test_id,
            browsers = self.participants.len(),
            excluded = self.excluded.len(),
            pairs = entries.len(),
            "cross-browser matrix complete"
        );
        CrossBrowserMatrix {
            test_id: self.test_id,
            browsers: self.participants.into_keys().collect(),
            excluded: self.excluded,
            entries,
        }
    }
}

/// Decode one browser capture for use in its pairs
pub(crate) fn decode_capture(path: &std::path::Path) -> DecodedCapture {
    RasterImage::open(path).map(Arc::new).map_err(|e| e.to_string())
}

/// Builds [`CrossBrowserMatrix`] values
#[derive(Debug, Clone)]
pub struct CrossBrowserComparator {
    config: VisualConfig,
    store: ImageStore,
}

impl CrossBrowserComparator {
    #[must_use]
    pub const fn new(config: VisualConfig, store: ImageStore) -> Self {
        Self { config, store }
    }

    /// Compare every pair of successful captures
    ///
    /// Fails only when two keys name the same browser or a key is not a
    /// valid browser id; per-pair problems become error entries.
    pub fn compare_all(
        &self,
        test_id: &TestId,
        captures: &BTreeMap<String, BrowserCapture>,
    ) -> VistazoResult<CrossBrowserMatrix> {
        let plan = MatrixPlan::new(test_id, captures)?;
        let decoded: BTreeMap<&String, DecodedCapture> = plan
            .participants()
            .iter()
            .map(|(browser, path)| (browser, decode_capture(path)))
            .collect();

        let entries: Vec<MatrixEntry> = plan
            .pairs()
            .into_iter()
            .map(|(a, b)| self.compare_decoded(test_id, &a, &b, &decoded[&a], &decoded[&b], &WriteGate::new()))
            .collect();
        Ok(plan.finish(entries))
    }

    /// Score one pair; composites are written only after committing through `gate`
    pub(crate) fn compare_decoded(
        &self,
        test_id: &TestId,
        a: &str,
        b: &str,
        img_a: &DecodedCapture,
        img_b: &DecodedCapture,
        gate: &WriteGate,
    ) -> MatrixEntry {
        let entry = match (img_a, img_b) {
            (Ok(img_a), Ok(img_b)) => self
                .compare_pair(test_id, a, b, img_a, img_b, gate)
                .unwrap_or_else(|e| MatrixEntry::error(a, b, e.to_string())),
            (Err(e), _) => MatrixEntry::error(a, b, format!("{a}: {e}")),
            (_, Err(e)) => MatrixEntry::error(a, b, format!("{b}: {e}")),
        };
        tracing::debug!(test = %test_id, pair = %pair_key(a, b), status = %entry.status, "pair compared");
        entry
    }

    fn compare_pair(
        &self,
        test_id: &TestId,
        a: &str,
        b: &str,
        img_a: &RasterImage,
        img_b: &RasterImage,
        gate: &WriteGate,
    ) -> VistazoResult<MatrixEntry> {
        let score = similarity(img_a, img_b, self.config.metric)?;
        let mask = DiffMask::compute(img_a, img_b, self.config.diff_cutoff);
        let differences_found = mask.has_differences();

        gate.commit(&format!("{test_id} {}", pair_key(a, b)))?;
        let path = self.store.pair_diff_path(test_id, &pair_key(a, b));
        let diff_path = if differences_found {
            write_composite(img_a, img_b, &mask, &PanelLabels::for_pair(a, b), &path)?;
            Some(path)
        } else {
            self.store.remove_stale_diff(&path)?;
            None
        };

        let status = if score.passes(self.config.threshold) {
            TestStatus::Passed
        } else {
            TestStatus::Failed
        };

        Ok(MatrixEntry {
            browsers: (a.to_string(), b.to_string()),
            status,
            similarity: Some(score),
            differences_found,
            diff_path,
            error: None,
        })
    }
}
