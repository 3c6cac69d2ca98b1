//! Suite orchestration: capture, persist, compare.
//!
//! Tests run concurrently on a bounded pool of `workers` units. Capture is
//! async (driver I/O); comparison is CPU-bound and runs on the blocking pool
//! under `compare_timeout`, one timeout per test or browser pair. A failure
//! in one unit never affects another, and a unit that times out writes no
//! artifacts after its result has been reported.

use crate::capture::{capture_with_retry, CaptureDriver, CaptureRequest};
use crate::comparator::{ComparisonOutcome, VisualComparator, WriteGate};
use crate::config::VisualConfig;
use crate::matrix::{
    decode_capture, BrowserCapture, CrossBrowserComparator, CrossBrowserMatrix, DecodedCapture,
    pair_key, MatrixEntry, MatrixPlan,
};
use crate::report::{RunReport, VisualTestResult};
use crate::result::{VistazoError, VistazoResult};
use crate::store::{browser_id, CaptureRecord, ImageStore, TestId};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What part of the page to capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Entire scrollable page
    #[default]
    FullPage,
    /// Visible viewport only
    Viewport,
}

/// A named page to check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualTest {
    /// Display name; normalized into the [`TestId`]
    pub name: String,
    /// Page URL; the configured target URL when absent
    #[serde(default)]
    pub url: Option<String>,
    /// Full page or viewport
    #[serde(default)]
    pub capture_mode: CaptureMode,
}

impl VisualTest {
    #[must_use]
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: Some(url.into()),
            capture_mode: CaptureMode::default(),
        }
    }

    #[must_use]
    pub const fn with_capture_mode(mut self, mode: CaptureMode) -> Self {
        self.capture_mode = mode;
        self
    }
}

/// A list of visual tests, loadable from YAML
///
/// ```yaml
/// tests:
///   - name: Home Page
///     url: https://example.com/
///   - name: Pricing
///     url: https://example.com/pricing
///     capture_mode: viewport
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualSuite {
    /// Tests in run order
    #[serde(default)]
    pub tests: Vec<VisualTest>,
}

impl VisualSuite {
    /// Parse a suite from YAML text
    ///
    /// Every name must normalize to a valid identifier, and no two names may
    /// normalize to the same one.
    pub fn from_yaml_str(yaml: &str) -> VistazoResult<Self> {
        let suite: Self = serde_yaml_ng::from_str(yaml)?;
        let mut seen = HashSet::new();
        for test in &suite.tests {
            let id = TestId::new(&test.name)?;
            if !seen.insert(id.clone()) {
                return Err(VistazoError::invalid_config(format!(
                    "test name {:?} duplicates the identifier {id}",
                    test.name
                )));
            }
        }
        Ok(suite)
    }

    /// Load a suite from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> VistazoResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }
}

/// Summary of [`VisualTestRunner::create_baseline_suite`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineSuiteReport {
    /// Baselines written
    pub created: usize,
    /// URLs whose capture or baseline write failed
    pub failed: usize,
    /// URLs requested
    pub total: usize,
    /// `(url, error)` for every failed capture
    pub failures: Vec<(String, String)>,
}

/// Runs visual tests against a capture driver
#[derive(Clone)]
pub struct VisualTestRunner {
    config: Arc<VisualConfig>,
    store: ImageStore,
    comparator: Arc<VisualComparator>,
    driver: Arc<dyn CaptureDriver>,
}

impl std::fmt::Debug for VisualTestRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisualTestRunner")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("driver", &self.driver.name())
            .finish_non_exhaustive()
    }
}

impl VisualTestRunner {
    /// Validate `config` and open its image store
    ///
    /// Fails only on invalid configuration or when the store directories
    /// cannot be created.
    pub fn new(config: VisualConfig, driver: Arc<dyn CaptureDriver>) -> VistazoResult<Self> {
        config.validate()?;
        let store = ImageStore::open(&config.screenshots_dir)?;
        let comparator = Arc::new(VisualComparator::new(config.clone(), store.clone()));
        Ok(Self {
            config: Arc::new(config),
            store,
            comparator,
            driver,
        })
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &VisualConfig {
        &self.config
    }

    /// Image store
    #[must_use]
    pub const fn store(&self) -> &ImageStore {
        &self.store
    }

    /// Run one test: capture, persist, compare
    pub async fn run_test(&self, test: &VisualTest) -> VisualTestResult {
        let started = Instant::now();
        let url = self.url_for(test);

        let test_id = match TestId::new(&test.name) {
            Ok(id) => id,
            Err(e) => return VisualTestResult::failure(&test.name, None, &url, &e, started.elapsed()),
        };
        tracing::info!(test = %test_id, url = %url, "running visual test");

        let current_path = self.store.current_path(&test_id);
        let request = self.request(&url, test.capture_mode);
        if let Err(e) = self
            .capture_to(self.driver.as_ref(), &test_id, &request, &current_path, false)
            .await
        {
            tracing::error!(test = %test_id, error = %e, "capture failed");
            return VisualTestResult::failure(&test.name, Some(&test_id), &url, &e, started.elapsed());
        }

        match self.compare_blocking(test_id.clone(), current_path).await {
            Ok(outcome) => VisualTestResult::from_outcome(&test.name, &url, &outcome, started.elapsed()),
            Err(e) => VisualTestResult::failure(&test.name, Some(&test_id), &url, &e, started.elapsed()),
        }
    }

    /// Run every test of a suite with at most `workers` in flight
    ///
    /// Results keep the suite's order. A test whose identifier repeats an
    /// earlier test's becomes an error result and is not run, so no two
    /// units ever write the same files.
    pub async fn run_suite(&self, tests: &[VisualTest]) -> RunReport {
        let mut report = RunReport::new();
        tracing::info!(run_id = %report.run_id, tests = tests.len(), workers = self.config.workers, "visual suite started");

        let mut seen = HashSet::new();
        let duplicates: Vec<Option<TestId>> = tests
            .iter()
            .map(|test| match TestId::new(&test.name) {
                Ok(id) if !seen.insert(id.clone()) => Some(id),
                _ => None,
            })
            .collect();

        let mut results: Vec<(usize, VisualTestResult)> = stream::iter(tests.iter().zip(duplicates).enumerate())
            .map(|(i, (test, duplicate))| async move {
                let result = match duplicate {
                    Some(id) => {
                        let error = VistazoError::invalid_config(format!(
                            "test name {:?} duplicates the identifier {id} of an earlier test",
                            test.name
                        ));
                        tracing::error!(test = %id, error = %error, "duplicate test skipped");
                        VisualTestResult::failure(&test.name, Some(&id), &self.url_for(test), &error, Duration::ZERO)
                    }
                    None => self.run_test(test).await,
                };
                (i, result)
            })
            .buffer_unordered(self.config.workers)
            .collect()
            .await;
        results.sort_by_key(|(i, _)| *i);
        report.results = results.into_iter().map(|(_, r)| r).collect();
        report.finish();

        tracing::info!(
            run_id = %report.run_id,
            passed = report.passed(),
            failed = report.failed(),
            errors = report.errors(),
            "visual suite finished"
        );
        report
    }

    /// Capture `test` in every browser concurrently, then compare all pairs
    ///
    /// Pairs are built only after every capture has finished. Failed
    /// captures are excluded from the matrix. Each capture is decoded once
    /// and each pair is scored under its own `compare_timeout`; a unit that
    /// overruns becomes an error entry. Fails only when the test name or a
    /// driver name is invalid, or two drivers share a browser id.
    pub async fn run_cross_browser(
        &self,
        test: &VisualTest,
        drivers: &[Arc<dyn CaptureDriver>],
    ) -> VistazoResult<CrossBrowserMatrix> {
        let test_id = TestId::new(&test.name)?;
        let url = self.url_for(test);
        let request = self.request(&url, test.capture_mode);

        let mut browsers = Vec::with_capacity(drivers.len());
        for driver in drivers {
            let browser = browser_id(driver.name())?;
            if browsers.contains(&browser) {
                return Err(VistazoError::invalid_config(format!(
                    "two drivers share the browser id {browser:?}"
                )));
            }
            browsers.push(browser);
        }

        let captures = futures::future::join_all(drivers.iter().zip(browsers).map(|(driver, browser)| {
            let path = self.store.browser_capture_path(&test_id, &browser);
            let (test_id, request) = (&test_id, &request);
            async move {
                let capture = match self.capture_to(driver.as_ref(), test_id, request, &path, true).await {
                    Ok(()) => BrowserCapture::Captured(path),
                    Err(e) => BrowserCapture::Failed(e.to_string()),
                };
                (browser, capture)
            }
        }))
        .await;
        let captures: BTreeMap<String, BrowserCapture> = captures.into_iter().collect();
        let plan = MatrixPlan::new(&test_id, &captures)?;

        let decoded: BTreeMap<String, DecodedCapture> =
            futures::future::join_all(plan.participants().iter().map(|(browser, path)| {
                let path = path.clone();
                let operation = format!("decoding {browser} capture of {test_id}");
                async move {
                    let image = self
                        .blocking_unit(operation, move |_| decode_capture(&path))
                        .await
                        .unwrap_or_else(|e| Err(e.to_string()));
                    (browser.clone(), image)
                }
            }))
            .await
            .into_iter()
            .collect();

        let comparator = Arc::new(CrossBrowserComparator::new((*self.config).clone(), self.store.clone()));
        let entries: Vec<MatrixEntry> = stream::iter(plan.pairs())
            .map(|(a, b)| {
                let comparator = Arc::clone(&comparator);
                let (img_a, img_b) = (decoded[&a].clone(), decoded[&b].clone());
                let id = test_id.clone();
                let operation = format!("comparison of {test_id} {a} vs {b}");
                async move {
                    let (task_a, task_b) = (a.clone(), b.clone());
                    self.blocking_unit(operation, move |gate| {
                        comparator.compare_decoded(&id, &task_a, &task_b, &img_a, &img_b, gate)
                    })
                    .await
                    .unwrap_or_else(|e| {
                        tracing::error!(pair = %pair_key(&a, &b), error = %e, "pair comparison failed");
                        MatrixEntry::error(&a, &b, e.to_string())
                    })
                }
            })
            .buffer_unordered(self.config.workers)
            .collect()
            .await;

        Ok(plan.finish(entries))
    }

    /// Capture each URL and store it as the baseline `baseline_<n>`
    ///
    /// Existing baselines with those names are replaced.
    pub async fn create_baseline_suite(&self, urls: &[String]) -> BaselineSuiteReport {
        let outcomes: Vec<(String, VistazoResult<PathBuf>)> =
            stream::iter(urls.iter().enumerate())
                .map(|(i, url)| async move { (url.clone(), self.create_baseline(i + 1, url).await) })
                .buffer_unordered(self.config.workers)
                .collect()
                .await;

        let mut report = BaselineSuiteReport {
            total: urls.len(),
            ..BaselineSuiteReport::default()
        };
        for (url, outcome) in outcomes {
            match outcome {
                Ok(_) => report.created += 1,
                Err(e) => {
                    report.failed += 1;
                    report.failures.push((url, e.to_string()));
                }
            }
        }
        tracing::info!(created = report.created, failed = report.failed, total = report.total, "baseline suite created");
        report
    }

    async fn create_baseline(&self, index: usize, url: &str) -> VistazoResult<PathBuf> {
        let test_id = TestId::new(&format!("baseline_{index}"))?;
        let current_path = self.store.current_path(&test_id);
        let request = self.request(url, CaptureMode::FullPage);
        self.capture_to(self.driver.as_ref(), &test_id, &request, &current_path, false)
            .await?;

        let comparator = Arc::clone(&self.comparator);
        self.blocking_unit(format!("baseline creation for {url}"), move |gate| {
            comparator.replace_baseline_gated(&test_id, &current_path, gate)
        })
        .await?
    }

    fn url_for(&self, test: &VisualTest) -> String {
        test.url
            .clone()
            .unwrap_or_else(|| self.config.target_url.clone())
    }

    fn request(&self, url: &str, mode: CaptureMode) -> CaptureRequest {
        CaptureRequest::from_config(url, &self.config).with_full_page(mode == CaptureMode::FullPage)
    }

    async fn capture_to(
        &self,
        driver: &dyn CaptureDriver,
        test_id: &TestId,
        request: &CaptureRequest,
        path: &Path,
        tag_browser: bool,
    ) -> VistazoResult<()> {
        let png = capture_with_retry(driver, request, self.config.retry_timeout()).await?;
        let mut record = CaptureRecord::new(test_id.clone(), &request.url, request.viewport, path.to_path_buf());
        if tag_browser {
            record = record.with_browser(driver.name().to_lowercase());
        }
        self.store.write_capture(&record, &png)?;
        tracing::debug!(test = %test_id, browser = driver.name(), path = %path.display(), bytes = png.len(), "capture stored");
        Ok(())
    }

    async fn compare_blocking(&self, test_id: TestId, current_path: PathBuf) -> VistazoResult<ComparisonOutcome> {
        let comparator = Arc::clone(&self.comparator);
        let operation = format!("comparison of {test_id}");
        self.blocking_unit(operation, move |gate| comparator.compare_gated(&test_id, &current_path, gate))
            .await
    }

    /// Run CPU-bound `work` on the blocking pool under `compare_timeout`
    ///
    /// On timeout the gate is cancelled, so `work` cannot write artifacts
    /// afterwards. If `work` already committed, its result is awaited and
    /// returned instead, since its artifacts are being written.
    async fn blocking_unit<T, F>(&self, operation: String, work: F) -> VistazoResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&WriteGate) -> T + Send + 'static,
    {
        let gate = WriteGate::new();
        let task_gate = gate.clone();
        let timeout = self.config.compare_timeout();
        let mut task = tokio::task::spawn_blocking(move || work(&task_gate));

        let joined = match tokio::time::timeout(timeout, &mut task).await {
            Ok(joined) => joined,
            Err(_) if gate.cancel() => {
                tracing::warn!(operation = %operation, timeout_ms = timeout.as_millis() as u64, "blocking unit timed out");
                return Err(VistazoError::Timeout {
                    operation,
                    ms: timeout.as_millis() as u64,
                });
            }
            Err(_) => {
                tracing::debug!(operation = %operation, "timed out while writing artifacts, awaiting completion");
                task.await
            }
        };
        joined.map_err(|e| VistazoError::ImageProcessing {
            message: format!("{operation} task failed: {e}"),
        })
    }
}
