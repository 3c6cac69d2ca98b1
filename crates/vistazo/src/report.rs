//! Run reports: HTML for people, JSON for tools, JUnit XML for CI.
//!
//! All three are written to the reports directory as
//! `visual_test_report.{html,json,xml}`.
//!
//! Counts cover every unit of the run: each test, each browser pair, and
//! each browser excluded from a matrix because its capture failed (an
//! error).

use crate::comparator::{ComparisonOutcome, TestStatus};
use crate::matrix::CrossBrowserMatrix;
use crate::result::{VistazoError, VistazoResult};
use crate::similarity::SimilarityMetric;
use crate::store::TestId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Report file stem
pub const REPORT_STEM: &str = "visual_test_report";

/// Per-test record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualTestResult {
    pub name: String,
    /// Normalized identifier; absent when the name itself was invalid
    pub test_id: Option<TestId>,
    pub url: String,
    pub status: TestStatus,
    /// Similarity in `[0, 1]`; 1.0 when the baseline was just created
    pub similarity: Option<f64>,
    pub metric: Option<SimilarityMetric>,
    pub threshold: Option<f64>,
    pub baseline_created: bool,
    pub differences_found: bool,
    /// Number of connected changed areas
    pub changed_regions: usize,
    pub baseline_path: Option<PathBuf>,
    pub current_path: Option<PathBuf>,
    pub diff_path: Option<PathBuf>,
    pub error: Option<String>,
    /// Wall time from capture start to verdict
    pub duration_ms: u64,
}

impl VisualTestResult {
    /// Record for a test that reached the comparator
    #[must_use]
    pub fn from_outcome(name: &str, url: &str, outcome: &ComparisonOutcome, duration: Duration) -> Self {
        let mut result = Self {
            name: name.to_string(),
            test_id: Some(outcome.test_id().clone()),
            url: url.to_string(),
            status: outcome.status(),
            similarity: outcome.similarity_value(),
            metric: None,
            threshold: None,
            baseline_created: outcome.baseline_created(),
            differences_found: false,
            changed_regions: 0,
            baseline_path: None,
            current_path: None,
            diff_path: None,
            error: outcome.error().map(str::to_string),
            duration_ms: duration.as_millis() as u64,
        };
        match outcome {
            ComparisonOutcome::BaselineCreated {
                baseline_path,
                current_path,
                ..
            } => {
                result.baseline_path = Some(baseline_path.clone());
                result.current_path = Some(current_path.clone());
            }
            ComparisonOutcome::Compared(cmp) => {
                result.metric = Some(cmp.similarity.metric);
                result.threshold = Some(cmp.threshold);
                result.differences_found = cmp.differences_found;
                result.changed_regions = cmp.changed_regions.len();
                result.baseline_path = Some(cmp.baseline_path.clone());
                result.current_path = Some(cmp.current_path.clone());
                result.diff_path.clone_from(&cmp.diff_path);
            }
            ComparisonOutcome::Error { baseline_path, .. } => {
                result.baseline_path = Some(baseline_path.clone());
            }
        }
        result
    }

    /// Record for a test that failed before comparison (capture, timeout)
    #[must_use]
    pub fn failure(
        name: &str,
        test_id: Option<&TestId>,
        url: &str,
        error: &VistazoError,
        duration: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            test_id: test_id.cloned(),
            url: url.to_string(),
            status: TestStatus::Error,
            similarity: None,
            metric: None,
            threshold: None,
            baseline_created: false,
            differences_found: false,
            changed_regions: 0,
            baseline_path: None,
            current_path: None,
            diff_path: None,
            error: Some(error.to_string()),
            duration_ms: duration.as_millis() as u64,
        }
    }

    fn similarity_label(&self) -> String {
        self.similarity
            .map_or_else(|| String::from("n/a"), |s| format!("{:.2}%", s * 100.0))
    }

    fn failure_message(&self) -> String {
        match (self.similarity, self.threshold) {
            (Some(s), Some(t)) => format!(
                "similarity {:.2}% below threshold {:.2}%",
                s * 100.0,
                t * 100.0
            ),
            _ => String::from("visual comparison failed"),
        }
    }
}

/// Paths of the files written by [`RunReport::write_all`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub html: PathBuf,
    pub json: PathBuf,
    pub junit: PathBuf,
}

/// Results of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub results: Vec<VisualTestResult>,
    #[serde(default)]
    pub matrices: Vec<CrossBrowserMatrix>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

impl RunReport {
    /// Start a report with a fresh run id
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            results: Vec::new(),
            matrices: Vec::new(),
        }
    }

    /// Stamp the finish time
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Attach a cross-browser matrix
    pub fn add_matrix(&mut self, matrix: CrossBrowserMatrix) {
        self.matrices.push(matrix);
    }

    /// Tests plus cross-browser units
    #[must_use]
    pub fn total(&self) -> usize {
        self.results.len() + self.matrix_statuses().count()
    }

    #[must_use]
    pub fn passed(&self) -> usize {
        self.count(TestStatus::Passed)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(TestStatus::Failed)
    }

    #[must_use]
    pub fn errors(&self) -> usize {
        self.count(TestStatus::Error)
    }

    /// Tests whose baseline was created during this run
    #[must_use]
    pub fn baselines_created(&self) -> usize {
        self.results.iter().filter(|r| r.baseline_created).count()
    }

    fn count(&self, status: TestStatus) -> usize {
        self.results
            .iter()
            .map(|r| r.status)
            .chain(self.matrix_statuses())
            .filter(|s| *s == status)
            .count()
    }

    /// One status per pair, plus an error per excluded browser
    fn matrix_statuses(&self) -> impl Iterator<Item = TestStatus> + '_ {
        self.matrices.iter().flat_map(|m| {
            m.entries
                .values()
                .map(|e| e.status)
                .chain(m.excluded.keys().map(|_| TestStatus::Error))
        })
    }

    /// Fraction of units that passed; 1.0 for an empty run
    #[must_use]
    pub fn pass_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            1.0
        } else {
            self.passed() as f64 / total as f64
        }
    }

    /// Whether no unit failed or errored
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.passed() == self.total()
    }

    /// One-line summary
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{}/{} passed, {} failed, {} errors ({} baselines created)",
            self.passed(),
            self.total(),
            self.failed(),
            self.errors(),
            self.baselines_created()
        )
    }

    /// Write HTML, JSON and JUnit reports into `dir`
    pub fn write_all(&self, dir: &Path, embed_images: bool) -> VistazoResult<ReportPaths> {
        std::fs::create_dir_all(dir).map_err(|e| VistazoError::store(dir, e.to_string()))?;
        let paths = ReportPaths {
            html: dir.join(format!("{REPORT_STEM}.html")),
            json: dir.join(format!("{REPORT_STEM}.json")),
            junit: dir.join(format!("{REPORT_STEM}.xml")),
        };
        self.generate_html(&paths.html, embed_images)?;
        std::fs::write(&paths.json, self.render_json()?)?;
        self.generate_junit(&paths.junit)?;
        tracing::info!(run_id = %self.run_id, dir = %dir.display(), "reports written");
        Ok(paths)
    }

    /// Render the JSON report
    pub fn render_json(&self) -> VistazoResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Generate the HTML report
    pub fn generate_html(&self, output_path: &Path, embed_images: bool) -> VistazoResult<()> {
        std::fs::write(output_path, self.render_html(embed_images))?;
        Ok(())
    }

    /// Render the HTML report
    ///
    /// With `embed_images`, screenshots are inlined as base64 data URIs so
    /// the file is self-contained; otherwise images are linked by path.
    #[must_use]
    pub fn render_html(&self, embed_images: bool) -> String {
        let mut html = String::new();

        html.push_str(r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>Visual Regression Report</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 20px; }
        .summary { background: #f5f5f5; padding: 20px; border-radius: 8px; margin-bottom: 20px; }
        .counts { display: flex; gap: 20px; }
        .count { padding: 10px 20px; border-radius: 4px; background: #fff; }
        .test { padding: 10px; margin: 10px 0; border-radius: 4px; }
        .test.passed { background: #e8f5e9; border-left: 4px solid #4caf50; }
        .test.failed { background: #ffebee; border-left: 4px solid #f44336; }
        .test.error { background: #fff3e0; border-left: 4px solid #ff9800; }
        .error-text { color: #d32f2f; font-family: monospace; white-space: pre-wrap; }
        .visual-diff { display: flex; gap: 10px; margin: 10px 0; }
        .visual-diff img { max-width: 400px; border: 1px solid #ddd; }
        table { border-collapse: collapse; margin: 10px 0; }
        td, th { border: 1px solid #ddd; padding: 6px 12px; }
    </style>
</head>
<body>
"#);

        html.push_str(&format!(
            r#"<div class="summary">
    <h1>Visual Regression Report</h1>
    <p>Run {} started {}</p>
    <div class="counts">
        <div class="count">Total: <strong>{}</strong></div>
        <div class="count">Passed: <strong>{}</strong></div>
        <div class="count">Failed: <strong>{}</strong></div>
        <div class="count">Errors: <strong>{}</strong></div>
    </div>
</div>
"#,
            self.run_id,
            self.started_at.to_rfc3339(),
            self.total(),
            self.passed(),
            self.failed(),
            self.errors()
        ));

        html.push_str("<h2>Test Results</h2>\n");
        for result in &self.results {
            html.push_str(&format!(
                r#"<div class="test {}">
    <h3>{}</h3>
    <p>Status: <strong>{}</strong> | Similarity: {} | Metric: {} | URL: {}</p>
"#,
                result.status,
                escape_xml(&result.name),
                result.status.as_str().to_uppercase(),
                result.similarity_label(),
                result.metric.map_or_else(|| String::from("n/a"), |m| m.to_string()),
                escape_xml(&result.url)
            ));
            if result.baseline_created {
                html.push_str("    <p>Baseline created on this run.</p>\n");
            }
            if let Some(error) = &result.error {
                html.push_str(&format!(
                    "    <div class=\"error-text\">{}</div>\n",
                    escape_xml(error)
                ));
            }

            let panels = [
                ("Baseline", &result.baseline_path),
                ("Current", &result.current_path),
                ("Diff", &result.diff_path),
            ];
            if panels.iter().any(|(_, p)| p.is_some()) {
                html.push_str("    <div class=\"visual-diff\">\n");
                for (label, path) in panels {
                    if let Some(path) = path {
                        html.push_str(&format!(
                            "        <div><strong>{label}</strong><br><img alt=\"{label}\" src=\"{}\"><br><code>{}</code></div>\n",
                            image_src(path, embed_images),
                            escape_xml(&path.display().to_string())
                        ));
                    }
                }
                html.push_str("    </div>\n");
            }
            html.push_str("</div>\n");
        }

        if !self.matrices.is_empty() {
            html.push_str("<h2>Cross-Browser Comparison</h2>\n");
            for matrix in &self.matrices {
                html.push_str(&format!(
                    "<h3>{}</h3>\n<table>\n<tr><th>Pair</th><th>Status</th><th>Similarity</th><th>Diff</th></tr>\n",
                    escape_xml(matrix.test_id.as_str())
                ));
                for (key, entry) in &matrix.entries {
                    let similarity = entry
                        .similarity
                        .map_or_else(|| String::from("n/a"), |s| format!("{:.2}%", s.percent()));
                    let detail = match (&entry.diff_path, &entry.error) {
                        (_, Some(error)) => escape_xml(error),
                        (Some(path), None) => format!(
                            "<img alt=\"{}\" style=\"max-width: 300px\" src=\"{}\">",
                            escape_xml(key),
                            image_src(path, embed_images)
                        ),
                        (None, None) => String::from("identical"),
                    };
                    html.push_str(&format!(
                        "<tr><td>{}</td><td>{}</td><td>{similarity}</td><td>{detail}</td></tr>\n",
                        escape_xml(key),
                        entry.status
                    ));
                }
                html.push_str("</table>\n");
                for (browser, message) in &matrix.excluded {
                    html.push_str(&format!(
                        "<p class=\"error-text\">{} excluded: {}</p>\n",
                        escape_xml(browser),
                        escape_xml(message)
                    ));
                }
            }
        }

        html.push_str(
            r#"
<footer>
    <p>Generated by Vistazo</p>
</footer>
</body>
</html>
"#,
        );

        html
    }

    /// Generate the JUnit XML report
    pub fn generate_junit(&self, output_path: &Path) -> VistazoResult<()> {
        std::fs::write(output_path, self.render_junit())?;
        Ok(())
    }

    /// Render JUnit XML; failed units become `<failure>`, errors `<error>`
    ///
    /// Browser pairs appear as `<test_id>:<a>_vs_<b>` and excluded browsers
    /// as `<test_id>:<browser>`.
    #[must_use]
    pub fn render_junit(&self) -> String {
        let total_ms: u64 = self.results.iter().map(|r| r.duration_ms).sum();
        let mut xml = String::new();

        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(&format!(
            r#"<testsuite name="visual-regression" tests="{}" failures="{}" errors="{}" time="{:.3}">"#,
            self.total(),
            self.failed(),
            self.errors(),
            total_ms as f64 / 1000.0
        ));
        xml.push('\n');

        for result in &self.results {
            xml.push_str(&format!(
                r#"  <testcase classname="vistazo.visual" name="{}" time="{:.3}">"#,
                escape_xml(&result.name),
                result.duration_ms as f64 / 1000.0
            ));
            xml.push('\n');

            match result.status {
                TestStatus::Passed => {}
                TestStatus::Failed => {
                    let message = result.failure_message();
                    let body = result
                        .diff_path
                        .as_ref()
                        .map_or_else(String::new, |p| format!("diff: {}", p.display()));
                    xml.push_str(&format!(
                        r#"    <failure message="{}">{}</failure>"#,
                        escape_xml(&message),
                        escape_xml(&body)
                    ));
                    xml.push('\n');
                }
                TestStatus::Error => {
                    let error = result.error.as_deref().unwrap_or("unknown error");
                    xml.push_str(&format!(
                        r#"    <error message="{}">{}</error>"#,
                        escape_xml(error),
                        escape_xml(error)
                    ));
                    xml.push('\n');
                }
            }

            xml.push_str("  </testcase>\n");
        }

        for matrix in &self.matrices {
            for (key, entry) in &matrix.entries {
                let name = format!("{}:{key}", matrix.test_id);
                let body = match entry.status {
                    TestStatus::Passed => String::new(),
                    TestStatus::Failed => {
                        let similarity = entry
                            .similarity
                            .map_or_else(|| String::from("n/a"), |s| format!("{:.2}%", s.percent()));
                        let diff = entry
                            .diff_path
                            .as_ref()
                            .map_or_else(String::new, |p| format!("diff: {}", p.display()));
                        format!(
                            r#"    <failure message="{}">{}</failure>"#,
                            escape_xml(&format!("browsers differ: similarity {similarity} below threshold")),
                            escape_xml(&diff)
                        )
                    }
                    TestStatus::Error => {
                        let error = entry.error.as_deref().unwrap_or("unknown error");
                        format!(
                            r#"    <error message="{}">{}</error>"#,
                            escape_xml(error),
                            escape_xml(error)
                        )
                    }
                };
                push_testcase(&mut xml, "vistazo.cross_browser", &name, &body);
            }
            for (browser, message) in &matrix.excluded {
                let name = format!("{}:{browser}", matrix.test_id);
                let body = format!(
                    r#"    <error message="{}">{}</error>"#,
                    escape_xml(&format!("{browser} capture failed")),
                    escape_xml(message)
                );
                push_testcase(&mut xml, "vistazo.cross_browser", &name, &body);
            }
        }

        xml.push_str("</testsuite>\n");
        xml
    }
}

fn push_testcase(xml: &mut String, classname: &str, name: &str, body: &str) {
    xml.push_str(&format!(
        r#"  <testcase classname="{classname}" name="{}" time="0.000">"#,
        escape_xml(name)
    ));
    xml.push('\n');
    if !body.is_empty() {
        xml.push_str(body);
        xml.push('\n');
    }
    xml.push_str("  </testcase>\n");
}

/// `src` attribute for an image: a data URI when embedding, else the path
fn image_src(path: &Path, embed: bool) -> String {
    if embed {
        match std::fs::read(path) {
            Ok(bytes) => {
                use base64::Engine;
                return format!(
                    "data:image/png;base64,{}",
                    base64::engine::general_purpose::STANDARD.encode(bytes)
                );
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot embed image, linking instead");
            }
        }
    }
    escape_xml(&path.display().to_string())
}

/// Escape XML special characters
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
