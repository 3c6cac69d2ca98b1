//! End-to-end visual regression flow against an in-memory capture driver.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vistazo::prelude::*;
use vistazo::{CaptureRequest, RunReport};

/// Serves pre-rendered pages; unknown URLs fail like a refused connection
struct PageDriver {
    name: String,
    pages: Mutex<HashMap<String, RasterImage>>,
}

impl PageDriver {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pages: Mutex::new(HashMap::new()),
        }
    }

    fn serve(&self, url: &str, page: RasterImage) {
        self.pages.lock().unwrap().insert(url.to_string(), page);
    }
}

#[async_trait]
impl CaptureDriver for PageDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn capture(&self, request: &CaptureRequest) -> VistazoResult<Vec<u8>> {
        let page = self.pages.lock().unwrap().get(&request.url).cloned();
        match page {
            Some(page) => page.encode_png(),
            None => Err(VistazoError::capture(&request.url, "net::ERR_CONNECTION_REFUSED")),
        }
    }
}

fn landing(accent: [u8; 3]) -> RasterImage {
    let mut img = RasterImage::from_fn(160, 120, |x, y| [245, 245, 240 - ((x + y) % 16) as u8]).unwrap();
    img.fill_rect(20, 20, 120, 20, [40, 40, 40]);
    img.fill_rect(40, 60, 80, 30, accent);
    img
}

/// Large enough that decoding alone takes far longer than a millisecond
fn poster(size: u32, accent: [u8; 3]) -> RasterImage {
    let mut img = RasterImage::from_fn(size, size, |x, y| {
        [(x % 251) as u8, (y % 241) as u8, ((x * y) % 239) as u8]
    })
    .unwrap();
    img.fill_rect(size / 4, size / 4, size / 2, size / 8, accent);
    img
}

fn config(dir: &std::path::Path) -> VisualConfig {
    VisualConfig::default()
        .with_screenshots_dir(dir.join("screenshots"))
        .with_reports_dir(dir.join("reports"))
        .with_settle_delay(0)
        .with_timeouts(2_000, 4_000)
        .with_workers(2)
}

fn suite() -> Vec<VisualTest> {
    vec![
        VisualTest::new("Home Page", "https://shop.test/"),
        VisualTest::new("Pricing", "https://shop.test/pricing").with_capture_mode(CaptureMode::Viewport),
        VisualTest::new("Offline", "https://shop.test/offline"),
    ]
}

#[tokio::test]
async fn test_first_run_then_regression() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(PageDriver::new("chromium"));
    driver.serve("https://shop.test/", landing([30, 120, 220]));
    driver.serve("https://shop.test/pricing", landing([220, 120, 30]));
    let runner = VisualTestRunner::new(config(dir.path()), driver.clone()).unwrap();

    // first run: baselines created, unreachable page is an error
    let first = runner.run_suite(&suite()).await;
    assert_eq!(first.total(), 3);
    assert_eq!(first.baselines_created(), 2);
    assert_eq!(first.passed(), 2);
    assert_eq!(first.errors(), 1);
    assert_eq!(first.results[0].name, "Home Page");
    assert_eq!(first.results[2].status, TestStatus::Error);
    assert!(first.results[2].error.as_deref().unwrap().contains("ERR_CONNECTION_REFUSED"));
    assert!(runner.store().has_baseline(&TestId::new("home page").unwrap()));

    // second run with identical pages: genuine passes
    let second = runner.run_suite(&suite()[..2]).await;
    assert_eq!(second.passed(), 2);
    assert_eq!(second.baselines_created(), 0);
    assert!(second.results.iter().all(|r| r.similarity == Some(1.0)));

    // regression on the home page
    let mut broken = landing([30, 120, 220]);
    broken.fill_rect(0, 0, 160, 80, [255, 0, 255]);
    driver.serve("https://shop.test/", broken);
    let third = runner.run_suite(&suite()[..2]).await;
    assert_eq!(third.failed(), 1);
    let home = &third.results[0];
    assert_eq!(home.status, TestStatus::Failed);
    assert!(home.differences_found);
    let diff = home.diff_path.as_ref().unwrap();
    assert_eq!(RasterImage::open(diff).unwrap().dimensions(), (480, 120));
    assert_eq!(third.results[1].status, TestStatus::Passed);
}

#[tokio::test]
async fn test_capture_records_written_beside_images() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(PageDriver::new("chromium"));
    driver.serve("https://shop.test/", landing([0, 0, 0]));
    let runner = VisualTestRunner::new(config(dir.path()), driver).unwrap();

    runner.run_suite(&suite()[..1]).await;
    let id = TestId::new("Home Page").unwrap();
    let record = runner
        .store()
        .read_record(&runner.store().baseline_path(&id))
        .unwrap()
        .unwrap();
    assert_eq!(record.test_id, id);
    assert_eq!(record.url, "https://shop.test/");
    assert_eq!(record.viewport, runner.config().viewport);
}

#[tokio::test]
async fn test_cross_browser_matrix() {
    let dir = tempfile::tempdir().unwrap();
    let url = "https://shop.test/";
    let chromium = Arc::new(PageDriver::new("chromium"));
    let firefox = Arc::new(PageDriver::new("firefox"));
    let webkit = Arc::new(PageDriver::new("webkit"));
    let edge = Arc::new(PageDriver::new("edge"));
    chromium.serve(url, landing([30, 120, 220]));
    firefox.serve(url, landing([30, 120, 220]));
    webkit.serve(url, landing([200, 40, 40]));

    let runner = VisualTestRunner::new(config(dir.path()), chromium.clone()).unwrap();
    let drivers: Vec<Arc<dyn CaptureDriver>> = vec![
        webkit as Arc<dyn CaptureDriver>,
        chromium as Arc<dyn CaptureDriver>,
        edge as Arc<dyn CaptureDriver>,
        firefox as Arc<dyn CaptureDriver>,
    ];
    let matrix = runner
        .run_cross_browser(&VisualTest::new("Landing", url), &drivers)
        .await
        .unwrap();

    assert_eq!(matrix.browsers, vec!["chromium", "firefox", "webkit"]);
    assert!(matrix.excluded.contains_key("edge"));
    assert_eq!(matrix.len(), 3);
    assert_eq!(matrix.entries["chromium_vs_firefox"].status, TestStatus::Passed);
    let odd = &matrix.entries["chromium_vs_webkit"];
    assert!(odd.differences_found);
    assert!(odd.diff_path.as_ref().unwrap().is_file());

    let record = runner
        .store()
        .read_record(&runner.store().browser_capture_path(&TestId::new("Landing").unwrap(), "firefox"))
        .unwrap()
        .unwrap();
    assert_eq!(record.browser.as_deref(), Some("firefox"));

    let mut report = RunReport::new();
    report.add_matrix(matrix);
    let html = report.render_html(false);
    assert!(html.contains("chromium_vs_webkit"));
    assert!(html.contains("edge excluded"));
    assert_eq!(report.total(), 4);
    assert_eq!(report.errors(), 1);
    assert!(!report.all_passed());
    assert!(report.render_junit().contains("name=\"landing:edge\""));
}

#[tokio::test]
async fn test_comparison_timeout_is_a_per_test_error() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(PageDriver::new("chromium"));
    driver.serve("https://shop.test/big", poster(800, [200, 0, 0]));
    driver.serve("https://shop.test/", landing([30, 120, 220]));
    let slow_capture_ok = config(dir.path()).with_timeouts(20_000, 40_000);
    let runner = VisualTestRunner::new(slow_capture_ok.with_compare_timeout(1), driver).unwrap();

    let report = runner
        .run_suite(&[VisualTest::new("Big", "https://shop.test/big")])
        .await;
    assert_eq!(report.errors(), 1);
    let big = &report.results[0];
    assert_eq!(big.status, TestStatus::Error);
    assert!(big.error.as_deref().unwrap().contains("timed out"));
    assert!(!big.baseline_created);

    // the abandoned comparison must not create the baseline later
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!runner.store().has_baseline(&TestId::new("big").unwrap()));
}

#[tokio::test]
async fn test_cross_browser_timeout_keeps_the_matrix() {
    let dir = tempfile::tempdir().unwrap();
    let url = "https://shop.test/";
    let names = ["chromium", "firefox", "webkit"];
    let drivers: Vec<Arc<dyn CaptureDriver>> = names
        .iter()
        .map(|name| {
            let driver = PageDriver::new(name);
            driver.serve(url, poster(600, [0, 0, 200]));
            Arc::new(driver) as Arc<dyn CaptureDriver>
        })
        .collect();
    let cfg = config(dir.path()).with_timeouts(20_000, 40_000).with_compare_timeout(1);
    let runner = VisualTestRunner::new(cfg, Arc::clone(&drivers[0])).unwrap();

    let matrix = runner
        .run_cross_browser(&VisualTest::new("Landing", url), &drivers)
        .await
        .unwrap();
    assert_eq!(matrix.browsers, names);
    assert_eq!(matrix.len(), 3);
    assert_eq!(matrix.count(TestStatus::Error), 3);
    assert!(matrix
        .entries
        .values()
        .all(|e| e.error.as_deref().unwrap().contains("timed out")));
}

#[tokio::test]
async fn test_duplicate_browser_ids_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let url = "https://shop.test/";
    let first = Arc::new(PageDriver::new("chromium"));
    let second = Arc::new(PageDriver::new("Chromium"));
    let firefox = Arc::new(PageDriver::new("firefox"));
    for driver in [&first, &second, &firefox] {
        driver.serve(url, landing([30, 120, 220]));
    }
    let runner = VisualTestRunner::new(config(dir.path()), first.clone()).unwrap();
    let drivers: Vec<Arc<dyn CaptureDriver>> = vec![
        first as Arc<dyn CaptureDriver>,
        second as Arc<dyn CaptureDriver>,
        firefox as Arc<dyn CaptureDriver>,
    ];

    let err = runner
        .run_cross_browser(&VisualTest::new("Landing", url), &drivers)
        .await
        .unwrap_err();
    assert!(matches!(err, VistazoError::InvalidConfig { .. }));
    let id = TestId::new("Landing").unwrap();
    assert!(!runner.store().browser_capture_path(&id, "firefox").exists());
}

#[tokio::test]
async fn test_path_like_driver_name_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let sneaky = Arc::new(PageDriver::new("../../outside"));
    let runner = VisualTestRunner::new(config(dir.path()), sneaky.clone()).unwrap();
    let drivers: Vec<Arc<dyn CaptureDriver>> = vec![sneaky as Arc<dyn CaptureDriver>];
    let err = runner
        .run_cross_browser(&VisualTest::new("Landing", "https://shop.test/"), &drivers)
        .await
        .unwrap_err();
    assert!(matches!(err, VistazoError::InvalidConfig { .. }));
}

#[tokio::test]
async fn test_duplicate_test_ids_do_not_share_files() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(PageDriver::new("chromium"));
    driver.serve("https://shop.test/a", landing([30, 120, 220]));
    driver.serve("https://shop.test/b", landing([220, 30, 30]));
    let runner = VisualTestRunner::new(config(dir.path()), driver).unwrap();
    let suite = vec![
        VisualTest::new("Home Page", "https://shop.test/a"),
        VisualTest::new("home page", "https://shop.test/b"),
    ];

    let first = runner.run_suite(&suite).await;
    assert!(first.results[0].baseline_created);
    assert_eq!(first.results[1].status, TestStatus::Error);
    assert!(first.results[1].error.as_deref().unwrap().contains("duplicates"));

    let second = runner.run_suite(&suite).await;
    assert_eq!(second.results[0].status, TestStatus::Passed);
    assert_eq!(second.results[1].status, TestStatus::Error);
}

#[tokio::test]
async fn test_baseline_suite_and_reports() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(PageDriver::new("chromium"));
    driver.serve("https://shop.test/a", landing([1, 200, 1]));
    driver.serve("https://shop.test/b", landing([200, 1, 1]));
    let runner = VisualTestRunner::new(config(dir.path()), driver).unwrap();

    let urls = vec![
        "https://shop.test/a".to_string(),
        "https://shop.test/missing".to_string(),
        "https://shop.test/b".to_string(),
    ];
    let summary = runner.create_baseline_suite(&urls).await;
    assert_eq!(summary.total, 3);
    assert_eq!(summary.created, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].0, "https://shop.test/missing");
    assert!(runner.store().has_baseline(&TestId::new("baseline_1").unwrap()));
    assert!(!runner.store().has_baseline(&TestId::new("baseline_2").unwrap()));
    assert!(runner.store().has_baseline(&TestId::new("baseline_3").unwrap()));

    let report = runner
        .run_suite(&[VisualTest::new("baseline_1", "https://shop.test/a")])
        .await;
    assert_eq!(report.passed(), 1);
    assert!(!report.results[0].baseline_created);

    let paths = report
        .write_all(&runner.config().reports_dir, true)
        .unwrap();
    let json = std::fs::read_to_string(&paths.json).unwrap();
    let parsed: RunReport = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.run_id, report.run_id);
    let html = std::fs::read_to_string(&paths.html).unwrap();
    assert!(html.contains("data:image/png;base64,"));
    assert!(std::fs::read_to_string(&paths.junit).unwrap().contains("tests=\"1\""));
}

#[tokio::test]
async fn test_invalid_config_rejected_at_construction() {
    let driver = Arc::new(PageDriver::new("chromium"));
    let err = VisualTestRunner::new(VisualConfig::default().with_threshold(2.0), driver).unwrap_err();
    assert!(matches!(err, VistazoError::InvalidConfig { .. }));
}

#[test]
fn test_detector_on_rendered_page() {
    let mut page = RasterImage::filled(400, 300, [255, 255, 255]).unwrap();
    page.fill_rect(30, 30, 250, 50, [20, 90, 200]);
    page.fill_rect(30, 140, 140, 140, [90, 90, 90]);
    let found = UiElementDetector::default().detect(&page);
    let kinds: Vec<_> = found.iter().map(|c| c.kind).collect();
    assert_eq!(kinds, vec![vistazo::ElementKind::Button, vistazo::ElementKind::Image]);
}
