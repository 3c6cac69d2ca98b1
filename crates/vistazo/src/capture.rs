//! Screenshot capture through a browser driver.
//!
//! The engine only needs PNG bytes for a URL. [`CaptureDriver`] is that seam;
//! [`capture_with_retry`] applies the navigation timeout policy around any
//! driver. A real Chromium driver over CDP is available with the `browser`
//! feature.

use crate::config::{VisualConfig, Viewport};
use crate::result::{VistazoError, VistazoResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When a page counts as loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitPolicy {
    /// The `load` event fired
    Load,
    /// The load event fired and no request was in flight for 500 ms
    #[default]
    NetworkIdle,
}

/// One screenshot request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Page to load
    pub url: String,
    /// Emulated window size
    pub viewport: Viewport,
    /// When the page counts as loaded
    pub wait: WaitPolicy,
    /// Capture the whole scrollable page rather than the viewport
    pub full_page: bool,
    /// Pause after load so animations can finish
    pub settle_delay: Duration,
    /// Budget for this attempt
    pub timeout: Duration,
}

impl CaptureRequest {
    /// Request for `url` using the viewport, mode and delays of `config`
    #[must_use]
    pub fn from_config(url: impl Into<String>, config: &VisualConfig) -> Self {
        Self {
            url: url.into(),
            viewport: config.viewport,
            wait: WaitPolicy::default(),
            full_page: config.full_page,
            settle_delay: config.settle_delay(),
            timeout: config.navigate_timeout(),
        }
    }

    #[must_use]
    pub const fn with_full_page(mut self, full_page: bool) -> Self {
        self.full_page = full_page;
        self
    }

    #[must_use]
    pub const fn with_wait(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }
}

/// Produces PNG screenshots of URLs
#[async_trait]
pub trait CaptureDriver: Send + Sync {
    /// Browser identifier, e.g. `chromium`
    fn name(&self) -> &str;

    /// Navigate to `request.url` and return a PNG screenshot
    ///
    /// Implementations do not need to enforce `request.timeout`;
    /// [`capture_with_retry`] bounds every attempt.
    async fn capture(&self, request: &CaptureRequest) -> VistazoResult<Vec<u8>>;
}

/// Capture with the navigation policy: one attempt, then one longer retry
///
/// Each attempt is cut off after its timeout. The error of the final attempt
/// is returned when both fail.
pub async fn capture_with_retry(
    driver: &dyn CaptureDriver,
    request: &CaptureRequest,
    retry_timeout: Duration,
) -> VistazoResult<Vec<u8>> {
    match attempt(driver, request).await {
        Ok(png) => Ok(png),
        Err(first) => {
            tracing::warn!(
                browser = driver.name(),
                url = %request.url,
                error = %first,
                retry_timeout_ms = retry_timeout.as_millis() as u64,
                "capture failed, retrying with extended timeout"
            );
            let retry = CaptureRequest {
                timeout: retry_timeout,
                ..request.clone()
            };
            attempt(driver, &retry).await
        }
    }
}

async fn attempt(driver: &dyn CaptureDriver, request: &CaptureRequest) -> VistazoResult<Vec<u8>> {
    match tokio::time::timeout(request.timeout, driver.capture(request)).await {
        Ok(result) => result,
        Err(_) => Err(VistazoError::Timeout {
            operation: format!("{} capture of {}", driver.name(), request.url),
            ms: request.timeout.as_millis() as u64,
        }),
    }
}

#[cfg(feature = "browser")]
pub use chromium::{ChromiumConfig, ChromiumDriver};

#[cfg(feature = "browser")]
mod chromium {
    use super::{CaptureDriver, CaptureRequest, WaitPolicy};
    use crate::result::{VistazoError, VistazoResult};
    use async_trait::async_trait;
    use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
    use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
    use chromiumoxide::cdp::browser_protocol::network::{
        EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
    };
    use chromiumoxide::cdp::browser_protocol::page::{
        CaptureScreenshotFormat, CaptureScreenshotParams, GetLayoutMetricsParams, Viewport as Clip,
    };
    use chromiumoxide::listeners::EventStream;
    use chromiumoxide::Page;
    use futures::StreamExt;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// How long the network must stay quiet for [`WaitPolicy::NetworkIdle`]
    const NETWORK_QUIET: Duration = Duration::from_millis(500);

    /// Chromium launch options
    #[derive(Debug, Clone)]
    pub struct ChromiumConfig {
        /// Run without a window
        pub headless: bool,
        /// Keep the Chromium sandbox enabled
        pub sandbox: bool,
        /// Explicit Chromium executable
        pub chromium_path: Option<String>,
    }

    impl Default for ChromiumConfig {
        fn default() -> Self {
            Self {
                headless: true,
                sandbox: true,
                chromium_path: None,
            }
        }
    }

    /// Chromium driven over the DevTools protocol
    #[derive(Debug)]
    pub struct ChromiumDriver {
        inner: Arc<Mutex<CdpBrowser>>,
        handle: tokio::task::JoinHandle<()>,
    }

    impl ChromiumDriver {
        /// Launch a browser instance
        pub async fn launch(config: ChromiumConfig) -> VistazoResult<Self> {
            let mut builder = CdpConfig::builder();
            if !config.headless {
                builder = builder.with_head();
            }
            if !config.sandbox {
                builder = builder.no_sandbox();
            }
            if let Some(ref path) = config.chromium_path {
                builder = builder.chrome_executable(path);
            }
            let cdp_config = builder
                .build()
                .map_err(|e| VistazoError::capture("about:blank", format!("launch: {e}")))?;

            let (browser, mut handler) = CdpBrowser::launch(cdp_config)
                .await
                .map_err(|e| VistazoError::capture("about:blank", format!("launch: {e}")))?;

            let handle = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });

            tracing::info!(headless = config.headless, "chromium launched");
            Ok(Self {
                inner: Arc::new(Mutex::new(browser)),
                handle,
            })
        }

        /// Close the browser
        pub async fn close(self) -> VistazoResult<()> {
            let mut browser = self.inner.lock().await;
            browser
                .close()
                .await
                .map_err(|e| VistazoError::capture("about:blank", format!("close: {e}")))?;
            self.handle.abort();
            Ok(())
        }
    }

    #[async_trait]
    impl CaptureDriver for ChromiumDriver {
        fn name(&self) -> &str {
            "chromium"
        }

        async fn capture(&self, request: &CaptureRequest) -> VistazoResult<Vec<u8>> {
            let page = {
                let browser = self.inner.lock().await;
                browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| VistazoError::capture(&request.url, format!("new page: {e}")))?
            };

            let tab = OpenTab(Some(page.clone()));
            let result = capture_on(&page, request).await;
            tab.close().await;
            result
        }
    }

    async fn capture_on(page: &Page, request: &CaptureRequest) -> VistazoResult<Vec<u8>> {
        let url = request.url.as_str();
        let fail = |stage: &str, e: &dyn std::fmt::Display| VistazoError::capture(url, format!("{stage}: {e}"));

        page.execute(SetDeviceMetricsOverrideParams::new(
            i64::from(request.viewport.width),
            i64::from(request.viewport.height),
            1.0,
            false,
        ))
        .await
        .map_err(|e| fail("viewport", &e))?;

        let network = match request.wait {
            WaitPolicy::NetworkIdle => Some(
                NetworkWatch::subscribe(page)
                    .await
                    .map_err(|e| fail("network events", &e))?,
            ),
            WaitPolicy::Load => None,
        };
        page.goto(url).await.map_err(|e| fail("navigate", &e))?;
        if let Some(network) = network {
            network.wait_idle(NETWORK_QUIET).await;
        }
        tokio::time::sleep(request.settle_delay).await;

        let mut params = CaptureScreenshotParams::builder().format(CaptureScreenshotFormat::Png);
        if request.full_page {
            let metrics = page
                .execute(GetLayoutMetricsParams::default())
                .await
                .map_err(|e| fail("layout metrics", &e))?;
            let content = &metrics.css_content_size;
            let clip = Clip::builder()
                .x(0.0)
                .y(0.0)
                .width(content.width)
                .height(content.height)
                .scale(1.0)
                .build()
                .map_err(|e| fail("clip", &e))?;
            params = params.clip(clip).capture_beyond_viewport(true);
        }

        let screenshot = page
            .execute(params.build())
            .await
            .map_err(|e| fail("screenshot", &e))?;

        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(&screenshot.data)
            .map_err(|e| fail("decode screenshot payload", &e))
    }

    /// A capture tab that is closed on every exit path
    ///
    /// [`OpenTab::close`] closes it in line. If the capture future is dropped
    /// first (an attempt timeout), the close is spawned onto the runtime.
    struct OpenTab(Option<Page>);

    impl OpenTab {
        async fn close(mut self) {
            if let Some(page) = self.0.take() {
                close_page(page).await;
            }
        }
    }

    impl Drop for OpenTab {
        fn drop(&mut self) {
            if let Some(page) = self.0.take() {
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    runtime.spawn(close_page(page));
                }
            }
        }
    }

    async fn close_page(page: Page) {
        if let Err(e) = page.close().await {
            tracing::warn!(error = %e, "failed to close capture tab");
        }
    }

    /// Request lifecycle events of one page
    ///
    /// Subscribed before navigation so no request of the page load is missed.
    struct NetworkWatch {
        started: EventStream<EventRequestWillBeSent>,
        finished: EventStream<EventLoadingFinished>,
        failed: EventStream<EventLoadingFailed>,
    }

    impl NetworkWatch {
        async fn subscribe(page: &Page) -> chromiumoxide::error::Result<Self> {
            Ok(Self {
                started: page.event_listener::<EventRequestWillBeSent>().await?,
                finished: page.event_listener::<EventLoadingFinished>().await?,
                failed: page.event_listener::<EventLoadingFailed>().await?,
            })
        }

        /// Resolve once no request has been in flight for `quiet`
        ///
        /// A request that never settles (long polling) keeps this pending;
        /// the attempt timeout of [`super::capture_with_retry`] bounds it.
        async fn wait_idle(mut self, quiet: Duration) {
            let mut in_flight: HashSet<String> = HashSet::new();
            loop {
                tokio::select! {
                    Some(event) = self.started.next() => {
                        in_flight.insert(event.request_id.inner().clone());
                    }
                    Some(event) = self.finished.next() => {
                        in_flight.remove(event.request_id.inner());
                    }
                    Some(event) = self.failed.next() => {
                        in_flight.remove(event.request_id.inner());
                    }
                    () = tokio::time::sleep(quiet), if in_flight.is_empty() => return,
                    else => return,
                }
            }
        }
    }
}
