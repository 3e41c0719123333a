//! Chromium over CDP as a [`BrowserDriver`] (feature `browser`).

use crate::config::BrowserConfig;
use crate::driver::{BrowserDriver, Screenshot};
use crate::result::{VisionaryError, VisionaryResult};
use crate::selector::SelectorDescriptor;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams,
};
use chromiumoxide::page::Page as CdpPage;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// One browser with one page
#[derive(Debug)]
pub struct ChromiumDriver {
    browser: Arc<Mutex<CdpBrowser>>,
    page: CdpPage,
    width: u32,
    height: u32,
    handle: tokio::task::JoinHandle<()>,
}

impl ChromiumDriver {
    /// Launch chromium and open a blank page
    pub async fn launch(config: &BrowserConfig) -> VisionaryResult<Self> {
        let mut builder = CdpConfig::builder()
            .window_size(config.viewport_width, config.viewport_height)
            .no_sandbox();
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &config.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let cdp_config = builder.build().map_err(VisionaryError::driver)?;

        let (browser, mut handler) = CdpBrowser::launch(cdp_config)
            .await
            .map_err(|e| VisionaryError::driver(format!("launch failed: {e}")))?;

        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| VisionaryError::driver(e.to_string()))?;

        info!(
            headless = config.headless,
            viewport = %config.viewport(),
            "chromium launched"
        );
        Ok(Self {
            browser: Arc::new(Mutex::new(browser)),
            page,
            width: config.viewport_width,
            height: config.viewport_height,
            handle,
        })
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn navigate(&mut self, url: &str) -> VisionaryResult<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| VisionaryError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        debug!(url, "navigated");
        Ok(())
    }

    async fn screenshot(&self, full_page: bool) -> VisionaryResult<Screenshot> {
        let params = CaptureScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .capture_beyond_viewport(full_page)
            .build();
        let shot = self
            .page
            .execute(params)
            .await
            .map_err(|e| VisionaryError::driver(format!("screenshot failed: {e}")))?;

        use base64::Engine;
        let data = base64::engine::general_purpose::STANDARD
            .decode(&shot.data)
            .map_err(|e| VisionaryError::driver(format!("screenshot payload: {e}")))?;
        Ok(Screenshot::new(data, self.width, self.height))
    }

    async fn count_matches(&self, selector: &SelectorDescriptor) -> VisionaryResult<usize> {
        let result = self
            .page
            .evaluate(selector.to_count_query())
            .await
            .map_err(|e| VisionaryError::driver(format!("{selector}: {e}")))?;
        result
            .into_value::<usize>()
            .map_err(|e| VisionaryError::driver(format!("{selector}: {e}")))
    }

    async fn current_url(&self) -> VisionaryResult<String> {
        let url = self
            .page
            .url()
            .await
            .map_err(|e| VisionaryError::driver(e.to_string()))?;
        Ok(url.unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn close(&mut self) -> VisionaryResult<()> {
        let mut browser = self.browser.lock().await;
        browser
            .close()
            .await
            .map_err(|e| VisionaryError::driver(e.to_string()))?;
        self.handle.abort();
        Ok(())
    }
}
