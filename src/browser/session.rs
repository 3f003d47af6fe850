//! Browser lifecycle: one process, one persona-shaped context, one active
//! page at a time with tab following.

use std::collections::HashSet;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    MediaFeature, SetDeviceMetricsOverrideParams, SetEmulatedMediaParams,
    SetLocaleOverrideParams, SetTimezoneOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, PrintToPdfParams,
};
use chromiumoxide::cdp::browser_protocol::target::TargetId;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::persona::ContextOptions;

/// Ceiling for one navigation.
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub headless: bool,
    pub context: ContextOptions,
}

/// Health of the active page, checked between suspension points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageHealth {
    /// The active page is alive.
    Alive,
    /// The active page died and a survivor was adopted.
    SwitchedTo(String),
}

pub struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    active: Page,
    known_targets: HashSet<TargetId>,
    config: SessionConfig,
    followed_once: bool,
}

impl BrowserSession {
    /// Launch the browser and open the initial page shaped by the persona
    /// context.
    pub async fn launch(config: SessionConfig) -> Result<Self, AgentError> {
        let mut builder = BrowserConfig::builder()
            .window_size(config.context.viewport_width, config.context.viewport_height)
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run");
        if !config.headless {
            builder = builder.with_head();
        }
        let browser_config = builder.build().map_err(AgentError::launch)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|err| AgentError::launch(err.to_string()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let active = browser
            .new_page("about:blank")
            .await
            .map_err(|err| AgentError::launch(err.to_string()))?;
        apply_context(&active, &config.context).await?;

        let mut known_targets = HashSet::new();
        known_targets.insert(active.target_id().clone());
        if let Ok(pages) = browser.pages().await {
            for page in pages {
                known_targets.insert(page.target_id().clone());
            }
        }

        info!(
            headless = config.headless,
            viewport_width = config.context.viewport_width,
            viewport_height = config.context.viewport_height,
            "browser session ready"
        );

        Ok(Self {
            browser,
            handler_task,
            active,
            known_targets,
            config,
            followed_once: false,
        })
    }

    pub fn active(&self) -> &Page {
        &self.active
    }

    pub fn viewport(&self) -> (u32, u32) {
        (
            self.config.context.viewport_width,
            self.config.context.viewport_height,
        )
    }

    /// Navigate the active page. Timeouts and navigation errors come back as
    /// [`AgentError::Navigation`]; the caller treats them as warnings.
    pub async fn navigate(&self, url: &str) -> Result<(), AgentError> {
        match timeout(NAVIGATION_TIMEOUT, self.active.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(AgentError::navigation(err.to_string())),
            Err(_) => Err(AgentError::navigation(format!(
                "navigation to {url} exceeded {}s",
                NAVIGATION_TIMEOUT.as_secs()
            ))),
        }
    }

    /// Current address of the active page, redacted to scheme/host/path so
    /// it is safe to persist and to show.
    pub async fn url(&self) -> String {
        let raw = self
            .active
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| "about:blank".to_string());
        crate::redact::url(&raw)
    }

    pub async fn title(&self) -> String {
        self.active
            .get_title()
            .await
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    /// Viewport screenshot of the active page as PNG bytes.
    pub async fn screenshot_png(&self) -> Result<Vec<u8>, AgentError> {
        self.active
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await
            .map_err(|err| AgentError::perception(format!("screenshot failed: {err}")))
    }

    /// Render the given HTML in a scratch page and print it to PDF. Used by
    /// the report builder while the browser is still up.
    pub async fn render_pdf(&self, html: &str) -> Result<Vec<u8>, AgentError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|err| AgentError::artifact(err.to_string()))?;
        let result = async {
            page.set_content(html)
                .await
                .map_err(|err| AgentError::artifact(err.to_string()))?;
            page.pdf(PrintToPdfParams::default())
                .await
                .map_err(|err| AgentError::artifact(err.to_string()))
        }
        .await;
        let _ = page.close().await;
        // The scratch page is not a navigable tab; forget its target.
        result
    }

    /// Adopt a page opened since the last scan. Only the first new page is
    /// auto-followed; later ones are tracked but not switched to.
    ///
    /// The check runs between suspension points, so the active page is never
    /// reassigned mid-action.
    pub async fn follow_new_page(&mut self) -> Result<Option<String>, AgentError> {
        let pages = match self.browser.pages().await {
            Ok(pages) => pages,
            Err(err) => {
                debug!(error = %err, "page scan failed");
                return Ok(None);
            }
        };

        let mut adopted = None;
        for page in pages {
            let target = page.target_id().clone();
            if self.known_targets.insert(target) && adopted.is_none() && !self.followed_once {
                adopted = Some(page);
            }
        }

        let Some(page) = adopted else {
            return Ok(None);
        };
        self.followed_once = true;
        let _ = page.bring_to_front().await;
        apply_context(&page, &self.config.context).await.ok();
        self.active = page;
        let url = self.url().await;
        info!(url = %url, "followed new tab");
        Ok(Some(url))
    }

    /// Verify the active page is still alive; switch to a survivor when it is
    /// not. No survivors means the run must stop.
    pub async fn check_active(&mut self) -> Result<PageHealth, AgentError> {
        if self.active.url().await.is_ok() {
            return Ok(PageHealth::Alive);
        }
        warn!("active page closed or crashed, looking for survivors");
        let pages = self
            .browser
            .pages()
            .await
            .map_err(|_| AgentError::PageLost)?;
        let survivor = pages.into_iter().last().ok_or(AgentError::PageLost)?;
        let _ = survivor.bring_to_front().await;
        self.known_targets.insert(survivor.target_id().clone());
        self.active = survivor;
        let url = self.url().await;
        Ok(PageHealth::SwitchedTo(url))
    }

    /// Tear down the browser. Failures are logged, never propagated.
    pub async fn close(mut self) {
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "browser close failed");
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
    }
}

/// Apply persona-derived emulation overrides to a page.
async fn apply_context(page: &Page, context: &ContextOptions) -> Result<(), AgentError> {
    let metrics = SetDeviceMetricsOverrideParams::new(
        context.viewport_width as i64,
        context.viewport_height as i64,
        context.device_scale_factor,
        false,
    );
    page.execute(metrics)
        .await
        .map_err(|err| AgentError::launch(format!("device metrics: {err}")))?;

    page.execute(SetLocaleOverrideParams {
        locale: Some(context.locale.clone()),
    })
    .await
    .map_err(|err| AgentError::launch(format!("locale: {err}")))?;

    page.execute(SetTimezoneOverrideParams::new(context.timezone.clone()))
        .await
        .map_err(|err| AgentError::launch(format!("timezone: {err}")))?;

    if context.reduced_motion {
        let features = vec![MediaFeature::new("prefers-reduced-motion", "reduce")];
        page.execute(SetEmulatedMediaParams {
            media: None,
            features: Some(features),
        })
        .await
        .map_err(|err| AgentError::launch(format!("media emulation: {err}")))?;
    }
    Ok(())
}
