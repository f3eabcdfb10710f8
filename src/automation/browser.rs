use anyhow::{Context, Result};
use serde_json::json;
use thirtyfour::prelude::*;
use tokio::time::Duration;
use tracing::{debug, info};

use super::wait::{poll_until, WaitStrategy};
use crate::error::AutomationError;

/// Waits for the first match of a selector inside a scope, resolving as soon
/// as a MutationObserver sees it or returning null on timeout. The scope is
/// the third argument (null means the whole document); the WebDriver-provided
/// callback is always last.
const OBSERVER_WAIT_SCRIPT: &str = r#"
var selector = arguments[0];
var timeoutMs = arguments[1];
var scope = arguments[2] || document;
var done = arguments[arguments.length - 1];
var existing = scope.querySelector(selector);
if (existing) { done(existing); return; }
var observer = new MutationObserver(function () {
    var element = scope.querySelector(selector);
    if (element) { clearTimeout(timer); observer.disconnect(); done(element); }
});
var timer = setTimeout(function () { observer.disconnect(); done(null); }, timeoutMs);
observer.observe(scope === document ? document.documentElement : scope,
    { childList: true, subtree: true, attributes: true });
"#;

/// Thin wrapper over the WebDriver session. Every host-page access in the
/// engine funnels through here.
pub struct BrowserDriver {
    driver: WebDriver,
    strategy: WaitStrategy,
    poll_interval: Duration,
}

impl BrowserDriver {
    pub async fn new(
        headless: bool,
        driver_port: u16,
        strategy: WaitStrategy,
        poll_interval: Duration,
    ) -> Result<Self> {
        let mut caps = DesiredCapabilities::chrome();

        // The submission windows the engine opens must not be swallowed by
        // the pop-up blocker.
        let mut chrome_args = vec![
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-gpu".to_string(),
            "--disable-popup-blocking".to_string(),
            "--window-size=1920,1080".to_string(),
        ];
        if headless {
            chrome_args.push("--headless".to_string());
        }
        for arg in &chrome_args {
            caps.add_arg(arg)?;
        }

        let server_url = format!("http://localhost:{driver_port}");
        let mut last_error = None;
        for attempt in 1..=3 {
            debug!("connecting to chromedriver, attempt {attempt}/3");
            match WebDriver::new(&server_url, caps.clone()).await {
                Ok(driver) => {
                    info!("connected to chromedriver on port {driver_port}");
                    return Ok(Self {
                        driver,
                        strategy,
                        poll_interval,
                    });
                }
                Err(e) => {
                    debug!("attempt {attempt} failed: {e}");
                    last_error = Some(e);
                    if attempt < 3 {
                        tokio::time::sleep(Duration::from_millis(1000)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap())
            .context("Failed to connect to chromedriver after 3 attempts")
    }

    pub fn webdriver(&self) -> &WebDriver {
        &self.driver
    }

    pub async fn navigate(&self, url: &str) -> Result<(), AutomationError> {
        self.driver.goto(url).await?;
        Ok(())
    }

    pub async fn find_element(&self, selector: By) -> Result<WebElement, AutomationError> {
        Ok(self.driver.find(selector).await?)
    }

    pub async fn find_elements(&self, selector: By) -> Result<Vec<WebElement>, AutomationError> {
        Ok(self.driver.find_all(selector).await?)
    }

    /// Suspends until the selector matches somewhere in the document, or
    /// fails with `Timeout` once the deadline passes.
    pub async fn wait_for_element(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<WebElement, AutomationError> {
        match self.strategy {
            WaitStrategy::Polling => self.wait_with_polling(None, selector, timeout).await,
            WaitStrategy::Observer => self.wait_with_observer(None, selector, timeout).await,
        }
    }

    /// Same contract as [`wait_for_element`], searching only inside `scope`.
    ///
    /// [`wait_for_element`]: Self::wait_for_element
    pub async fn wait_for_element_within(
        &self,
        scope: &WebElement,
        selector: &str,
        timeout: Duration,
    ) -> Result<WebElement, AutomationError> {
        match self.strategy {
            WaitStrategy::Polling => self.wait_with_polling(Some(scope), selector, timeout).await,
            WaitStrategy::Observer => self.wait_with_observer(Some(scope), selector, timeout).await,
        }
    }

    async fn wait_with_polling(
        &self,
        scope: Option<&WebElement>,
        selector: &str,
        timeout: Duration,
    ) -> Result<WebElement, AutomationError> {
        let driver = self.driver.clone();
        let scope = scope.cloned();
        let by = By::Css(selector);
        let found = poll_until(self.poll_interval, timeout, move || {
            let driver = driver.clone();
            let scope = scope.clone();
            let by = by.clone();
            async move {
                match &scope {
                    Some(element) => element.find(by).await.ok(),
                    None => driver.find(by).await.ok(),
                }
            }
        })
        .await;

        found.ok_or_else(|| AutomationError::timeout(selector, timeout))
    }

    async fn wait_with_observer(
        &self,
        scope: Option<&WebElement>,
        selector: &str,
        timeout: Duration,
    ) -> Result<WebElement, AutomationError> {
        // The async script must be allowed to run for the whole wait.
        self.driver
            .set_script_timeout(timeout + Duration::from_secs(2))
            .await?;

        let scope_arg = match scope {
            Some(element) => json!(element),
            None => serde_json::Value::Null,
        };
        let ret = self
            .driver
            .execute_async(
                OBSERVER_WAIT_SCRIPT,
                vec![json!(selector), json!(timeout.as_millis() as u64), scope_arg],
            )
            .await?;

        if ret.json().is_null() {
            Err(AutomationError::timeout(selector, timeout))
        } else {
            Ok(ret.element()?)
        }
    }

    pub async fn execute_script(
        &self,
        script: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<(), AutomationError> {
        self.driver.execute(script, args).await?;
        Ok(())
    }

    pub async fn execute_script_and_get_value(
        &self,
        script: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, AutomationError> {
        let ret = self.driver.execute(script, args).await?;
        Ok(ret.json().clone())
    }

    pub async fn quit(&self) -> Result<(), AutomationError> {
        let driver_clone = self.driver.clone();
        driver_clone.quit().await?;
        Ok(())
    }
}
