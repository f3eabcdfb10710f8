use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::automation::wait::poll_until;

/// Owns a locally spawned chromedriver process for the length of a run.
///
/// Only used when the configuration asks for a managed driver; pointing the
/// tool at an already running chromedriver skips this entirely.
pub struct ChromeDriverManager {
    driver_path: PathBuf,
    process: Arc<Mutex<Option<Child>>>,
}

impl ChromeDriverManager {
    pub fn new(driver_path: Option<PathBuf>) -> Self {
        let driver_path = driver_path.unwrap_or_else(|| PathBuf::from("chromedriver"));
        Self {
            driver_path,
            process: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn start_driver(&self, port: u16) -> Result<()> {
        let mut process_guard = self.process.lock().await;
        if process_guard.is_some() {
            debug!("chromedriver is already running on port {port}");
            return Ok(());
        }

        info!("Starting chromedriver on port {port}...");
        let child = Command::new(&self.driver_path)
            .arg(format!("--port={port}"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| {
                format!(
                    "Failed to start chromedriver from {:?}. Install it or point --chromedriver-path at the binary.",
                    self.driver_path
                )
            })?;
        *process_guard = Some(child);

        if !self.wait_for_readiness(port, Duration::from_secs(10)).await {
            return Err(anyhow!(
                "chromedriver did not become ready within 10 seconds; is Chrome installed?"
            ));
        }
        info!("✅ chromedriver ready on port {port}");
        Ok(())
    }

    pub async fn stop_driver(&self) {
        let mut process_guard = self.process.lock().await;
        if let Some(mut child) = process_guard.take() {
            let _ = child.kill();
            let _ = child.wait();
            info!("chromedriver stopped");
        }
    }

    async fn wait_for_readiness(&self, port: u16, timeout: Duration) -> bool {
        let client = reqwest::Client::new();
        let url = format!("http://localhost:{port}/status");
        poll_until(Duration::from_millis(500), timeout, || {
            let client = client.clone();
            let url = url.clone();
            async move {
                match client.get(&url).send().await {
                    Ok(response) if response.status().is_success() => Some(()),
                    _ => None,
                }
            }
        })
        .await
        .is_some()
    }
}

impl Drop for ChromeDriverManager {
    fn drop(&mut self) {
        // Best effort cleanup
        if let Ok(mut process_guard) = self.process.try_lock() {
            if let Some(mut child) = process_guard.take() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}
