use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;
use thirtyfour::prelude::*;
use thirtyfour::WindowHandle;
use tracing::{debug, info, warn};

use crate::error::AutomationError;

const OPEN_WINDOW_SCRIPT: &str = r#"
var novaJanela = window.open('', arguments[0], arguments[1]);
if (novaJanela) { novaJanela.blur(); }
return novaJanela !== null;
"#;

const INJECT_BUTTON_SCRIPT: &str = r#"
if (document.getElementById('botao-fechar-janelas')) { return false; }
var botao = document.createElement('button');
botao.id = 'botao-fechar-janelas';
botao.innerHTML = '❌ Fechar Janelas Abertas (0)';
Object.assign(botao.style, {
    position: 'fixed', bottom: '20px', right: '20px', zIndex: '10000',
    padding: '12px 20px', backgroundColor: '#dc3545', color: 'white',
    border: 'none', borderRadius: '8px', cursor: 'pointer',
    fontSize: '16px', boxShadow: '0 4px 8px rgba(0,0,0,0.2)'
});
botao.onclick = function () { window.__osAutomatorCloseAll = true; };
document.body.appendChild(botao);
return true;
"#;

const BUTTON_PRESENT_SCRIPT: &str =
    "return document.getElementById('botao-fechar-janelas') !== null;";

const UPDATE_COUNTER_SCRIPT: &str = r#"
var botao = document.getElementById('botao-fechar-janelas');
if (botao) { botao.innerHTML = '❌ Fechar Janelas Abertas (' + arguments[0] + ')'; }
"#;

/// The button runs in the page and cannot call back into the engine, so a
/// click only raises a flag; the engine polls and clears it between rows.
const TAKE_CLOSE_REQUEST_SCRIPT: &str = r#"
var requested = window.__osAutomatorCloseAll === true;
window.__osAutomatorCloseAll = false;
return requested;
"#;

/// Session and host-page operations the window tracker needs. Narrow on
/// purpose so the bookkeeping can be exercised against a fake in tests.
#[async_trait]
pub trait WindowPort {
    /// Opens an unfocused background window named `name` from the page.
    async fn open_window(&self, name: &str, features: &str) -> Result<(), AutomationError>;
    /// Every window handle the browser currently knows about.
    async fn live_handles(&self) -> Result<Vec<String>, AutomationError>;
    /// Best effort: the window may already be gone.
    async fn close_window(&self, handle: &str) -> Result<(), AutomationError>;
    async fn update_counter(&self, open: usize) -> Result<(), AutomationError>;
    async fn take_close_request(&self) -> Result<bool, AutomationError>;
}

/// Production port backed by the WebDriver session.
pub struct WebDriverWindows {
    driver: WebDriver,
    main_handle: WindowHandle,
}

impl WebDriverWindows {
    pub async fn new(driver: WebDriver) -> Result<Self, AutomationError> {
        let main_handle = driver.window().await?;
        Ok(Self {
            driver,
            main_handle,
        })
    }

    /// Injects the floating close-windows button into the host page.
    /// Returns false when the button is already there.
    pub async fn inject_button(&self) -> Result<bool, AutomationError> {
        let ret = self.driver.execute(INJECT_BUTTON_SCRIPT, vec![]).await?;
        Ok(ret.json().as_bool().unwrap_or(false))
    }

    pub async fn button_present(&self) -> Result<bool, AutomationError> {
        let ret = self.driver.execute(BUTTON_PRESENT_SCRIPT, vec![]).await?;
        Ok(ret.json().as_bool().unwrap_or(false))
    }
}

#[async_trait]
impl WindowPort for WebDriverWindows {
    async fn open_window(&self, name: &str, features: &str) -> Result<(), AutomationError> {
        self.driver
            .execute(OPEN_WINDOW_SCRIPT, vec![json!(name), json!(features)])
            .await?;
        Ok(())
    }

    async fn live_handles(&self) -> Result<Vec<String>, AutomationError> {
        let handles = self.driver.windows().await?;
        Ok(handles.into_iter().map(|handle| handle.to_string()).collect())
    }

    async fn close_window(&self, handle: &str) -> Result<(), AutomationError> {
        let target = WindowHandle::from(handle.to_string());
        if self.driver.switch_to_window(target).await.is_ok() {
            let _ = self.driver.close_window().await;
        }
        self.driver
            .switch_to_window(self.main_handle.clone())
            .await?;
        Ok(())
    }

    async fn update_counter(&self, open: usize) -> Result<(), AutomationError> {
        self.driver
            .execute(UPDATE_COUNTER_SCRIPT, vec![json!(open)])
            .await?;
        Ok(())
    }

    async fn take_close_request(&self) -> Result<bool, AutomationError> {
        let ret = self
            .driver
            .execute(TAKE_CLOSE_REQUEST_SCRIPT, vec![])
            .await?;
        Ok(ret.json().as_bool().unwrap_or(false))
    }
}

/// Life-cycle manager for the background windows that receive form
/// submissions.
///
/// Owns every window it opens. Windows are released either one by one when
/// the browser reports them closed, or en masse through `close_all` —
/// manual (the injected button) and automatic (the soft limit) cleanup both
/// land there. Without the limit the window count would grow without bound
/// on large listings.
pub struct WindowTracker<P: WindowPort> {
    port: P,
    tracked: Vec<Option<String>>,
    limit: usize,
}

impl<P: WindowPort> WindowTracker<P> {
    pub fn new(port: P, limit: usize) -> Self {
        Self {
            port,
            tracked: Vec::new(),
            limit,
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    /// Opens a background submission window and registers its handle.
    ///
    /// A pop-up swallowed by the browser produces no new handle; it is
    /// tracked as `None` and treated as already closed, never as an error.
    pub async fn open(&mut self, name: &str, features: &str) -> Result<(), AutomationError> {
        let before: HashSet<String> = self.port.live_handles().await?.into_iter().collect();
        self.port.open_window(name, features).await?;
        let after = self.port.live_handles().await?;
        let new_handle = after.into_iter().find(|handle| !before.contains(handle));

        if new_handle.is_none() {
            warn!("pop-up \"{name}\" was blocked; tracking it as already closed");
        } else {
            debug!("tracking submission window \"{name}\"");
        }
        self.tracked.push(new_handle);

        let open = self.count_open().await?;
        self.port.update_counter(open).await?;
        Ok(())
    }

    /// How many tracked windows the browser still reports as open. Windows
    /// the operator closed by hand fall out of the count on their own.
    pub async fn count_open(&self) -> Result<usize, AutomationError> {
        if self.tracked.is_empty() {
            return Ok(0);
        }
        let live: HashSet<String> = self.port.live_handles().await?.into_iter().collect();
        Ok(self
            .tracked
            .iter()
            .flatten()
            .filter(|handle| live.contains(*handle))
            .count())
    }

    /// Whether the soft limit has been reached and a cleanup pass is due.
    pub async fn should_flush(&self) -> Result<bool, AutomationError> {
        Ok(self.count_open().await? >= self.limit)
    }

    /// Closes every tracked window still open and forgets all of them.
    /// Calling this with nothing tracked is a no-op.
    pub async fn close_all(&mut self) -> Result<(), AutomationError> {
        if self.tracked.is_empty() {
            self.port.update_counter(0).await?;
            return Ok(());
        }

        info!("Closing {} tracked windows...", self.tracked.len());
        let live: HashSet<String> = self.port.live_handles().await?.into_iter().collect();
        let mut closed = 0usize;
        for handle in self.tracked.iter().flatten() {
            if live.contains(handle) {
                self.port.close_window(handle).await?;
                closed += 1;
            }
        }
        info!("{closed} windows were closed");
        self.tracked.clear();
        self.port.update_counter(0).await?;
        Ok(())
    }

    pub fn tracked_len(&self) -> usize {
        self.tracked.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeState {
        live: Vec<String>,
        counter_updates: Vec<usize>,
        next_id: usize,
        block_next_open: bool,
        close_requested: bool,
    }

    #[derive(Default)]
    struct FakePort {
        state: Mutex<FakeState>,
    }

    impl FakePort {
        fn close_by_hand(&self, handle: &str) {
            let mut state = self.state.lock().unwrap();
            state.live.retain(|h| h != handle);
        }

        fn block_next_open(&self) {
            self.state.lock().unwrap().block_next_open = true;
        }

        fn last_counter(&self) -> Option<usize> {
            self.state.lock().unwrap().counter_updates.last().copied()
        }
    }

    #[async_trait]
    impl WindowPort for FakePort {
        async fn open_window(&self, _name: &str, _features: &str) -> Result<(), AutomationError> {
            let mut state = self.state.lock().unwrap();
            if state.block_next_open {
                state.block_next_open = false;
                return Ok(());
            }
            state.next_id += 1;
            let handle = format!("window-{}", state.next_id);
            state.live.push(handle);
            Ok(())
        }

        async fn live_handles(&self) -> Result<Vec<String>, AutomationError> {
            Ok(self.state.lock().unwrap().live.clone())
        }

        async fn close_window(&self, handle: &str) -> Result<(), AutomationError> {
            self.close_by_hand(handle);
            Ok(())
        }

        async fn update_counter(&self, open: usize) -> Result<(), AutomationError> {
            self.state.lock().unwrap().counter_updates.push(open);
            Ok(())
        }

        async fn take_close_request(&self) -> Result<bool, AutomationError> {
            let mut state = self.state.lock().unwrap();
            let requested = state.close_requested;
            state.close_requested = false;
            Ok(requested)
        }
    }

    #[tokio::test]
    async fn open_registers_the_new_handle_and_updates_the_counter() {
        let mut tracker = WindowTracker::new(FakePort::default(), 5);
        tracker.open("os_submission_1", "width=800").await.unwrap();
        tracker.open("os_submission_2", "width=800").await.unwrap();

        assert_eq!(tracker.tracked_len(), 2);
        assert_eq!(tracker.count_open().await.unwrap(), 2);
        assert_eq!(tracker.port().last_counter(), Some(2));
    }

    #[tokio::test]
    async fn blocked_popup_is_tracked_as_already_closed() {
        let mut tracker = WindowTracker::new(FakePort::default(), 5);
        tracker.port.block_next_open();
        tracker.open("os_submission_1", "width=800").await.unwrap();

        assert_eq!(tracker.tracked_len(), 1);
        assert_eq!(tracker.count_open().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn windows_closed_by_hand_fall_out_of_the_open_count() {
        let mut tracker = WindowTracker::new(FakePort::default(), 5);
        tracker.open("a", "").await.unwrap();
        tracker.open("b", "").await.unwrap();
        tracker.port().close_by_hand("window-1");

        assert_eq!(tracker.count_open().await.unwrap(), 1);
        // Still tracked; only close_all forgets handles.
        assert_eq!(tracker.tracked_len(), 2);
    }

    #[tokio::test]
    async fn close_all_always_leaves_zero_open_and_nothing_tracked() {
        let mut tracker = WindowTracker::new(FakePort::default(), 5);
        tracker.open("a", "").await.unwrap();
        tracker.open("b", "").await.unwrap();
        tracker.port().close_by_hand("window-2");

        tracker.close_all().await.unwrap();
        assert_eq!(tracker.count_open().await.unwrap(), 0);
        assert_eq!(tracker.tracked_len(), 0);
        assert_eq!(tracker.port().last_counter(), Some(0));
        assert!(tracker.port().state.lock().unwrap().live.is_empty());

        // Idempotent on an empty collection.
        tracker.close_all().await.unwrap();
        assert_eq!(tracker.count_open().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn should_flush_fires_exactly_at_the_soft_limit() {
        let mut tracker = WindowTracker::new(FakePort::default(), 3);
        tracker.open("a", "").await.unwrap();
        tracker.open("b", "").await.unwrap();
        assert!(!tracker.should_flush().await.unwrap());

        tracker.open("c", "").await.unwrap();
        assert!(tracker.should_flush().await.unwrap());

        tracker.close_all().await.unwrap();
        assert!(!tracker.should_flush().await.unwrap());
    }

    #[tokio::test]
    async fn close_request_flag_is_consumed_on_read() {
        let port = FakePort::default();
        port.state.lock().unwrap().close_requested = true;
        assert!(port.take_close_request().await.unwrap());
        assert!(!port.take_close_request().await.unwrap());
    }
}
