//! The host page the pipeline runs inside.
//!
//! Everything the pipeline needs from its surroundings goes through
//! [`PageEnvironment`]: the current route, lifecycle and history signals,
//! an optional beacon, and idle callbacks. [`PageHandle`] is an in-process
//! implementation that a host drives from its own event sources.

use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, Notify};

/// Capacity of the page signal channel. Slow listeners skip old signals.
const SIGNAL_CAPACITY: usize = 64;

/// Whether the page is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Which history entry point changed the route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMethod {
    Push,
    Replace,
    Pop,
}

/// A history mutation observed on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryChange {
    pub method: HistoryMethod,
    pub route: String,
}

/// Signals the page broadcasts to interested listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSignal {
    /// The page is being hidden or unloaded
    PageHide,
    /// Visibility changed
    VisibilityChange(Visibility),
    /// A history entry point ran
    History(HistoryChange),
}

/// Fire-and-forget send that the host guarantees to enqueue even while the
/// page is being discarded. The response is never observed.
pub trait Beacon: Send + Sync {
    /// Returns `true` if the payload was accepted for delivery.
    fn send_beacon(&self, url: &str, body: &str) -> bool;
}

/// The page the pipeline is embedded in.
pub trait PageEnvironment: Send + Sync {
    /// `false` when running outside a browser-like host, e.g. during
    /// server-side rendering.
    fn is_browser(&self) -> bool;

    /// Path of the current location.
    fn current_route(&self) -> String;

    /// User agent string reported with each event.
    fn user_agent(&self) -> String {
        String::new()
    }

    /// Subscribe to lifecycle and history signals.
    fn subscribe(&self) -> Option<broadcast::Receiver<PageSignal>> {
        None
    }

    /// Beacon capability, if the host has one.
    fn beacon(&self) -> Option<Arc<dyn Beacon>> {
        None
    }

    /// Notified when the event loop goes idle, if the host supports idle
    /// callbacks.
    fn idle_notifier(&self) -> Option<Arc<Notify>> {
        None
    }
}

/// In-process page environment.
pub struct PageHandle {
    route: RwLock<String>,
    user_agent: String,
    browser: bool,
    signals: broadcast::Sender<PageSignal>,
    beacon: Option<Arc<dyn Beacon>>,
    idle: Option<Arc<Notify>>,
}

impl PageHandle {
    /// A browser-like page at `route` with idle callbacks and no beacon.
    pub fn new(route: &str) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            route: RwLock::new(route.to_string()),
            user_agent: String::new(),
            browser: true,
            signals,
            beacon: None,
            idle: Some(Arc::new(Notify::new())),
        }
    }

    /// A server-side context: the pipeline refuses to start here.
    pub fn server() -> Self {
        Self {
            browser: false,
            idle: None,
            ..Self::new("/")
        }
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    pub fn with_beacon(mut self, beacon: Arc<dyn Beacon>) -> Self {
        self.beacon = Some(beacon);
        self
    }

    /// Drop idle callback support; deferred work falls back to a zero delay.
    pub fn without_idle_callbacks(mut self) -> Self {
        self.idle = None;
        self
    }

    /// Navigate by pushing a history entry.
    pub fn push_state(&self, route: &str) {
        self.apply_history(HistoryMethod::Push, route);
    }

    /// Navigate by replacing the current history entry.
    pub fn replace_state(&self, route: &str) {
        self.apply_history(HistoryMethod::Replace, route);
    }

    /// Back/forward navigation.
    pub fn pop_state(&self, route: &str) {
        self.apply_history(HistoryMethod::Pop, route);
    }

    /// Change the location without any history signal, as navigations that
    /// bypass the history entry points do.
    pub fn set_route(&self, route: &str) {
        *self
            .route
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = route.to_string();
    }

    /// The page is being hidden or unloaded.
    pub fn hide(&self) {
        self.emit(PageSignal::PageHide);
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        self.emit(PageSignal::VisibilityChange(visibility));
    }

    /// The event loop has gone idle.
    pub fn signal_idle(&self) {
        if let Some(idle) = &self.idle {
            idle.notify_one();
        }
    }

    fn apply_history(&self, method: HistoryMethod, route: &str) {
        self.set_route(route);
        self.emit(PageSignal::History(HistoryChange {
            method,
            route: route.to_string(),
        }));
    }

    fn emit(&self, signal: PageSignal) {
        // No subscribers is fine.
        let _ = self.signals.send(signal);
    }
}

impl PageEnvironment for PageHandle {
    fn is_browser(&self) -> bool {
        self.browser
    }

    fn current_route(&self) -> String {
        self.route
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn user_agent(&self) -> String {
        self.user_agent.clone()
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<PageSignal>> {
        if self.browser {
            Some(self.signals.subscribe())
        } else {
            None
        }
    }

    fn beacon(&self) -> Option<Arc<dyn Beacon>> {
        self.beacon.clone()
    }

    fn idle_notifier(&self) -> Option<Arc<Notify>> {
        self.idle.clone()
    }
}

impl std::fmt::Debug for PageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageHandle")
            .field("route", &self.current_route())
            .field("browser", &self.browser)
            .field("beacon", &self.beacon.is_some())
            .field("idle", &self.idle.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_handle_defaults() {
        let page = PageHandle::new("/home");
        assert!(page.is_browser());
        assert_eq!(page.current_route(), "/home");
        assert_eq!(page.user_agent(), "");
        assert!(page.beacon().is_none());
        assert!(page.idle_notifier().is_some());
    }

    #[test]
    fn test_server_context() {
        let page = PageHandle::server();
        assert!(!page.is_browser());
        assert!(page.subscribe().is_none());
        assert!(page.idle_notifier().is_none());
    }

    #[test]
    fn test_history_updates_route_and_signals() {
        let page = PageHandle::new("/");
        let mut rx = page.subscribe().unwrap();

        page.push_state("/a");
        page.replace_state("/b");

        assert_eq!(page.current_route(), "/b");
        assert_eq!(
            rx.try_recv().unwrap(),
            PageSignal::History(HistoryChange {
                method: HistoryMethod::Push,
                route: "/a".to_string(),
            })
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            PageSignal::History(HistoryChange {
                method: HistoryMethod::Replace,
                route: "/b".to_string(),
            })
        );
    }

    #[test]
    fn test_set_route_is_silent() {
        let page = PageHandle::new("/");
        let mut rx = page.subscribe().unwrap();
        page.set_route("/quiet");
        assert_eq!(page.current_route(), "/quiet");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_lifecycle_signals() {
        let page = PageHandle::new("/");
        let mut rx = page.subscribe().unwrap();
        page.set_visibility(Visibility::Hidden);
        page.hide();

        assert_eq!(
            rx.try_recv().unwrap(),
            PageSignal::VisibilityChange(Visibility::Hidden)
        );
        assert_eq!(rx.try_recv().unwrap(), PageSignal::PageHide);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let page = PageHandle::new("/");
        page.hide();
        page.push_state("/x");
        assert_eq!(page.current_route(), "/x");
    }
}
