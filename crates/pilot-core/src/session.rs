//! Browser session management: the single debugging connection, the active
//! tab, and navigation tracking.
//!
//! All automation funnels through one [`Session`]. The active tab descriptor
//! is replaced wholesale by [`Session::set_active_session`] (last write wins),
//! but it is never consulted mid-operation: multi-command operations snapshot
//! the descriptor once at entry and run every protocol call against that
//! explicit scope, so a concurrent tab switch cannot split an operation
//! across tabs.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{broadcast, watch};

use pilot_runtime::{CdpEvent, Client, ClientOptions};

use crate::error::{Error, Result};

/// Upper bound on caller-supplied wait timeouts.
pub const MAX_WAIT: Duration = Duration::from_secs(60);

/// Default timeout for navigation and element waits.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(30);

/// Identifies one attached browsing context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugSession {
    pub session_id: String,
    pub target_id: String,
}

/// Tracks the navigation flag driven by two page lifecycle events.
///
/// `Page.frameRequestedNavigation` flips the flag on,
/// `Page.frameNavigated` flips it off and releases every pending waiter.
/// Overlapping navigations (redirect chains) collapse into the single flag,
/// so a waiter may be released by a commit earlier than the navigation it
/// cared about. That matches observed browser behavior and is deliberate.
pub struct NavigationTracker {
    navigating_tx: watch::Sender<bool>,
}

impl NavigationTracker {
    pub fn new() -> Self {
        let (navigating_tx, _) = watch::channel(false);
        Self { navigating_tx }
    }

    pub fn is_navigating(&self) -> bool {
        *self.navigating_tx.borrow()
    }

    pub fn set_navigating(&self, navigating: bool) {
        let _ = self.navigating_tx.send(navigating);
    }

    /// Resolves immediately when idle; otherwise races the next commit event
    /// against the timeout. First settlement wins.
    pub async fn wait(&self, timeout: Duration) -> Result<()> {
        let timeout = timeout.min(MAX_WAIT);
        let mut rx = self.navigating_tx.subscribe();
        if !*rx.borrow() {
            return Ok(());
        }

        tokio::time::timeout(timeout, async {
            while *rx.borrow() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .map_err(|_| {
            Error::Timeout(format!(
                "navigation did not settle within {}ms",
                timeout.as_millis()
            ))
        })
    }
}

impl Default for NavigationTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// One multiplexed debugging connection plus the currently active tab.
#[derive(Clone)]
pub struct Session {
    client: Arc<Client>,
    active: Arc<Mutex<DebugSession>>,
    tracker: Arc<NavigationTracker>,
}

impl Session {
    /// Connect to the browser, attach to the first page target, and enable
    /// the page lifecycle and script evaluation domains.
    pub async fn connect(options: ClientOptions) -> Result<Self> {
        let client = Client::connect(options).await?;

        let session = Self {
            client: Arc::clone(&client),
            active: Arc::new(Mutex::new(DebugSession::default())),
            tracker: Arc::new(NavigationTracker::new()),
        };

        let target_id = session.first_page_target().await?;
        session.set_active_session(&target_id).await?;

        tokio::spawn(track_navigation(
            client.subscribe(),
            Arc::clone(&session.active),
            Arc::clone(&session.tracker),
        ));

        Ok(session)
    }

    /// The active tab descriptor.
    pub fn active_session(&self) -> DebugSession {
        self.active.lock().clone()
    }

    /// Attach to `target_id` and make it the active tab. Last write wins.
    pub async fn set_active_session(&self, target_id: &str) -> Result<DebugSession> {
        let attached = self
            .client
            .send(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                None,
            )
            .await?;

        let session_id = attached
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Unexpected("Target.attachToTarget returned no sessionId".to_string())
            })?
            .to_string();

        // Flat sessions need their own domain enables before they emit
        // lifecycle events or evaluate scripts.
        self.client
            .send("Page.enable", json!({}), Some(&session_id))
            .await?;
        self.client
            .send("Runtime.enable", json!({}), Some(&session_id))
            .await?;

        let debug_session = DebugSession {
            session_id,
            target_id: target_id.to_string(),
        };
        *self.active.lock() = debug_session.clone();

        tracing::debug!(target = "pilot.session", target_id, "active tab switched");
        Ok(debug_session)
    }

    /// Send a command scoped to the tab that is active right now. Operations
    /// spanning several commands should snapshot [`Self::active_session`]
    /// once and use [`Self::dispatch_on`] so a concurrent tab switch cannot
    /// split them across tabs.
    pub async fn dispatch(&self, method: &str, params: Value) -> Result<Value> {
        let scope = self.active_session();
        self.dispatch_on(&scope, method, params).await
    }

    /// Send a command scoped to an explicit tab descriptor.
    pub async fn dispatch_on(
        &self,
        scope: &DebugSession,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        let session_id = (!scope.session_id.is_empty()).then_some(scope.session_id.as_str());
        Ok(self.client.send(method, params, session_id).await?)
    }

    /// Send a command on the browser-level connection (no tab scope).
    pub async fn dispatch_root(&self, method: &str, params: Value) -> Result<Value> {
        Ok(self.client.send(method, params, None).await?)
    }

    /// Fire a command against an explicit tab scope without awaiting its
    /// response. Used where completion is signalled through events instead.
    pub fn dispatch_detached(&self, scope: &DebugSession, method: &'static str, params: Value) {
        let session = self.clone();
        let scope = scope.clone();
        tokio::spawn(async move {
            if let Err(e) = session.dispatch_on(&scope, method, params).await {
                tracing::warn!(target = "pilot.session", method, error = %e, "detached command failed");
            }
        });
    }

    /// Subscribe to protocol events. Subscriptions survive reconnects.
    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.client.subscribe()
    }

    /// Navigation tracker for the active tab.
    pub fn navigation(&self) -> &NavigationTracker {
        &self.tracker
    }

    /// Evaluate an expression in page context and return its value.
    /// A thrown exception surfaces as [`Error::Script`].
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let scope = self.active_session();
        self.evaluate_on(&scope, expression).await
    }

    /// Evaluate an expression in an explicit tab's page context.
    pub async fn evaluate_on(&self, scope: &DebugSession, expression: &str) -> Result<Value> {
        let result = self
            .dispatch_on(scope, "Runtime.evaluate", json!({ "expression": expression }))
            .await?;
        value_or_exception(result)
    }

    /// Evaluate an expression that returns a JSON string, and parse it.
    /// Parse failures are not swallowed here; only the heap snapshot stream
    /// tolerates partial documents.
    pub async fn evaluate_json<T: serde::de::DeserializeOwned>(
        &self,
        expression: &str,
    ) -> Result<T> {
        let scope = self.active_session();
        self.evaluate_json_on(&scope, expression).await
    }

    /// Like [`Self::evaluate_json`], against an explicit tab descriptor.
    pub async fn evaluate_json_on<T: serde::de::DeserializeOwned>(
        &self,
        scope: &DebugSession,
        expression: &str,
    ) -> Result<T> {
        let value = self.evaluate_on(scope, expression).await?;
        let text = value.as_str().ok_or_else(|| {
            Error::Script(format!("expected a JSON string result, got {value}"))
        })?;
        Ok(serde_json::from_str(text)?)
    }

    /// Evaluate arbitrary user-supplied code with the full option set:
    /// promises awaited, results returned by value, user gesture allowed.
    pub async fn exec_js(&self, code: &str) -> Result<Value> {
        let result = self
            .dispatch(
                "Runtime.evaluate",
                json!({
                    "expression": code,
                    "awaitPromise": true,
                    "returnByValue": true,
                    "timeout": 30000,
                    "allowUnsafeEvalBlockedByCSP": true,
                    "userGesture": true,
                }),
            )
            .await?;
        value_or_exception(result)
    }

    /// Close the debugging connection.
    pub async fn close(&self) -> Result<()> {
        Ok(self.client.close().await?)
    }

    async fn first_page_target(&self) -> Result<String> {
        let targets = self.dispatch_root("Target.getTargets", json!({})).await?;
        targets["targetInfos"]
            .as_array()
            .and_then(|infos| {
                infos
                    .iter()
                    .find(|info| info["type"] == "page")
                    .and_then(|info| info["targetId"].as_str())
            })
            .map(str::to_string)
            .ok_or_else(|| Error::Unexpected("browser exposes no page target".to_string()))
    }
}

fn value_or_exception(result: Value) -> Result<Value> {
    if let Some(exception) = result.get("exceptionDetails") {
        let description = exception
            .pointer("/exception/description")
            .or_else(|| exception.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("script threw");
        return Err(Error::Script(description.to_string()));
    }
    Ok(result
        .pointer("/result/value")
        .cloned()
        .unwrap_or(Value::Null))
}

/// Event loop driving the navigation flag from page lifecycle events.
/// Only events for the active tab count; events for other attached sessions
/// are ignored.
async fn track_navigation(
    mut events: broadcast::Receiver<CdpEvent>,
    active: Arc<Mutex<DebugSession>>,
    tracker: Arc<NavigationTracker>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(target = "pilot.session", skipped, "navigation events lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let for_active_tab = match &event.session_id {
            Some(session_id) => *session_id == active.lock().session_id,
            None => true,
        };
        if !for_active_tab {
            continue;
        }

        match event.method.as_str() {
            "Page.frameRequestedNavigation" => tracker.set_navigating(true),
            "Page.frameNavigated" => tracker.set_navigating(false),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_resolves_immediately_when_idle() {
        let tracker = NavigationTracker::new();
        tracker.wait(Duration::from_millis(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_resolves_on_commit_event() {
        let tracker = Arc::new(NavigationTracker::new());
        tracker.set_navigating(true);

        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.wait(DEFAULT_WAIT).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        tracker.set_navigating(false);

        waiter.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_while_navigating() {
        let tracker = NavigationTracker::new();
        tracker.set_navigating(true);

        let err = tracker.wait(Duration::from_millis(100)).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_clamps_timeout_to_maximum() {
        let tracker = NavigationTracker::new();
        tracker.set_navigating(true);

        let start = tokio::time::Instant::now();
        let err = tracker.wait(Duration::from_secs(600)).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() <= MAX_WAIT + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_navigations_collapse() {
        let tracker = Arc::new(NavigationTracker::new());
        // Two requested navigations, one commit: the flag is binary, so the
        // single commit releases the waiter.
        tracker.set_navigating(true);
        tracker.set_navigating(true);

        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.wait(DEFAULT_WAIT).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        tracker.set_navigating(false);

        waiter.await.unwrap().unwrap();
    }
}
