//! The automation facade: every remote-control operation, one entry point
//! each, composed from the session, coordinate, trajectory, wait, scroll,
//! and heap modules.
//!
//! The facade owns the last known cursor position in screen space. Clicks
//! land wherever the cursor last settled, so callers sequence a move before
//! a click the same way a human does.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use pilot_runtime::ClientOptions;

use crate::coords::{self, CoordsQuery, CoordsResult, Rect};
use crate::cursor::{self, MoveRequest, Point};
use crate::error::{Error, Result};
use crate::heap;
use crate::motion::{CdpMotionDriver, MotionDriver, MouseButton};
use crate::scripts;
use crate::scroll::{self, ElementPosition};
use crate::session::{DEFAULT_WAIT, Session};
use crate::wait;

/// One open tab as reported by the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    #[serde(rename = "targetId")]
    pub target_id: String,
    pub title: String,
    pub url: String,
}

/// One unit of typed input: literal text or a raw key code.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TextItem {
    Code(u32),
    Text(String),
}

pub struct Browser {
    session: Session,
    driver: Arc<dyn MotionDriver>,
    cursor: Mutex<Point>,
}

impl Browser {
    /// Connect to the browser's debugging endpoint and attach to the first
    /// page tab.
    pub async fn connect(options: ClientOptions) -> Result<Self> {
        let session = Session::connect(options).await?;
        let driver = Arc::new(CdpMotionDriver::new(session.clone()));
        Ok(Self::with_driver(session, driver))
    }

    /// Assemble a facade over an explicit motion driver.
    pub fn with_driver(session: Session, driver: Arc<dyn MotionDriver>) -> Self {
        Self {
            session,
            driver,
            cursor: Mutex::new(Point { x: 0.0, y: 0.0 }),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Last known cursor position in screen space.
    pub fn cursor_position(&self) -> Point {
        *self.cursor.lock()
    }

    /// Block until the in-flight navigation (if any) commits.
    pub async fn wait_for_navigation(&self, timeout: Option<u64>) -> Result<()> {
        let timeout = timeout.map_or(DEFAULT_WAIT, Duration::from_millis);
        self.session.navigation().wait(timeout).await
    }

    /// Open a new tab at `url` and attach to it, without switching to it.
    pub async fn new_tab(&self, url: &str) -> Result<Value> {
        let created = self
            .session
            .dispatch_root("Target.createTarget", json!({ "url": url }))
            .await?;
        let target_id = created["targetId"].as_str().ok_or_else(|| {
            Error::Unexpected("Target.createTarget returned no targetId".to_string())
        })?;
        self.session
            .dispatch_root(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        Ok(created)
    }

    /// Every open tab with its id, title, and URL.
    pub async fn tabs(&self) -> Result<Vec<TabInfo>> {
        let targets = self
            .session
            .dispatch_root("Target.getTargets", json!({}))
            .await?;
        let infos = targets
            .get("targetInfos")
            .cloned()
            .unwrap_or_else(|| json!([]));
        Ok(serde_json::from_value(infos)?)
    }

    /// The tab automation currently drives, if it still exists.
    pub async fn active_tab(&self) -> Result<Option<TabInfo>> {
        let active = self.session.active_session();
        let tabs = self.tabs().await?;
        Ok(tabs.into_iter().find(|tab| tab.target_id == active.target_id))
    }

    /// Make `target_id` the active tab.
    pub async fn move_to_tab(&self, target_id: &str) -> Result<()> {
        self.session.set_active_session(target_id).await?;
        Ok(())
    }

    /// Navigate the active tab. Returns the browser's navigation result,
    /// including the frame id. Does not wait for the load to settle.
    pub async fn navigate_to(&self, url: &str) -> Result<Value> {
        self.session
            .dispatch("Page.navigate", json!({ "url": url }))
            .await
    }

    /// Resolve the elements matching a CSS selector to screen rectangles.
    pub async fn get_coords(&self, query: &CoordsQuery) -> Result<CoordsResult> {
        coords::get_coords(&self.session, query).await
    }

    /// Serialized HTML of the whole active document.
    pub async fn page_source(&self) -> Result<String> {
        let scope = self.session.active_session();
        let document = self
            .session
            .dispatch_on(&scope, "DOM.getDocument", json!({ "depth": -1 }))
            .await?;
        let node_id = document
            .pointer("/root/nodeId")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::Unexpected("DOM.getDocument returned no root".to_string()))?;
        let outer = self
            .session
            .dispatch_on(&scope, "DOM.getOuterHTML", json!({ "nodeId": node_id }))
            .await?;
        outer
            .get("outerHTML")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Unexpected("DOM.getOuterHTML returned no HTML".to_string()))
    }

    /// Move the cursor along a freshly planned trajectory. On failure the
    /// stored position is left untouched; no partial movement is assumed.
    pub async fn move_cursor(&self, request: &MoveRequest) -> Result<()> {
        let from = *self.cursor.lock();
        let trajectory = {
            let mut rng = rand::rng();
            cursor::plan(from, request, &mut rng)
        };
        let destination = *trajectory
            .stops
            .last()
            .ok_or_else(|| Error::PointerMotion("planned an empty trajectory".to_string()))?;

        self.driver
            .move_pointer(&trajectory.stops, trajectory.speed)
            .await
            .map_err(|e| Error::PointerMotion(e.to_string()))?;

        *self.cursor.lock() = destination;
        Ok(())
    }

    /// Click at the current cursor position.
    pub async fn click(&self, button: MouseButton) -> Result<()> {
        let at = *self.cursor.lock();
        self.driver
            .click(button, at)
            .await
            .map_err(|e| Error::PointerMotion(e.to_string()))
    }

    /// Press raw key codes without releasing them.
    pub async fn press_keys(&self, keys: &[u32]) -> Result<()> {
        self.driver.press_keys(keys).await
    }

    /// Release previously pressed key codes.
    pub async fn release_keys(&self, keys: &[u32]) -> Result<()> {
        self.driver.release_keys(keys).await
    }

    /// Type a sequence of text fragments and raw key codes.
    ///
    /// Clipboard mode pastes the joined text in one operation and is only
    /// valid for pure-text input; mixing in key codes is rejected because a
    /// paste cannot reproduce them.
    pub async fn type_text(&self, items: &[TextItem], use_clipboard: bool) -> Result<()> {
        if use_clipboard {
            let mut joined = String::new();
            for item in items {
                match item {
                    TextItem::Text(text) => joined.push_str(text),
                    TextItem::Code(code) => {
                        return Err(Error::IncompatibleInputMode(format!(
                            "clipboard input cannot carry key code {code}"
                        )));
                    }
                }
            }
            return self.driver.insert_text(&joined).await;
        }

        for item in items {
            match item {
                TextItem::Text(text) => self.driver.type_text(text).await?,
                TextItem::Code(code) => {
                    self.driver.press_keys(&[*code]).await?;
                    self.driver.release_keys(&[*code]).await?;
                }
            }
        }
        Ok(())
    }

    /// Wait for a selector to match an element with geometry.
    pub async fn wait_for_element(&self, selector: &str, timeout: Option<u64>) -> Result<Rect> {
        let timeout = timeout.map_or(DEFAULT_WAIT, Duration::from_millis);
        wait::wait_for_element(&self.session, selector, timeout).await
    }

    /// Wait for a selector to stop matching any element with geometry.
    pub async fn wait_for_element_to_not_exist(
        &self,
        selector: &str,
        timeout: Option<u64>,
    ) -> Result<()> {
        let timeout = timeout.map_or(DEFAULT_WAIT, Duration::from_millis);
        wait::wait_for_element_to_not_exist(&self.session, selector, timeout).await
    }

    /// Evaluate arbitrary code in the page, awaiting promises.
    pub async fn exec_js(&self, code: &str) -> Result<Value> {
        self.session.exec_js(code).await
    }

    /// Wheel-scroll the page until the element rests a little above center.
    pub async fn scroll_into_view(&self, selector: &str) -> Result<()> {
        let at = *self.cursor.lock();
        let scope = self.session.active_session();
        let script = scripts::element_position(selector);

        scroll::converge(
            || {
                let scope = scope.clone();
                let script = script.clone();
                async move {
                    self.session
                        .evaluate_json_on::<ElementPosition>(&scope, &script)
                        .await
                }
            },
            |direction| async move { self.driver.scroll(direction, at).await },
        )
        .await
    }

    /// Capture a heap snapshot and search it for objects carrying every
    /// `include` property and none of the `exclude` properties.
    pub async fn parse_heap_snapshot(
        &self,
        include: &[String],
        exclude: &[String],
    ) -> Result<Vec<Value>> {
        let snapshot = heap::capture_heap_snapshot(&self.session).await?;
        Ok(heap::find_objects_with_properties(&snapshot, include, exclude))
    }

    /// Go one entry back in the tab's history and wait for the navigation.
    pub async fn history_back(&self) -> Result<()> {
        self.history_step(-1).await
    }

    /// Go one entry forward in the tab's history and wait for the navigation.
    pub async fn history_forward(&self) -> Result<()> {
        self.history_step(1).await
    }

    /// Input events cannot reach the browser chrome, so history moves go
    /// through the navigation-history commands instead of a button click.
    /// Stepping past either end of the history is a no-op.
    async fn history_step(&self, delta: i64) -> Result<()> {
        let scope = self.session.active_session();
        let history = self
            .session
            .dispatch_on(&scope, "Page.getNavigationHistory", json!({}))
            .await?;
        let Some(entry_id) = history_entry_id(&history, delta)? else {
            return Ok(());
        };
        self.session
            .dispatch_on(
                &scope,
                "Page.navigateToHistoryEntry",
                json!({ "entryId": entry_id }),
            )
            .await?;
        self.wait_for_navigation(None).await
    }

    /// Close the debugging connection.
    pub async fn close(&self) -> Result<()> {
        self.session.close().await
    }
}

/// Resolve the history entry `delta` steps away from the current one.
fn history_entry_id(history: &Value, delta: i64) -> Result<Option<i64>> {
    let current = history["currentIndex"].as_i64().ok_or_else(|| {
        Error::Unexpected("navigation history has no currentIndex".to_string())
    })?;
    let entries = history["entries"]
        .as_array()
        .ok_or_else(|| Error::Unexpected("navigation history has no entries".to_string()))?;

    match usize::try_from(current + delta)
        .ok()
        .and_then(|index| entries.get(index))
    {
        Some(entry) => entry["id"]
            .as_i64()
            .map(Some)
            .ok_or_else(|| Error::Unexpected("history entry has no id".to_string())),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(current: i64) -> Value {
        json!({
            "currentIndex": current,
            "entries": [
                { "id": 10, "url": "https://a.example/" },
                { "id": 11, "url": "https://b.example/" },
                { "id": 12, "url": "https://c.example/" },
            ],
        })
    }

    #[test]
    fn history_back_targets_the_previous_entry() {
        assert_eq!(history_entry_id(&history(1), -1).unwrap(), Some(10));
    }

    #[test]
    fn history_forward_targets_the_next_entry() {
        assert_eq!(history_entry_id(&history(1), 1).unwrap(), Some(12));
    }

    #[test]
    fn history_steps_past_either_end_go_nowhere() {
        assert_eq!(history_entry_id(&history(0), -1).unwrap(), None);
        assert_eq!(history_entry_id(&history(2), 1).unwrap(), None);
    }

    #[test]
    fn text_items_deserialize_as_strings_or_codes() {
        let items: Vec<TextItem> = serde_json::from_value(json!(["hello", 13, "world"])).unwrap();
        assert_eq!(
            items,
            vec![
                TextItem::Text("hello".to_string()),
                TextItem::Code(13),
                TextItem::Text("world".to_string()),
            ]
        );
    }

    #[test]
    fn tab_info_round_trips_the_wire_shape() {
        let tab: TabInfo = serde_json::from_value(json!({
            "targetId": "T1",
            "title": "Example",
            "url": "https://example.com",
        }))
        .unwrap();
        assert_eq!(tab.target_id, "T1");
        assert_eq!(serde_json::to_value(&tab).unwrap()["targetId"], "T1");
    }
}
