//! Motion execution: the capability that turns planned trajectories and key
//! sequences into real input events.
//!
//! The trait seam exists so trajectory synthesis stays testable without a
//! browser. The shipped implementation injects events through the debugging
//! protocol's `Input` domain, translating screen-space points back to
//! viewport space with the page-chrome offset.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;

use crate::coords::ScreenOffset;
use crate::cursor::{Point, SpeedProfile};
use crate::error::Result;
use crate::scripts;
use crate::session::{DebugSession, Session};

/// Mouse button for click operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl MouseButton {
    fn protocol_name(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        }
    }
}

/// Scroll direction for one wheel unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
}

/// Pointer and keyboard execution capability.
#[async_trait]
pub trait MotionDriver: Send + Sync {
    /// Walk the pointer along `stops` at the profile's speed.
    async fn move_pointer(&self, stops: &[Point], speed: SpeedProfile) -> Result<()>;

    /// Press and release `button` at `at`.
    async fn click(&self, button: MouseButton, at: Point) -> Result<()>;

    /// Scroll one wheel unit at `at`.
    async fn scroll(&self, direction: ScrollDirection, at: Point) -> Result<()>;

    /// Press raw key codes, in order, without releasing.
    async fn press_keys(&self, keys: &[u32]) -> Result<()>;

    /// Release raw key codes, in order.
    async fn release_keys(&self, keys: &[u32]) -> Result<()>;

    /// Type text as individual keystrokes with a human-ish per-key delay.
    async fn type_text(&self, text: &str) -> Result<()>;

    /// Insert text in one paste-like operation, bypassing key events.
    async fn insert_text(&self, text: &str) -> Result<()>;
}

/// Delay between typed characters, mirroring a hardware auto-repeat gap.
const KEY_DELAY: Duration = Duration::from_millis(50);

/// One wheel unit in protocol delta terms.
const WHEEL_DELTA: f64 = 120.0;

/// Motion driver backed by the debugging protocol's `Input` domain.
pub struct CdpMotionDriver {
    session: Session,
}

impl CdpMotionDriver {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Each driver call pins the tab that was active when it started.
    fn scope(&self) -> DebugSession {
        self.session.active_session()
    }

    async fn offset(&self, scope: &DebugSession) -> Result<ScreenOffset> {
        self.session
            .evaluate_json_on(scope, scripts::screen_offset())
            .await
    }

    async fn dispatch_mouse(&self, scope: &DebugSession, params: serde_json::Value) -> Result<()> {
        self.session
            .dispatch_on(scope, "Input.dispatchMouseEvent", params)
            .await?;
        Ok(())
    }

    async fn dispatch_key(
        &self,
        scope: &DebugSession,
        event_type: &str,
        key_code: u32,
    ) -> Result<()> {
        self.session
            .dispatch_on(
                scope,
                "Input.dispatchKeyEvent",
                json!({
                    "type": event_type,
                    "windowsVirtualKeyCode": key_code,
                    "nativeVirtualKeyCode": key_code,
                }),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MotionDriver for CdpMotionDriver {
    async fn move_pointer(&self, stops: &[Point], speed: SpeedProfile) -> Result<()> {
        let scope = self.scope();
        let offset = self.offset(&scope).await?;
        let pps = speed.pixels_per_second();

        let mut previous: Option<Point> = None;
        for stop in stops {
            if let Some(prev) = previous {
                let pause = Duration::from_secs_f64(prev.distance_to(*stop) / pps);
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
            }
            self.dispatch_mouse(
                &scope,
                json!({
                    "type": "mouseMoved",
                    "x": stop.x - offset.x,
                    "y": stop.y - offset.y,
                }),
            )
            .await?;
            previous = Some(*stop);
        }
        Ok(())
    }

    async fn click(&self, button: MouseButton, at: Point) -> Result<()> {
        let scope = self.scope();
        let offset = self.offset(&scope).await?;
        let (x, y) = (at.x - offset.x, at.y - offset.y);
        let button = button.protocol_name();

        self.dispatch_mouse(
            &scope,
            json!({
                "type": "mousePressed",
                "x": x,
                "y": y,
                "button": button,
                "clickCount": 1,
            }),
        )
        .await?;
        self.dispatch_mouse(
            &scope,
            json!({
                "type": "mouseReleased",
                "x": x,
                "y": y,
                "button": button,
                "clickCount": 1,
            }),
        )
        .await
    }

    async fn scroll(&self, direction: ScrollDirection, at: Point) -> Result<()> {
        let scope = self.scope();
        let offset = self.offset(&scope).await?;
        let delta_y = match direction {
            ScrollDirection::Down => WHEEL_DELTA,
            ScrollDirection::Up => -WHEEL_DELTA,
        };
        self.dispatch_mouse(
            &scope,
            json!({
                "type": "mouseWheel",
                "x": (at.x - offset.x).max(0.0),
                "y": (at.y - offset.y).max(0.0),
                "deltaX": 0,
                "deltaY": delta_y,
            }),
        )
        .await
    }

    async fn press_keys(&self, keys: &[u32]) -> Result<()> {
        let scope = self.scope();
        for key in keys {
            self.dispatch_key(&scope, "rawKeyDown", *key).await?;
        }
        Ok(())
    }

    async fn release_keys(&self, keys: &[u32]) -> Result<()> {
        let scope = self.scope();
        for key in keys {
            self.dispatch_key(&scope, "keyUp", *key).await?;
        }
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        let scope = self.scope();
        for c in text.chars() {
            self.session
                .dispatch_on(
                    &scope,
                    "Input.dispatchKeyEvent",
                    json!({ "type": "char", "text": c.to_string() }),
                )
                .await?;
            tokio::time::sleep(KEY_DELAY).await;
        }
        Ok(())
    }

    async fn insert_text(&self, text: &str) -> Result<()> {
        let scope = self.scope();
        // Keep a paste-like rhythm: a short variable pause on either side.
        let (before, after) = {
            let mut rng = rand::rng();
            (
                Duration::from_millis(rng.random_range(40..100)),
                Duration::from_millis(rng.random_range(20..80)),
            )
        };
        tokio::time::sleep(before).await;
        self.session
            .dispatch_on(&scope, "Input.insertText", json!({ "text": text }))
            .await?;
        tokio::time::sleep(after).await;
        Ok(())
    }
}
