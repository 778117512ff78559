//! Coordinate resolution: CSS-selector matches to absolute screen rectangles.
//!
//! In-page geometry is viewport-relative. Input injection and pointer
//! trajectories work in screen space, so every rectangle is translated by the
//! page-chrome offset (`screen - viewport` in each axis) before it leaves this
//! module. Rectangles are produced fresh per query, never cached.

use serde::{Deserialize, Serialize};

use crate::scripts;
use crate::session::Session;
use crate::Result;

/// A rectangle in absolute screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Screen-relative offset of the page origin (window decorations plus
/// browser chrome).
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ScreenOffset {
    #[serde(rename = "offsetX")]
    pub x: f64,
    #[serde(rename = "offsetY")]
    pub y: f64,
}

/// One coordinate resolution request.
#[derive(Debug, Clone, Deserialize)]
pub struct CoordsQuery {
    #[serde(rename = "cssSelector")]
    pub selector: String,
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub all: bool,
}

/// Result of a coordinate query: every match, one match, or nothing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CoordsResult {
    Many(Vec<Rect>),
    One(Rect),
    None,
}

impl CoordsResult {
    pub fn is_none(&self) -> bool {
        matches!(self, CoordsResult::None)
    }
}

/// Translate viewport-relative rectangles into screen space.
pub fn translate(rects: Vec<Rect>, offset: ScreenOffset) -> Vec<Rect> {
    rects
        .into_iter()
        .map(|rect| Rect {
            x: rect.x + offset.x,
            y: rect.y + offset.y,
            width: rect.width,
            height: rect.height,
        })
        .collect()
}

/// Apply the `all`/`index` selection rule to a translated rectangle list.
/// An out-of-range index yields `None`, as does a selector matching nothing.
pub fn select(rects: Vec<Rect>, index: usize, all: bool) -> CoordsResult {
    if all {
        CoordsResult::Many(rects)
    } else {
        match rects.into_iter().nth(index) {
            Some(rect) => CoordsResult::One(rect),
            None => CoordsResult::None,
        }
    }
}

/// Resolve the elements matching `query.selector` to screen rectangles.
///
/// Two page evaluations: one collecting client rectangles, one computing the
/// chrome offset. A malformed selector surfaces as a script error; a
/// malformed geometry payload surfaces as a JSON error. Neither is swallowed.
pub async fn get_coords(session: &Session, query: &CoordsQuery) -> Result<CoordsResult> {
    // Both evaluations run against the tab that was active at entry.
    let scope = session.active_session();
    let rects: Vec<Rect> = session
        .evaluate_json_on(&scope, &scripts::element_rects(&query.selector))
        .await?;
    let offset: ScreenOffset = session
        .evaluate_json_on(&scope, scripts::screen_offset())
        .await?;

    Ok(select(translate(rects, offset), query.index, query.all))
}
