//! RPC method parsing and dispatch.
//!
//! Every operation is addressed by its wire name under `POST /api/v1/{name}`.
//! Parsing is static: an unknown name is distinguishable from bad parameters,
//! so the surface can answer 404 for the former and a typed error for the
//! latter. Parameter structs mirror the wire's camelCase field names.

use serde::Deserialize;
use serde_json::{Value, json};

use pilot_core::{Browser, CoordsQuery, Error, MouseButton, MoveRequest, TextItem};

#[derive(Debug, Default, Deserialize)]
pub struct WaitParams {
    pub timeout: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NewTabParams {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveToTabParams {
    pub target_id: String,
}

#[derive(Debug, Deserialize)]
pub struct NavigateToParams {
    pub url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClickParams {
    #[serde(default)]
    pub button: MouseButton,
}

#[derive(Debug, Deserialize)]
pub struct KeysParams {
    pub keys: Vec<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeParams {
    pub text: Vec<TextItem>,
    #[serde(default)]
    pub use_clipboard: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementWaitParams {
    pub css_selector: String,
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ExecJsParams {
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollIntoViewParams {
    pub css_selector: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct HeapSnapshotParams {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// A fully parsed RPC call.
#[derive(Debug)]
pub enum MethodCall {
    WaitForNavigation(WaitParams),
    NewTab(NewTabParams),
    GetTabs,
    GetActiveTab,
    MoveToTab(MoveToTabParams),
    NavigateTo(NavigateToParams),
    GetCoords(CoordsQuery),
    GetPageSource,
    MoveCursor(MoveRequest),
    Click(ClickParams),
    PressKeys(KeysParams),
    ReleaseKeys(KeysParams),
    Type(TypeParams),
    WaitForElement(ElementWaitParams),
    WaitForElementToNotExist(ElementWaitParams),
    ExecJs(ExecJsParams),
    ScrollIntoView(ScrollIntoViewParams),
    ParseHeapSnapshot(HeapSnapshotParams),
    HistoryBack,
    HistoryForward,
    Close,
}

pub enum ParseError {
    UnknownMethod,
    BadParams(Error),
}

impl MethodCall {
    /// Parse a wire method name and JSON body into a call.
    pub fn parse(method: &str, params: Value) -> Result<Self, ParseError> {
        // A missing or empty body is the same as `{}` so that methods with
        // all-optional parameters need no body at all.
        let params = if params.is_null() { json!({}) } else { params };

        fn typed<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ParseError> {
            serde_json::from_value(params).map_err(|e| {
                let message = e.to_string();
                if message.starts_with("missing field") {
                    ParseError::BadParams(Error::MissingParameter(message))
                } else {
                    ParseError::BadParams(Error::Json(e))
                }
            })
        }

        fn at_least_one_key(params: KeysParams) -> Result<KeysParams, ParseError> {
            if params.keys.is_empty() {
                return Err(ParseError::BadParams(Error::MissingParameter(
                    "keys must contain at least one key code".to_string(),
                )));
            }
            Ok(params)
        }

        Ok(match method {
            "waitForNavigation" => MethodCall::WaitForNavigation(typed(params)?),
            "newTab" => MethodCall::NewTab(typed(params)?),
            "getTabs" => MethodCall::GetTabs,
            "getActiveTab" => MethodCall::GetActiveTab,
            "moveToTab" => MethodCall::MoveToTab(typed(params)?),
            "navigateTo" => MethodCall::NavigateTo(typed(params)?),
            "getCoords" => MethodCall::GetCoords(typed(params)?),
            "getPageSource" => MethodCall::GetPageSource,
            "moveCursor" => MethodCall::MoveCursor(typed(params)?),
            "click" => MethodCall::Click(typed(params)?),
            "pressKeys" => MethodCall::PressKeys(at_least_one_key(typed(params)?)?),
            "releaseKeys" => MethodCall::ReleaseKeys(at_least_one_key(typed(params)?)?),
            "type" => MethodCall::Type(typed(params)?),
            "waitForElement" => MethodCall::WaitForElement(typed(params)?),
            "waitForElementToNotExist" => MethodCall::WaitForElementToNotExist(typed(params)?),
            "execJS" => MethodCall::ExecJs(typed(params)?),
            "scrollIntoView" => MethodCall::ScrollIntoView(typed(params)?),
            "parseHeapSnapshot" => MethodCall::ParseHeapSnapshot(typed(params)?),
            "historyBack" => MethodCall::HistoryBack,
            "historyForward" => MethodCall::HistoryForward,
            "close" => MethodCall::Close,
            _ => return Err(ParseError::UnknownMethod),
        })
    }

    /// Run the call against the browser. Void operations return `null` so
    /// the success envelope always carries a `result` field.
    pub async fn execute(self, browser: &Browser) -> Result<Value, Error> {
        match self {
            MethodCall::WaitForNavigation(p) => {
                browser.wait_for_navigation(p.timeout).await?;
                Ok(Value::Null)
            }
            MethodCall::NewTab(p) => browser.new_tab(&p.url).await,
            MethodCall::GetTabs => Ok(serde_json::to_value(browser.tabs().await?)?),
            MethodCall::GetActiveTab => Ok(serde_json::to_value(browser.active_tab().await?)?),
            MethodCall::MoveToTab(p) => {
                browser.move_to_tab(&p.target_id).await?;
                Ok(Value::Null)
            }
            MethodCall::NavigateTo(p) => browser.navigate_to(&p.url).await,
            MethodCall::GetCoords(query) => {
                Ok(serde_json::to_value(browser.get_coords(&query).await?)?)
            }
            MethodCall::GetPageSource => Ok(Value::String(browser.page_source().await?)),
            MethodCall::MoveCursor(request) => {
                browser.move_cursor(&request).await?;
                Ok(Value::Null)
            }
            MethodCall::Click(p) => {
                browser.click(p.button).await?;
                Ok(Value::Null)
            }
            MethodCall::PressKeys(p) => {
                browser.press_keys(&p.keys).await?;
                Ok(Value::Null)
            }
            MethodCall::ReleaseKeys(p) => {
                browser.release_keys(&p.keys).await?;
                Ok(Value::Null)
            }
            MethodCall::Type(p) => {
                browser.type_text(&p.text, p.use_clipboard).await?;
                Ok(Value::Null)
            }
            MethodCall::WaitForElement(p) => Ok(serde_json::to_value(
                browser.wait_for_element(&p.css_selector, p.timeout).await?,
            )?),
            MethodCall::WaitForElementToNotExist(p) => {
                browser
                    .wait_for_element_to_not_exist(&p.css_selector, p.timeout)
                    .await?;
                Ok(Value::Null)
            }
            MethodCall::ExecJs(p) => browser.exec_js(&p.code).await,
            MethodCall::ScrollIntoView(p) => {
                browser.scroll_into_view(&p.css_selector).await?;
                Ok(Value::Null)
            }
            MethodCall::ParseHeapSnapshot(p) => Ok(Value::Array(
                browser.parse_heap_snapshot(&p.include, &p.exclude).await?,
            )),
            MethodCall::HistoryBack => {
                browser.history_back().await?;
                Ok(Value::Null)
            }
            MethodCall::HistoryForward => {
                browser.history_forward().await?;
                Ok(Value::Null)
            }
            MethodCall::Close => {
                browser.close().await?;
                Ok(Value::Null)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_method_is_not_a_parameter_error() {
        assert!(matches!(
            MethodCall::parse("screenshot", json!({})),
            Err(ParseError::UnknownMethod)
        ));
    }

    #[test]
    fn missing_required_field_maps_to_missing_parameter() {
        let err = MethodCall::parse("moveToTab", json!({})).unwrap_err();
        match err {
            ParseError::BadParams(e) => assert_eq!(e.kind(), "MissingParameter"),
            ParseError::UnknownMethod => panic!("method should be known"),
        }
    }

    #[test]
    fn null_body_is_treated_as_empty_params() {
        assert!(matches!(
            MethodCall::parse("newTab", Value::Null),
            Ok(MethodCall::NewTab(_))
        ));
    }

    #[test]
    fn move_cursor_accepts_rect_and_straight_flags() {
        let call = MethodCall::parse(
            "moveCursor",
            json!({ "x": 10.0, "y": 20.0, "width": 30.0, "height": 5.0, "straight": true }),
        )
        .ok();
        match call {
            Some(MethodCall::MoveCursor(request)) => {
                assert_eq!(request.width, Some(30.0));
                assert!(request.straight);
            }
            _ => panic!("expected a moveCursor call"),
        }
    }

    #[test]
    fn coords_query_uses_wire_field_names() {
        let call = MethodCall::parse(
            "getCoords",
            json!({ "cssSelector": "#main", "index": 2 }),
        )
        .ok();
        match call {
            Some(MethodCall::GetCoords(query)) => {
                assert_eq!(query.selector, "#main");
                assert_eq!(query.index, 2);
                assert!(!query.all);
            }
            _ => panic!("expected a getCoords call"),
        }
    }

    #[test]
    fn type_accepts_mixed_text_and_key_codes() {
        let call = MethodCall::parse(
            "type",
            json!({ "text": ["user", 9, "hunter2"], "useClipboard": false }),
        )
        .ok();
        match call {
            Some(MethodCall::Type(params)) => {
                assert_eq!(params.text.len(), 3);
                assert_eq!(params.text[1], TextItem::Code(9));
            }
            _ => panic!("expected a type call"),
        }
    }

    #[test]
    fn empty_key_arrays_are_rejected() {
        for method in ["pressKeys", "releaseKeys"] {
            let err = MethodCall::parse(method, json!({ "keys": [] })).unwrap_err();
            match err {
                ParseError::BadParams(e) => assert_eq!(e.kind(), "MissingParameter"),
                ParseError::UnknownMethod => panic!("method should be known"),
            }
        }
    }

    #[test]
    fn press_keys_accepts_a_non_empty_code_list() {
        let call = MethodCall::parse("pressKeys", json!({ "keys": [162, 86] })).ok();
        match call {
            Some(MethodCall::PressKeys(params)) => assert_eq!(params.keys, vec![162, 86]),
            _ => panic!("expected a pressKeys call"),
        }
    }

    #[test]
    fn wrong_parameter_type_is_not_reported_as_missing() {
        let err = MethodCall::parse("navigateTo", json!({ "url": 42 })).unwrap_err();
        match err {
            ParseError::BadParams(e) => assert_eq!(e.kind(), "Unexpected"),
            ParseError::UnknownMethod => panic!("method should be known"),
        }
    }
}
