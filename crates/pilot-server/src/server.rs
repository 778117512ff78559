//! The HTTP surface: one POST route per operation.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use axum::Router;
use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde_json::{Value, json};
use tracing::{error, info};

use pilot_core::{Browser, ClientOptions, Error};

use crate::config::Config;
use crate::rpc::{MethodCall, ParseError};

/// Seam between the HTTP surface and the browser, so routing and envelope
/// behavior are testable without a live debugging connection.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn call(&self, call: MethodCall) -> std::result::Result<Value, Error>;
}

#[async_trait]
impl Dispatch for Browser {
    async fn call(&self, call: MethodCall) -> std::result::Result<Value, Error> {
        call.execute(self).await
    }
}

pub async fn serve(config: Config) -> Result<()> {
    let browser = Browser::connect(ClientOptions {
        host: config.cdp_host.clone(),
        port: config.cdp_port,
    })
    .await
    .map_err(|e| anyhow!("browser connection failed: {e}"))?;

    let app = router(Arc::new(browser));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(target = "pilot.server", port = config.port, "server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(dispatcher: Arc<dyn Dispatch>) -> Router {
    Router::new()
        .route("/api/v1/{method}", post(handle_method))
        .with_state(dispatcher)
}

async fn handle_method(
    State(dispatcher): State<Arc<dyn Dispatch>>,
    Path(method): Path<String>,
    body: Option<Json<Value>>,
) -> Response {
    let params = body.map(|Json(value)| value).unwrap_or(Value::Null);
    info!(target = "pilot.server", method, "operation");

    let call = match MethodCall::parse(&method, params) {
        Ok(call) => call,
        Err(ParseError::UnknownMethod) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "ok": false, "error": "METHOD_NOT_FOUND" })),
            )
                .into_response();
        }
        Err(ParseError::BadParams(e)) => {
            error!(target = "pilot.server", method, error = %e, "bad parameters");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(error_envelope(&e))).into_response();
        }
    };

    match dispatcher.call(call).await {
        Ok(result) => {
            (StatusCode::OK, Json(json!({ "ok": true, "result": result }))).into_response()
        }
        Err(e) => {
            error!(target = "pilot.server", method, error = %e, "operation failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(error_envelope(&e))).into_response()
        }
    }
}

/// Failure envelope: the taxonomy name plus the human-readable message.
fn error_envelope(error: &Error) -> Value {
    json!({
        "ok": false,
        "error": { "type": error.kind(), "msg": error.to_string() },
    })
}
