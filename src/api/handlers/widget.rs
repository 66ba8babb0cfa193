use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::api::response::{ApiError, AppQuery};
use crate::bus::WIDGET_TOPIC;
use crate::context::RequestContext;
use crate::widget::PageEvent;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WidgetParams {
    #[serde(default)]
    pub layout: Option<String>,
}

/// Kick off widget rendering for this page and hand the request id to the
/// page's script, which uses it to open `/ws/<request id>/<token>/`.
pub async fn widget_js(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    AppQuery(params): AppQuery<WidgetParams>,
) -> Result<impl IntoResponse, ApiError> {
    let layout = params
        .layout
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ApiError::bad_request("layout arg is missing"))?;

    let page = PageEvent {
        request_id: ctx.request_id.clone(),
        layout,
    };
    state
        .bus
        .publish(WIDGET_TOPIC, &page)
        .map_err(|e| ApiError::internal(format!("Widget event publish error: {e}")))?;

    tracing::debug!(request_id = %ctx.request_id, "widget.js ready");
    Ok((
        [(header::CONTENT_TYPE, "application/javascript")],
        format!("var RequestID='{}';\n", ctx.request_id),
    ))
}
