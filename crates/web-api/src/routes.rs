use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::StatusCode,
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use application::AuthorCount;

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};

const DEFAULT_TOP_CHATTERS: usize = 10;
const MAX_TOP_CHATTERS: usize = 100;

#[derive(Debug, Deserialize)]
struct TopChattersQuery {
    limit: Option<usize>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(websocket_upgrade))
        .route("/stats/top-chatters", get(top_chatters))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn websocket_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| WebSocketConnection::new(socket, state).run())
}

async fn top_chatters(
    State(state): State<AppState>,
    Query(query): Query<TopChattersQuery>,
) -> Result<Json<Vec<AuthorCount>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_TOP_CHATTERS);
    if limit == 0 || limit > MAX_TOP_CHATTERS {
        return Err(ApiError::bad_request(format!(
            "limit must be between 1 and {MAX_TOP_CHATTERS}"
        )));
    }
    let counts = state.chat_service.top_chatters(limit).await?;
    Ok(Json(counts))
}
