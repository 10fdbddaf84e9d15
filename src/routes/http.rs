//! HTTP endpoint handlers. These are thin reads over the loaded snapshot.
//! Each handler is instrumented; lookups log the id and whether it was found.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{info, instrument};

use crate::domain::Lesson;
use crate::protocol::{ErrorOut, HealthOut, LessonsQuery};
use crate::state::ServerState;

fn not_found(what: &str, id: &str) -> Response {
    let body = ErrorOut { error: format!("unknown {what}: {id}") };
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let snap = &state.snapshot;
    Json(HealthOut {
        ok: true,
        lessons: snap.lesson_count(),
        modules: snap.modules().len(),
        last_updated: snap.metadata().map(|m| m.last_updated_timestamp),
    })
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_metadata(State(state): State<Arc<ServerState>>) -> Response {
    match state.snapshot.metadata() {
        Some(meta) => Json(meta).into_response(),
        None => not_found("metadata", "content store"),
    }
}

#[instrument(level = "info", skip(state, q), fields(filtered = q.ids.is_some()))]
pub async fn http_get_lessons(State(state): State<Arc<ServerState>>, Query(q): Query<LessonsQuery>) -> Response {
    let snap = &state.snapshot;
    let lessons: Vec<&Lesson> = match q.id_list() {
        Some(ids) => ids.iter().filter_map(|id| snap.lesson(id)).collect(),
        None => snap.lessons(),
    };
    info!(target: "lesson_forge", count = lessons.len(), "HTTP lessons served");
    Json(lessons).into_response()
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_lesson(State(state): State<Arc<ServerState>>, Path(id): Path<String>) -> Response {
    match state.snapshot.lesson(&id) {
        Some(lesson) => Json(lesson).into_response(),
        None => not_found("lesson", &id),
    }
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_modules(State(state): State<Arc<ServerState>>) -> Response {
    Json(state.snapshot.modules()).into_response()
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_module(State(state): State<Arc<ServerState>>, Path(id): Path<String>) -> Response {
    match state.snapshot.module(&id) {
        Some(module) => Json(module).into_response(),
        None => not_found("module", &id),
    }
}
