use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::{
    admission::DropRequest,
    store::{self, GetResult, Reason},
    AppState,
};

/// Message for every failed retrieval when reasons are not revealed.
pub const GENERIC_GONE: &str = "secret not found or already burned";

fn error_response(status: StatusCode, msg: &str) -> Response {
    (status, Json(json!({ "error": msg }))).into_response()
}

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "secrets": state.store.len() }))
}

// ── Create ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub id: String,
    pub link: String,
}

/// `POST /v1/drop`. The raw body is what gets stored; it is parsed only to
/// run admission. Bodies are never logged.
pub async fn create_drop(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "missing body"),
    };

    let req: DropRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) if e.is_data() => {
            return error_response(StatusCode::BAD_REQUEST, "invalid payload structure")
        }
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid JSON"),
    };

    let admitted = match state.policy.check(&req, store::unix_now()) {
        Ok(admitted) => admitted,
        Err(e) => {
            debug!(code = e.code(), "drop rejected by admission policy");
            return (
                e.status(),
                Json(json!({ "error": e.to_string(), "code": e.code() })),
            )
                .into_response();
        }
    };

    let id = store::generate_id();
    state
        .store
        .put(&id, body, admitted.max_views, admitted.expiry);
    info!(
        id = %id,
        max_views = admitted.max_views,
        expiry = admitted.expiry,
        "audit: drop.create"
    );

    let link = format!("{}/v1/drop/{}", state.base_url.trim_end_matches('/'), id);
    (StatusCode::CREATED, Json(CreateResponse { id, link })).into_response()
}

// ── Retrieve ──────────────────────────────────────────────────────────────────

/// `GET /v1/drop/{id}`. Spends one view and returns the stored blob as-is.
pub async fn get_drop(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.get(&id) {
        GetResult::Value(blob) => {
            info!(id = %id, "audit: drop.read");
            blob_response(blob)
        }
        GetResult::Burned(blob) => {
            info!(id = %id, "audit: drop.burned");
            blob_response(blob)
        }
        gone => {
            let reason = gone.reason();
            info!(id = %id, reason = reason.as_str(), "audit: drop.read.gone");
            gone_response(reason, state.reveal_reasons)
        }
    }
}

fn blob_response(blob: Bytes) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], blob).into_response()
}

fn gone_response(reason: Reason, reveal: bool) -> Response {
    if !reveal {
        return error_response(StatusCode::NOT_FOUND, GENERIC_GONE);
    }
    match reason {
        Reason::Expired => error_response(
            StatusCode::GONE,
            "secret expired and was automatically burned",
        ),
        Reason::Exhausted => error_response(
            StatusCode::GONE,
            "secret already retrieved and burned (max views reached)",
        ),
        Reason::NotFound | Reason::Success => error_response(
            StatusCode::NOT_FOUND,
            "secret not found - it may have been burned or never existed",
        ),
    }
}

// ── Revoke ────────────────────────────────────────────────────────────────────

/// `DELETE /v1/drop/{id}`.
pub async fn revoke_drop(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if state.store.delete(&id) {
        info!(id = %id, "audit: drop.revoke");
        Json(json!({ "status": "revoked" })).into_response()
    } else {
        info!(id = %id, "audit: drop.revoke.not_found");
        error_response(StatusCode::NOT_FOUND, "not found")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn collapsed_mode_hides_reason() {
        for reason in [Reason::NotFound, Reason::Expired, Reason::Exhausted] {
            let resp = gone_response(reason, false);
            assert_eq!(resp.status(), StatusCode::NOT_FOUND);
            assert_eq!(body_json(resp).await["error"], GENERIC_GONE);
        }
    }

    #[tokio::test]
    async fn reveal_mode_distinguishes_reasons() {
        let expired = gone_response(Reason::Expired, true);
        assert_eq!(expired.status(), StatusCode::GONE);
        let exhausted = gone_response(Reason::Exhausted, true);
        assert_eq!(exhausted.status(), StatusCode::GONE);
        let missing = gone_response(Reason::NotFound, true);
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let a = body_json(expired).await["error"].clone();
        let b = body_json(exhausted).await["error"].clone();
        let c = body_json(missing).await["error"].clone();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }
}
