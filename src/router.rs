//! Local HTTP API over a page context.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use url::Url;

use crate::error::ErrorKind;
use crate::messaging::{ContextClient, ContextRequest, ContextResponse};

fn status_for(response: &ContextResponse) -> StatusCode {
    if response.success {
        return StatusCode::OK;
    }
    match response.error_kind {
        Some(ErrorKind::ReferenceNotFound) => StatusCode::NOT_FOUND,
        Some(ErrorKind::Network) | Some(ErrorKind::Save) => StatusCode::BAD_GATEWAY,
        Some(ErrorKind::ContextUnreachable) => StatusCode::SERVICE_UNAVAILABLE,
        Some(ErrorKind::UnsupportedPage) | Some(ErrorKind::IncompleteReference) | None => {
            StatusCode::BAD_REQUEST
        }
    }
}

impl IntoResponse for ContextResponse {
    fn into_response(self) -> Response {
        (status_for(&self), Json(self)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> Response {
    let body = ContextResponse {
        success: false,
        data: None,
        message: None,
        error: Some(message.into()),
        error_kind: None,
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
struct NavigateBody {
    url: String,
}

async fn get_reference(State(client): State<ContextClient>) -> ContextResponse {
    client.request(ContextRequest::GetReference).await
}

async fn download(State(client): State<ContextClient>) -> ContextResponse {
    client.request(ContextRequest::Download).await
}

async fn navigate(
    State(client): State<ContextClient>,
    body: Result<Json<NavigateBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    let url = match Url::parse(&body.url) {
        Ok(url) => url,
        Err(e) => return bad_request(format!("invalid url: {e}")),
    };
    client
        .request(ContextRequest::Navigate(url))
        .await
        .into_response()
}

pub fn create_router(client: ContextClient) -> Router {
    Router::new()
        .route("/api/reference", get(get_reference))
        .route("/api/download", post(download))
        .route("/api/navigate", post(navigate))
        .fallback(|| async { (StatusCode::NOT_FOUND, "Not Found") })
        .layer(TraceLayer::new_for_http())
        .with_state(client)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use reqwest::Client;
    use tower::ServiceExt;

    use super::*;
    use crate::extract::Extractor;
    use crate::messaging::spawn_page_context;
    use crate::page::PageSource;
    use crate::poll::PollPolicy;
    use crate::retrieve::Retriever;
    use crate::session::{PageSession, SessionSettings};
    use crate::test_support::{DETAIL_PAGE, EXAMPLE_VIEWER, RecordingSaver, viewer_page};

    fn router_for(snapshot: &std::path::Path) -> Router {
        let session = Arc::new(PageSession::new(
            PageSource::Snapshot(snapshot.to_path_buf()),
            Url::parse(DETAIL_PAGE).unwrap(),
            Extractor::default(),
            Retriever::new(Client::new(), RecordingSaver::default()),
            SessionSettings {
                poll: PollPolicy {
                    interval: Duration::from_millis(10),
                    max_attempts: 2,
                },
                settle: Duration::ZERO,
            },
        ));
        let (client, _handle) = spawn_page_context(session);
        create_router(client)
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn reference_endpoint_returns_reference() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("page.html");
        std::fs::write(&snapshot, viewer_page(EXAMPLE_VIEWER)).unwrap();

        let response = router_for(&snapshot)
            .oneshot(Request::get("/api/reference").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["data"]["sourceUrl"], "https://cdn.example/books/math.pdf");
        assert_eq!(json["data"]["suggestedName"], "math.pdf");
    }

    #[tokio::test]
    async fn missing_reference_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("page.html");
        std::fs::write(&snapshot, "<html><body></body></html>").unwrap();

        let response = router_for(&snapshot)
            .oneshot(Request::get("/api/reference").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error_kind"], "reference_not_found");
    }

    #[tokio::test]
    async fn unreachable_context_is_503() {
        let (client, rx) = ContextClient::channel();
        drop(rx);

        let response = create_router(client)
            .oneshot(Request::post("/api/download").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn navigate_rejects_bad_url() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("page.html");
        std::fs::write(&snapshot, viewer_page(EXAMPLE_VIEWER)).unwrap();

        let response = router_for(&snapshot)
            .oneshot(
                Request::post("/api/navigate")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"url":"not a url"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn navigate_accepts_detail_page() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("page.html");
        std::fs::write(&snapshot, viewer_page(EXAMPLE_VIEWER)).unwrap();

        let response = router_for(&snapshot)
            .oneshot(
                Request::post("/api/navigate")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(format!(r#"{{"url":"{DETAIL_PAGE}"}}"#)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn failure_kinds_map_to_statuses() {
        let save = ContextResponse::failure(&crate::error::Error::Save("disk full".into()));
        assert_eq!(status_for(&save), StatusCode::BAD_GATEWAY);
        let page = ContextResponse::failure(&crate::error::Error::UnsupportedPage("x".into()));
        assert_eq!(status_for(&page), StatusCode::BAD_REQUEST);
    }
}
