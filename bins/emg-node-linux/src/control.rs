//! Local control endpoint over axum.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use emg_core::control::MEASURE_PATH;
use emg_core::{ControlEndpoint, ControlResponse};

/// Build the control router: `GET /measure`, everything else 404.
pub fn router(endpoint: ControlEndpoint) -> Router {
    Router::new()
        .route(MEASURE_PATH, get(measure_handler).fallback(other_handler))
        .fallback(other_handler)
        .with_state(Arc::new(endpoint))
}

async fn measure_handler(State(endpoint): State<Arc<ControlEndpoint>>) -> Response {
    to_response(endpoint.measure())
}

async fn other_handler(
    State(endpoint): State<Arc<ControlEndpoint>>,
    method: Method,
    uri: Uri,
) -> Response {
    to_response(endpoint.handle(method.as_str(), uri.path()))
}

fn to_response(response: ControlResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, ControlResponse::CONTENT_TYPE)],
        response.body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use emg_core::control::{ALREADY_RUNNING_BODY, NOT_FOUND_BODY, STARTED_BODY};
    use emg_core::MeasureTrigger;
    use tower::ServiceExt;

    async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_measure_acknowledges_twice_runs_once() {
        let trigger = MeasureTrigger::new();
        let app = router(ControlEndpoint::new(trigger.clone()));

        let (status, body) = call(app.clone(), "GET", "/measure").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, STARTED_BODY);

        let (status, body) = call(app.clone(), "GET", "/measure").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, ALREADY_RUNNING_BODY);
        assert!(trigger.is_pending());

        trigger.complete();
        let (_, body) = call(app, "GET", "/measure?x=1").await;
        assert_eq!(body, STARTED_BODY);
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let trigger = MeasureTrigger::new();
        let app = router(ControlEndpoint::new(trigger.clone()));

        let (status, body) = call(app.clone(), "GET", "/foo").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, NOT_FOUND_BODY);

        let (status, _) = call(app, "POST", "/measure").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!trigger.is_pending());
    }

    #[tokio::test]
    async fn test_plain_text_content_type() {
        let app = router(ControlEndpoint::new(MeasureTrigger::new()));
        let request = Request::builder()
            .uri("/nothing")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain"
        );
    }
}
