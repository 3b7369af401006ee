//! Plain-HTTP surface served on the demultiplexed HTTP route.

use axum::{Router, http::StatusCode, http::Version, routing::get};

pub const HEALTHCHECK_PATH: &str = "/healthcheck";

/// Routes served to HTTP/1.x connections. Unknown paths get axum's 404.
pub fn router() -> Router {
    Router::new().route(HEALTHCHECK_PATH, get(healthcheck))
}

async fn healthcheck(version: Version) -> (StatusCode, &'static str) {
    tracing::info!(?version, "Health check");
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::Request,
    };
    use tower::ServiceExt;

    async fn get_path(path: &str) -> (StatusCode, Vec<u8>) {
        let response = router()
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn healthcheck_returns_ok() {
        let (status, body) = get_path(HEALTHCHECK_PATH).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn unknown_paths_are_not_found() {
        let (status, _) = get_path("/").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get_path("/healthcheck/extra").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
