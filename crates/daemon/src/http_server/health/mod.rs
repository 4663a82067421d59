use axum::routing::get;
use axum::Router;

pub mod liveness;

pub fn router<S: Clone + Send + Sync + 'static>() -> Router<S> {
    Router::new().route("/livez", get(liveness::handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_livez_is_routed() {
        let response = router::<()>()
            .oneshot(Request::get("/livez").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_probe_is_not_found() {
        let response = router::<()>()
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
