//! HTTP front end for the usage tools (`serve` feature).
use crate::tools::ToolServer;
use std::sync::Arc;

#[cfg(feature = "serve")]
#[derive(Clone)]
struct AppState {
    server: Arc<ToolServer>,
}

#[cfg(feature = "serve")]
pub fn router(server: Arc<ToolServer>) -> axum::Router {
    use axum::routing::{get, post};
    use tower_http::cors::CorsLayer;

    axum::Router::new()
        .route("/api/health", get(health))
        .route("/api/tools", get(list_tools))
        .route("/api/tools/{name}", post(call_tool))
        .with_state(AppState { server })
        .layer(CorsLayer::permissive())
}

#[cfg(feature = "serve")]
pub async fn run(server: Arc<ToolServer>) -> Result<(), Box<dyn std::error::Error>> {
    let serve_config = server.config().serve.clone();
    let addr = format!("{}:{}", serve_config.bind, serve_config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("serve listening on {local_addr}");

    axum::serve(listener, router(server)).await?;
    Ok(())
}

#[cfg(not(feature = "serve"))]
pub async fn run(_server: Arc<ToolServer>) -> Result<(), Box<dyn std::error::Error>> {
    Err("built without the `serve` feature".into())
}

#[cfg(feature = "serve")]
async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({"ok": true}))
}

#[cfg(feature = "serve")]
async fn list_tools(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({"tools": state.server.catalogue()}))
}

#[cfg(feature = "serve")]
async fn call_tool(
    axum::extract::State(state): axum::extract::State<AppState>,
    axum::extract::Path(name): axum::extract::Path<String>,
    body: axum::body::Bytes,
) -> Result<axum::Json<crate::tools::ToolOutput>, (axum::http::StatusCode, axum::Json<serde_json::Value>)>
{
    use crate::tools::ToolError;
    use axum::http::StatusCode;

    // An empty body means "all defaults".
    let args: Option<serde_json::Value> = if body.is_empty() {
        None
    } else {
        Some(serde_json::from_slice(&body).map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                axum::Json(serde_json::json!({"error": format!("invalid JSON body: {e}")})),
            )
        })?)
    };

    state
        .server
        .call_by_name(&name, args.as_ref())
        .await
        .map(axum::Json)
        .map_err(|e| {
            let status = match e {
                ToolError::UnknownTool(_) => StatusCode::NOT_FOUND,
                ToolError::InvalidParams(_) => StatusCode::BAD_REQUEST,
            };
            (status, axum::Json(serde_json::json!({"error": e.to_string()})))
        })
}

#[cfg(all(test, feature = "serve"))]
mod tests {
    use super::*;
    use crate::config::UsageConfig;
    use crate::source::{RawLogEvent, ReplaySource};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use tower::ServiceExt;

    fn app() -> axum::Router {
        let ts = Utc::now().timestamp_millis() - 1_000;
        let events = vec![
            RawLogEvent::new(ts, r#"{"modelId":"m1","identity":{"arn":"u1"},"input":{"inputTokenCount":10},"output":{"outputTokenCount":5}}"#),
            RawLogEvent::new(ts, r#"{"modelId":"m2","identity":{"arn":"u1"},"input":{"inputTokenCount":1}}"#),
        ];
        let server = ToolServer::new(
            Box::new(ReplaySource::from_events(events)),
            UsageConfig::default(),
        );
        router(Arc::new(server))
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let resp = app()
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["ok"], true);
    }

    #[tokio::test]
    async fn lists_tools() {
        let resp = app()
            .oneshot(Request::get("/api/tools").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["tools"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn user_stats_over_http() {
        let resp = app()
            .oneshot(post("/api/tools/get_user_usage_stats", r#"{"days":3}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = body_json(resp).await;
        assert_eq!(v["groupBy"], "userId");
        assert_eq!(v["rows"][0]["key"], "u1");
        assert_eq!(v["rows"][0]["totalTokens"]["sum"], 16);
        assert_eq!(v["rows"][0]["modelIds"], serde_json::json!(["m1", "m2"]));
    }

    #[tokio::test]
    async fn empty_body_uses_default_days() {
        let resp = app()
            .oneshot(post("/api/tools/get_raw_usage", ""))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn bad_days_is_400() {
        let resp = app()
            .oneshot(post("/api/tools/get_model_usage_stats", r#"{"days":-1}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_tool_is_404() {
        let resp = app()
            .oneshot(post("/api/tools/nope", "{}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
