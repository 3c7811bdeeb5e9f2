//! HTTP front end for remote keyword runners.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `/mcp` | MCP over streamable HTTP (POST requests, GET event stream) |
//! | `/health` | [`ServerStatus`] as JSON |
//! | `/` | Tool index |

use crate::server::KeywordServer;
use crate::types::ServerStatus;
use axum::extract::State;
use axum::response::{Html, Json};
use axum::routing::get;
use axum::Router;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Routes for the keyword server. Every MCP session shares the same library.
pub fn router(server: KeywordServer) -> Router {
    let sessions = server.clone();
    let mcp = StreamableHttpService::new(
        move || Ok(sessions.clone()),
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig::default(),
    );

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .nest_service("/mcp", mcp)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(server)
}

async fn health(State(server): State<KeywordServer>) -> Json<ServerStatus> {
    Json(server.status().await)
}

async fn index() -> Html<String> {
    let tools: String = KeywordServer::build_tools_list()
        .iter()
        .map(|tool| {
            let description = tool.description.as_deref().unwrap_or_default();
            format!("<li><code>{}</code> {}</li>\n", tool.name, description)
        })
        .collect();

    Html(format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Sphere keyword server</title></head>\n<body>\n\
         <h1>Sphere keyword server</h1>\n\
         <p>MCP endpoint: <code>/mcp</code>. Status: <code>/health</code>.</p>\n\
         <ul>\n{tools}</ul>\n</body>\n</html>\n"
    ))
}

/// Serve [`router`] on an already bound listener until `shutdown` resolves.
///
/// In-flight requests are allowed to finish once `shutdown` fires.
pub async fn serve(
    server: KeywordServer,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "Serving keywords over HTTP");
    axum::serve(listener, router(server))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sphere_api::sim::SimulatedDatacenter;
    use sphere_core::LibraryConfig;
    use tower::ServiceExt;

    async fn get_body(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_reports_connections() {
        let dc = SimulatedDatacenter::new();
        dc.add_host("vc.lab", "admin", "secret").await;
        let server = KeywordServer::new(dc, LibraryConfig::default());
        server
            .library_arc()
            .lock()
            .await
            .open_connection("vc.lab", "admin", "secret", None)
            .await
            .unwrap();

        let (status, body) = get_body(router(server), "/health").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["hosts"], serde_json::json!(["vc.lab"]));
        assert_eq!(json["registered_connections"], 1);
        assert_eq!(json["current_index"], 1);
    }

    #[tokio::test]
    async fn test_index_lists_tools() {
        let server = KeywordServer::new(SimulatedDatacenter::new(), LibraryConfig::default());
        let (status, body) = get_body(router(server), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<code>run_synchronous_process</code>"));
        assert_eq!(body.matches("<li>").count(), 29);
    }
}
