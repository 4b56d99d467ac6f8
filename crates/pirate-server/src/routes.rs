//! The HTTP request surface: one wildcard POST route.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use pirate_runner::deadline_token;

use crate::error::ServerError;
use crate::server::Server;
use crate::validate::validate_request;

/// Builds the router: every POST path is matched against the configured
/// handler endpoints. Anything else gets the router's defaults.
pub fn router(server: Arc<Server>) -> Router {
    Router::new()
        .route("/{*path}", post(handle_webhook))
        .with_state(server)
}

/// The main entrypoint of the server: match the endpoint, authenticate,
/// capture the payload, admit a job, and answer before the job runs.
async fn handle_webhook(
    State(server): State<Arc<Server>>,
    request: Request,
) -> Result<StatusCode, ServerError> {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_owned();

    debug!(path = %path, "Checking for a matching handler");

    let (index, handler) = server.find_handler(&path).inspect_err(|_| {
        debug!(path = %path, "No matching handler, returning 404");
    })?;

    let cancel = deadline_token(&CancellationToken::new(), server.validation_timeout());
    let validation = validate_request(&cancel, handler, &parts.headers).await;
    cancel.cancel();

    if let Err(error) = validation {
        // No reason to let strangers know the endpoint is valid.
        match &error {
            ServerError::AuthFailed => debug!(handler = %handler.name, "Authentication failed"),
            _ => error!(error = %error, "Unexpected request validation error"),
        }
        return Err(error);
    }

    let payload = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(error) => {
            error!(error = %error, "Error reading the request body");
            return Err(ServerError::BodyRead);
        }
    };

    // One value per key; for repeated headers the last one wins.
    let mut headers = HashMap::with_capacity(parts.headers.len());
    for (key, value) in parts.headers.iter() {
        if let Ok(value) = value.to_str() {
            headers.insert(key.as_str().to_owned(), value.to_owned());
        }
    }

    // Admission only: the job itself runs in the background under the
    // scheduler's lifetime, not the request's.
    server.dispatch(index, headers, payload).await;

    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    use pirate_config::{
        Auth, ByteSize, Config, ExecutionPolicy, Handler, LogSink, Logging, ServerConfig,
    };

    fn test_server(handlers: Vec<Handler>) -> Arc<Server> {
        let cfg = Config {
            server: ServerConfig {
                host: "localhost".to_string(),
                port: 3939,
                logging: Logging {
                    dir: LogSink::Stdout,
                },
                request_timeout: Duration::from_secs(150),
                max_header_bytes: ByteSize(1024),
            },
            handlers,
        };

        Arc::new(Server::new(cfg).expect("server initializes"))
    }

    fn list_handler(endpoint: &str, tokens: &[&str]) -> Handler {
        Handler {
            auth: Auth::List {
                token: tokens.iter().map(|t| t.to_string()).collect(),
            },
            endpoint: endpoint.to_string(),
            name: format!("handler {endpoint}"),
            run: "true".to_string(),
            policy: ExecutionPolicy::Parallel,
        }
    }

    fn command_handler(endpoint: &str, auth_run: &str) -> Handler {
        Handler {
            auth: Auth::Command {
                run: auth_run.to_string(),
            },
            endpoint: endpoint.to_string(),
            name: format!("handler {endpoint}"),
            run: "true".to_string(),
            policy: ExecutionPolicy::Parallel,
        }
    }

    fn post(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some(token) = token {
            builder = builder.header("X-Authorization", token);
        }
        builder.body(Body::from("{}")).unwrap()
    }

    #[tokio::test]
    async fn list_auth_accepts_a_matching_token() {
        let app = router(test_server(vec![list_handler(
            "/h",
            &["secret-A", "secret-B"],
        )]));

        let resp = app.oneshot(post("/h", Some("secret-A"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn list_auth_rejects_a_wrong_token() {
        let app = router(test_server(vec![list_handler(
            "/h",
            &["secret-A", "secret-B"],
        )]));

        let resp = app.oneshot(post("/h", Some("nope"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_auth_rejects_a_missing_token() {
        let app = router(test_server(vec![list_handler("/h", &["secret-A"])]));

        let resp = app.oneshot(post("/h", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_endpoints_get_404() {
        let app = router(test_server(vec![list_handler("/h", &["secret-A"])]));

        let resp = app.oneshot(post("/other", Some("secret-A"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn command_auth_accepts_on_zero_exit() {
        let app = router(test_server(vec![command_handler("/h", "exit 0")]));

        let resp = app.oneshot(post("/h", Some("anything"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn command_auth_rejects_on_nonzero_exit() {
        let app = router(test_server(vec![command_handler("/h", "exit 1")]));

        let resp = app.oneshot(post("/h", Some("anything"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn command_auth_sees_the_token() {
        let app = router(test_server(vec![command_handler(
            "/h",
            r#"[ "$PIRATE_TOKEN" = "expected" ]"#,
        )]));

        let ok = app
            .clone()
            .oneshot(post("/h", Some("expected")))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let rejected = app.oneshot(post("/h", Some("other"))).await.unwrap();
        assert_eq!(rejected.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn acceptance_does_not_wait_for_the_script() {
        let mut handler = list_handler("/slow", &["tk"]);
        handler.run = "sleep 30".to_string();
        let app = router(test_server(vec![handler]));

        let started = tokio::time::Instant::now();
        let resp = app.oneshot(post("/slow", Some("tk"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
