use crate::server::service::handler::{KakikoService, healthz, midi_kakiko};
use axum::{
    Router,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

/// Builds the application router.
///
/// Stored drive files are served as static content under `/files`, which is
/// where [`kakiko_core::pack::DrivePacker`] points their URLs.
pub fn router(service: KakikoService) -> Router {
    let files = ServeDir::new(service.drive_root());

    Router::new()
        .route("/api/midi_kakiko", post(midi_kakiko))
        .route("/healthz", get(healthz))
        .nest_service("/files", files)
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(service)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::server::config::ServerConfig;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
        response::Response,
    };
    use kakiko_core::converter::ConverterConfig;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Harness {
        _dir: TempDir,
        service: KakikoService,
    }

    /// Starts a service whose converter is a `/bin/sh` script with `body`.
    async fn harness(body: impl FnOnce(&Path) -> String) -> Harness {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("convert.sh");
        std::fs::write(&script, body(dir.path())).unwrap();

        let config = ServerConfig {
            converter: ConverterConfig::new("/bin/sh", script)
                .with_timeout(Duration::from_secs(5)),
            num_workers: 1,
            queue_depth: 2,
            shutdown_timeout: Duration::from_secs(1),
            drive_root: dir.path().join("drive"),
            public_base_url: "http://kakiko.test/".to_string(),
            name_suffix: true,
            caller_header: header::HeaderName::from_static("x-kakiko-user"),
            server_addr: "127.0.0.1:0".to_string(),
            uds: false,
        };
        let service = KakikoService::new(&config).await.unwrap();
        Harness { _dir: dir, service }
    }

    /// A converter that writes a small WAV stub and prints its path.
    fn producing(dir: &Path) -> String {
        let out = dir.join("tmp_0123456789abcdef.wav");
        format!(
            "printf 'RIFF' > '{out}'\nprintf '%s\\n' '{out}'\n",
            out = out.display()
        )
    }

    fn post_mml(body: &str, caller: Option<&str>) -> Request<Body> {
        let mut builder = Request::post("/api/midi_kakiko")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(caller) = caller {
            builder = builder.header("x-kakiko-user", caller);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    #[tokio::test]
    async fn converts_stores_and_serves_the_file() {
        let h = harness(producing).await;
        let app = router(h.service.clone());

        let response = app
            .clone()
            .oneshot(post_mml(r#"{"mml":"CDEFGAB"}"#, Some("alice")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["userId"], "alice");
        assert_eq!(json["comment"], "KAKIKO | MML:CDEFGAB");
        assert_eq!(json["type"], "audio/wav");
        assert_eq!(json["size"], 4);

        // YYYY-MM-DD_HH_MM_SS_xxxxxxxx
        let name = json["name"].as_str().unwrap();
        assert_eq!(name.len(), 28);
        assert_eq!(&name[10..11], "_");

        let url = json["url"].as_str().unwrap();
        let path = url.strip_prefix("http://kakiko.test").unwrap();
        assert!(path.starts_with("/files/"));
        assert!(path.ends_with(".wav"));

        let served = app
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(served.status(), StatusCode::OK);
        assert_eq!(body_bytes(served).await, b"RIFF");
    }

    #[tokio::test]
    async fn anonymous_requests_are_stored_without_owner() {
        let h = harness(producing).await;

        let response = router(h.service.clone())
            .oneshot(post_mml(r#"{"mml":"C"}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["userId"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn converter_failure_is_an_mml_syntax_error() {
        let h = harness(|_| "echo 'Data is empty.' >&2\nexit 1\n".to_string()).await;

        let response = router(h.service.clone())
            .oneshot(post_mml(r#"{"mml":"!!!invalid!!!"}"#, Some("alice")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "MIDI_KAKIKO_ERROR");
        assert_eq!(json["error"]["message"], "MML Syntax Error.");
        assert_eq!(json["error"]["kind"], "client");
        let stored = std::fs::read_dir(h.service.drive_root()).unwrap().count();
        assert_eq!(stored, 0);
    }

    #[tokio::test]
    async fn missing_output_file_is_an_internal_error() {
        let h = harness(|_| "echo /nonexistent/tmp_gone.wav\n".to_string()).await;

        let response = router(h.service.clone())
            .oneshot(post_mml(r#"{"mml":"C"}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "INTERNAL_ERROR");
        assert!(!json.to_string().contains("nonexistent"));
    }

    #[tokio::test]
    async fn malformed_bodies_are_invalid_params() {
        let h = harness(producing).await;

        for body in [r#"{"mml":1}"#, r#"{}"#, r#"{"mml":"C","extra":true}"#, "not json"] {
            let response = router(h.service.clone())
                .oneshot(post_mml(body, None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
            assert_eq!(body_json(response).await["error"]["code"], "INVALID_PARAM");
        }
    }

    #[tokio::test]
    async fn health_flips_and_conversions_are_refused_after_shutdown() {
        let h = harness(producing).await;
        let app = router(h.service.clone());

        let health = app
            .clone()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);
        assert_eq!(body_bytes(health).await, b"SERVING");

        h.service.shutdown().await.unwrap();

        let health = app
            .clone()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_bytes(health).await, b"NOT_SERVING");

        let response = app
            .oneshot(post_mml(r#"{"mml":"C"}"#, Some("alice")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["error"]["code"], "SERVICE_UNAVAILABLE");
    }
}
