//! End-to-end tests against a running server.
//!
//! The default configuration names no engine artifacts, so jobs run on the
//! native CPU engine. Tests that need a wasm engine build state around a
//! custom loader factory.

use std::sync::Arc;
use std::time::Duration;

use toolkit_media_common::{AdsConfig, EngineConfig, RouteGate, ToolkitConfig};
use toolkit_media_core::{
    EngineBuild, LoadState, LoaderOptions, MediaEngineLoader, ReportedEnvironment,
    StaticArtifactSource,
};
use toolkit_media_host::register_all;
use toolkit_media_server::router::{AdminRouterConfig, RouterOptions};
use toolkit_media_server::shell::{AdSlots, PushQueueAdClient};
use toolkit_media_server::state::LoaderFactory;
use toolkit_media_server::{AppState, MediaServer, TestHandle};

/// Never returns.
const SPIN_ENGINE: &str = r#"
    (module
      (memory (export "memory") 1)
      (func (export "_start")
        (loop $forever (br $forever))))
"#;

async fn start() -> TestHandle {
    MediaServer::start_test(&ToolkitConfig::default(), &AdsConfig::default())
        .await
        .unwrap()
}

async fn start_with_admin() -> TestHandle {
    let state = AppState::new(&ToolkitConfig::default(), &AdsConfig::default()).unwrap();
    let mut options = RouterOptions::new(Duration::from_secs(30));
    options.admin = Some(AdminRouterConfig {
        prefix: "/admin".to_string(),
        token: "test-token".to_string(),
    });
    MediaServer::start_test_with(state, options).await.unwrap()
}

/// State whose loaders come from `env` and serve `engine` as the
/// single-threaded build, without the CPU fallback.
fn wasm_state(env: ReportedEnvironment, engine: &'static str) -> AppState {
    let gate = Arc::new(RouteGate::from_config(&ToolkitConfig::default().isolation).unwrap());
    let factory: LoaderFactory = Arc::new(move || {
        let source = StaticArtifactSource::new().with_build(EngineBuild::SingleThreaded, engine, None);
        Ok(MediaEngineLoader::builder(Arc::new(env.clone()))
            .options(LoaderOptions {
                prefer_multi_thread: false,
                verbose: false,
            })
            .engine_config(EngineConfig {
                pooling_allocator: false,
                cache_compiled_modules: false,
                ..Default::default()
            })
            .artifact_source(Arc::new(source), register_all)
            .cpu_fallback(false)
            .build())
    });
    let ads = AdSlots::new(
        Arc::clone(&gate),
        Arc::new(PushQueueAdClient::from_config(&AdsConfig::default())),
        true,
    );
    AppState::with_factory(gate, factory, ads).unwrap()
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([30, 120, 200]));
    let mut out = std::io::Cursor::new(Vec::new());
    image.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

fn json(body: &str) -> serde_json::Value {
    serde_json::from_str(body).unwrap()
}

// ============================================================================
// Test: Health
// ============================================================================

#[tokio::test]
async fn test_health() {
    let server = start().await;

    let response = reqwest::get(format!("{}/health", server.url())).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "OK");

    server.shutdown().await;
}

// ============================================================================
// Test: Route gate and ad suppression
// ============================================================================

#[tokio::test]
async fn test_isolated_page_has_headers_and_no_ads() {
    let server = start().await;

    for path in ["/tools/image-resizer", "/fr/tools/audio-converter"] {
        let response = reqwest::get(format!("{}{path}", server.url())).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["cross-origin-opener-policy"], "same-origin");
        assert_eq!(response.headers()["cross-origin-embedder-policy"], "require-corp");

        let body = response.text().await.unwrap();
        assert!(!body.contains("ad-slot"), "ads rendered on {path}");
        assert!(!body.contains("adsbygoogle"), "ad script on {path}");
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_plain_page_has_ads_and_no_headers() {
    let server = start().await;

    let response = reqwest::get(format!("{}/tools/password-generator", server.url()))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().get("cross-origin-opener-policy").is_none());
    assert!(response.headers().get("cross-origin-embedder-policy").is_none());

    let body = response.text().await.unwrap();
    assert_eq!(body.matches("class=\"ad-slot\"").count(), 2);

    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_engine_asset_still_gated() {
    let server = start().await;

    let response = reqwest::get(format!("{}/ffmpeg/ffmpeg-core.wasm", server.url()))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.headers()["cross-origin-resource-policy"], "cross-origin");

    server.shutdown().await;
}

// ============================================================================
// Test: Capability API
// ============================================================================

#[tokio::test]
async fn test_capabilities_isolated_client() {
    let server = start().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/capabilities?path=/tools/video-to-gif", server.url()))
        .header("content-type", "application/json")
        .body(r#"{"wasm": true, "simd": true, "sharedMemory": true, "crossOriginIsolated": true}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body = json(&response.text().await.unwrap());
    assert_eq!(body["capabilities"]["backends"][0], "wasm-threads");
    assert_eq!(body["capabilities"]["backends"].as_array().unwrap().last().unwrap(), "cpu");
    assert_eq!(body["recommendedBuild"], "multi-threaded");
    assert_eq!(body["availability"]["status"], "available");

    server.shutdown().await;
}

// ============================================================================
// Test: Image job API
// ============================================================================

#[tokio::test]
async fn test_resize_job_loads_engine_on_demand() {
    let server = start().await;
    let client = reqwest::Client::new();

    let status = json(
        &reqwest::get(format!("{}/api/engine", server.url()))
            .await
            .unwrap()
            .text()
            .await
            .unwrap(),
    );
    assert_eq!(status["state"], "idle");

    let response = client
        .post(format!(
            "{}/api/tools/image-resizer/jobs?width=200&format=jpg&quality=80",
            server.url()
        ))
        .header("content-type", "image/png")
        .body(png(1000, 500))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "image/jpeg");
    assert_eq!(response.headers()["x-engine-backend"], "cpu");

    let bytes = response.bytes().await.unwrap();
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (200, 100));

    let status = json(
        &reqwest::get(format!("{}/api/engine", server.url()))
            .await
            .unwrap()
            .text()
            .await
            .unwrap(),
    );
    assert_eq!(status["state"], "ready");
    assert_eq!(status["backend"], "cpu");

    server.shutdown().await;
}

#[tokio::test]
async fn test_resize_job_rejects_garbage() {
    let server = start().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/tools/image-resizer/jobs?width=10", server.url()))
        .header("content-type", "image/png")
        .body(b"definitely not a png".to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);

    // The failed job leaves the engine usable.
    let response = client
        .post(format!("{}/api/tools/image-resizer/jobs?width=10", server.url()))
        .header("content-type", "image/png")
        .body(png(40, 20))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "image/png");

    server.shutdown().await;
}

#[tokio::test]
async fn test_resize_job_bad_params() {
    let server = start().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/tools/image-resizer/jobs?format=tiff", server.url()))
        .header("content-type", "image/png")
        .body(png(4, 4))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert!(response.text().await.unwrap().contains("Unsupported output format"));

    server.shutdown().await;
}

// ============================================================================
// Test: Admin reset
// ============================================================================

#[tokio::test]
async fn test_admin_reset_recovers_terminated_engine() {
    let server = start_with_admin().await;
    let client = reqwest::Client::new();

    let loader = server.state().loader();
    assert!(loader.load().await);
    loader.terminate();

    let status = json(
        &reqwest::get(format!("{}/api/engine", server.url()))
            .await
            .unwrap()
            .text()
            .await
            .unwrap(),
    );
    assert_eq!(status["state"], "error");
    assert_eq!(status["message"], "Engine terminated");

    let ready = reqwest::get(format!("{}/ready", server.url())).await.unwrap();
    assert_eq!(ready.status(), 503);

    let denied = client
        .post(format!("{}/admin/engine/reset", server.url()))
        .header("X-Admin-Token", "wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 401);

    let reset = client
        .post(format!("{}/admin/engine/reset", server.url()))
        .header("X-Admin-Token", "test-token")
        .send()
        .await
        .unwrap();
    assert_eq!(reset.status(), 200);
    let body = json(&reset.text().await.unwrap());
    assert_eq!(body["previous_state"], "error");
    assert_eq!(body["state"], "idle");

    let response = client
        .post(format!("{}/api/tools/image-resizer/jobs?width=8", server.url()))
        .header("content-type", "image/png")
        .body(png(16, 16))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    server.shutdown().await;
}

// ============================================================================
// Test: Job timeout and unavailable engines
// ============================================================================

#[tokio::test]
async fn test_resize_job_timeout_resets_engine() {
    let env = ReportedEnvironment {
        wasm: true,
        simd: true,
        ..Default::default()
    };
    let state = wasm_state(env, SPIN_ENGINE).with_job_timeout(Duration::from_millis(300));
    let server = MediaServer::start_test_with(state, RouterOptions::new(Duration::from_secs(30)))
        .await
        .unwrap();
    let client = reqwest::Client::new();
    let first = server.state().loader();

    let response = tokio::time::timeout(
        Duration::from_secs(10),
        client
            .post(format!("{}/api/tools/image-resizer/jobs?width=8", server.url()))
            .header("content-type", "image/png")
            .body(png(16, 16))
            .send(),
    )
    .await
    .expect("request should return once the job times out")
    .unwrap();
    assert_eq!(response.status(), 408);
    assert!(response.text().await.unwrap().contains("Job timed out"));

    let current = server.state().loader();
    assert!(!Arc::ptr_eq(&first, &current));
    assert!(matches!(first.state(), LoadState::Error(_)));
    assert_eq!(current.state(), LoadState::Idle);

    server.shutdown().await;
}

#[tokio::test]
async fn test_resize_job_unsupported_environment() {
    let state = wasm_state(ReportedEnvironment::default(), SPIN_ENGINE);
    let server = MediaServer::start_test_with(state, RouterOptions::new(Duration::from_secs(30)))
        .await
        .unwrap();
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/tools/image-resizer/jobs?width=8", server.url()))
        .header("content-type", "image/png")
        .body(png(16, 16))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 501);

    // A terminated engine is a temporary outage, not a missing feature.
    let state = wasm_state(ReportedEnvironment::default(), SPIN_ENGINE);
    state.loader().terminate();
    let server_terminated =
        MediaServer::start_test_with(state, RouterOptions::new(Duration::from_secs(30)))
            .await
            .unwrap();
    let response = client
        .post(format!("{}/api/tools/image-resizer/jobs?width=8", server_terminated.url()))
        .header("content-type", "image/png")
        .body(png(16, 16))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);

    server_terminated.shutdown().await;
    server.shutdown().await;
}
