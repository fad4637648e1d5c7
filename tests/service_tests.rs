//! End-to-end tests: launch, capture, query, shut down.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use vigil::capture;
use vigil::pipeline::capture_loop::LoopOptions;
use vigil::serve::{self, AppState};
use vigil::supervisor::{ServiceState, Supervisor};
use vigil::vision::BackgroundSubtractor;
use vigil::{CaptureConfig, PublishMode};

fn synthetic_config() -> CaptureConfig {
    CaptureConfig {
        device: "synthetic".into(),
        width: 32,
        height: 24,
        lores_width: 8,
        lores_height: 6,
        fps: 200,
        ..CaptureConfig::default()
    }
}

fn loop_options(config: &CaptureConfig) -> LoopOptions {
    LoopOptions {
        publish: config.publish,
        max_consecutive_failures: config.max_consecutive_failures,
    }
}

async fn get(router: &axum::Router, uri: &str) -> axum::response::Response {
    router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

fn sequence_of(response: &axum::response::Response) -> u64 {
    response
        .headers()
        .get("x-frame-sequence")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap()
}

#[tokio::test]
async fn frames_flow_from_capture_to_http() {
    let config = synthetic_config();
    let mut supervisor = Supervisor::new(Duration::from_millis(100));
    let service = supervisor
        .launch(
            || capture::open_source(&config),
            Box::new(BackgroundSubtractor::new()),
            loop_options(&config),
        )
        .await
        .expect("the synthetic source always launches");
    assert_eq!(supervisor.state(), ServiceState::Ready);

    let router = serve::router(AppState::new(
        service.slot(),
        service.capture_task(),
        (config.lores_width, config.lores_height),
    ));

    let response = get(&router, "/frame").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "image/jpeg"
    );
    let first = sequence_of(&response);
    assert!(first > 0);

    // Capture keeps running underneath; a later query observes progress
    tokio::time::sleep(Duration::from_millis(100)).await;
    let response = get(&router, "/frame").await;
    assert!(sequence_of(&response) > first);

    let response = get(&router, "/healthz").await;
    assert_eq!(response.status(), StatusCode::OK);

    let task = service.capture_task();
    service.shutdown(Duration::from_secs(1)).await;
    assert!(task.is_finished());

    // The last frame outlives the loop; health says the loop is gone
    let response = get(&router, "/frame").await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = get(&router, "/healthz").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn mask_mode_serves_lossless_masks() {
    let config = CaptureConfig {
        publish: PublishMode::Mask,
        ..synthetic_config()
    };
    let mut supervisor = Supervisor::new(Duration::from_millis(100));
    let service = supervisor
        .launch(
            || capture::open_source(&config),
            Box::new(BackgroundSubtractor::new()),
            loop_options(&config),
        )
        .await
        .unwrap();

    let router = serve::router(AppState::new(
        service.slot(),
        service.capture_task(),
        (config.lores_width, config.lores_height),
    ));

    let response = get(&router, "/frame").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/png");

    service.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn startup_failure_exposes_nothing() {
    // A device node that cannot exist on the test host
    let config = CaptureConfig {
        device: "/dev/video99".into(),
        ..synthetic_config()
    };
    let mut supervisor = Supervisor::new(Duration::from_millis(50));
    let result = supervisor
        .launch(
            || capture::open_source(&config),
            Box::new(BackgroundSubtractor::new()),
            loop_options(&config),
        )
        .await;

    assert!(result.is_err());
    assert_eq!(supervisor.state(), ServiceState::Failed);
    // No RunningService exists, so no router and no listener can be built
}
