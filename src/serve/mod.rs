//! The frame query service.
//!
//! One atomic slot load per request; all encoding happens on the caller's
//! task so a slow or bursty client can never stall the capture loop.
//! Callers only ever see an image payload or "not ready" - internal error
//! kinds stop here.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use axum::extract::{Query, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use color_eyre::{eyre::eyre, Result};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, GrayImage, ImageEncoder, RgbImage};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::error;

use crate::capture::frame::PixelFormat;
use crate::capture::{decoder, Frame};
use crate::pipeline::FrameSlot;

const JPEG_QUALITY: u8 = 85;

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    slot: Arc<FrameSlot>,
    capture_task: Arc<JoinHandle<()>>,
    lores: (u32, u32),
}

impl AppState {
    pub fn new(slot: Arc<FrameSlot>, capture_task: Arc<JoinHandle<()>>, lores: (u32, u32)) -> Self {
        Self {
            slot,
            capture_task,
            lores,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/frame", get(latest_frame))
        .route("/healthz", get(healthz))
        .with_state(state)
}

#[derive(Deserialize)]
struct FrameQuery {
    stream: Option<String>,
}

#[derive(Serialize)]
struct NotReady {
    status: &'static str,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    capture_alive: bool,
    frames_captured: u64,
    last_frame_age_ms: Option<u64>,
}

async fn latest_frame(State(state): State<AppState>, Query(query): Query<FrameQuery>) -> Response {
    let started = Instant::now();

    let Some(frame) = state.slot.read() else {
        return not_ready();
    };

    let resize_to = matches!(query.stream.as_deref(), Some("lores")).then_some(state.lores);
    match encode_payload(&frame, resize_to) {
        Ok(payload) => {
            metrics::histogram!("query_latency_us").record(started.elapsed().as_micros() as f64);
            image_response(&frame, payload)
        }
        Err(e) => {
            error!("Failed to encode frame {}: {e:#}", frame.meta.sequence);
            not_ready()
        }
    }
}

async fn healthz(State(state): State<AppState>) -> Response {
    let alive = !state.capture_task.is_finished();
    let latest = state.slot.read();

    let health = Health {
        status: if alive { "ok" } else { "capture stopped" },
        capture_alive: alive,
        frames_captured: state.slot.latest_sequence().unwrap_or(0),
        last_frame_age_ms: latest.map(|frame| frame.age().as_millis() as u64),
    };
    let code = if alive {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(health)).into_response()
}

fn not_ready() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(NotReady {
            status: "not ready",
        }),
    )
        .into_response()
}

struct Payload {
    bytes: Vec<u8>,
    content_type: &'static str,
}

fn image_response(frame: &Frame, payload: Payload) -> Response {
    let captured_ms = frame
        .captured_at
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static(payload.content_type),
            ),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
            (
                HeaderName::from_static("x-frame-sequence"),
                HeaderValue::from(frame.meta.sequence),
            ),
            (
                HeaderName::from_static("x-frame-captured-at-ms"),
                HeaderValue::from(captured_ms),
            ),
            (
                HeaderName::from_static("x-frame-age-ms"),
                HeaderValue::from(frame.age().as_millis() as u64),
            ),
        ],
        payload.bytes,
    )
        .into_response()
}

/// Encode the latest frame for the wire. Same frame in, same bytes out,
/// so repeated queries between publishes are byte-identical.
fn encode_payload(frame: &Frame, resize_to: Option<(u32, u32)>) -> Result<Payload> {
    // Captured MJPEG is already a wire-ready JPEG
    if frame.meta.format == PixelFormat::Mjpeg && resize_to.is_none() {
        return Ok(Payload {
            bytes: frame.data.to_vec(),
            content_type: "image/jpeg",
        });
    }

    // Foreground masks stay lossless; JPEG would smear a binary image
    if frame.meta.format == PixelFormat::Gray8 {
        let image = GrayImage::from_raw(frame.meta.width, frame.meta.height, frame.data.to_vec())
            .ok_or_else(|| eyre!("mask buffer does not match its geometry"))?;
        let image = match resize_to {
            Some((w, h)) => image::imageops::resize(&image, w, h, image::imageops::FilterType::Triangle),
            None => image,
        };
        let mut bytes = Vec::new();
        PngEncoder::new(&mut bytes).write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::L8,
        )?;
        return Ok(Payload {
            bytes,
            content_type: "image/png",
        });
    }

    let rgb = decoder::to_rgb24(frame)?;
    let image = RgbImage::from_raw(rgb.meta.width, rgb.meta.height, rgb.data.to_vec())
        .ok_or_else(|| eyre!("frame buffer does not match its geometry"))?;
    let image = match resize_to {
        Some((w, h)) => image::imageops::resize(&image, w, h, image::imageops::FilterType::Triangle),
        None => image,
    };
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY).encode(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(Payload {
        bytes,
        content_type: "image/jpeg",
    })
}
