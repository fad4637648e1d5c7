//! Pixel format decode to packed RGB24.
//!
//! The capture loop decodes every captured frame before handing it to the
//! vision transform; the frame service uses the same path when it has to
//! re-encode or downscale a payload.

use std::sync::Arc;

use jpeg_decoder::Decoder;

use super::frame::{Frame, FrameMetadata, PixelFormat};
use crate::error::TransformError;

/// Decode a captured frame to packed RGB24. Frames already carrying RGB24
/// pass through without copying the pixel buffer.
pub fn to_rgb24(frame: &Frame) -> Result<Frame, TransformError> {
    match frame.meta.format {
        PixelFormat::Rgb24 => Ok(frame.clone()),
        PixelFormat::Mjpeg => {
            let mut decoder = Decoder::new(&frame.data[..]);
            let pixels = decoder.decode()?;
            let info = decoder
                .info()
                .ok_or(TransformError::UnsupportedFormat(PixelFormat::Mjpeg))?;
            let (width, height) = (u32::from(info.width), u32::from(info.height));
            match info.pixel_format {
                jpeg_decoder::PixelFormat::RGB24 => Ok(rgb_frame(frame, pixels, width, height)),
                jpeg_decoder::PixelFormat::L8 => {
                    Ok(rgb_frame(frame, expand_gray(&pixels), width, height))
                }
                _ => Err(TransformError::UnsupportedFormat(PixelFormat::Mjpeg)),
            }
        }
        PixelFormat::Yuyv4 => {
            let (width, height) = (frame.meta.width, frame.meta.height);
            let expected = width as usize * height as usize * 2;
            if frame.data.len() < expected {
                return Err(TransformError::Truncated {
                    len: frame.data.len(),
                    width,
                    height,
                    format: PixelFormat::Yuyv4,
                });
            }
            Ok(rgb_frame(
                frame,
                yuyv_to_rgb(&frame.data[..expected]),
                width,
                height,
            ))
        }
        PixelFormat::Gray8 => {
            let (width, height) = (frame.meta.width, frame.meta.height);
            let expected = width as usize * height as usize;
            if frame.data.len() < expected {
                return Err(TransformError::Truncated {
                    len: frame.data.len(),
                    width,
                    height,
                    format: PixelFormat::Gray8,
                });
            }
            Ok(rgb_frame(
                frame,
                expand_gray(&frame.data[..expected]),
                width,
                height,
            ))
        }
    }
}

fn rgb_frame(source: &Frame, pixels: Vec<u8>, width: u32, height: u32) -> Frame {
    Frame {
        data: pixels.into(),
        meta: Arc::new(FrameMetadata {
            sequence: source.meta.sequence,
            width,
            height,
            stride: width * 3,
            format: PixelFormat::Rgb24,
            device_timestamp: source.meta.device_timestamp,
        }),
        timestamp: source.timestamp,
        captured_at: source.captured_at,
    }
}

fn expand_gray(pixels: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(pixels.len() * 3);
    for &luma in pixels {
        rgb.push(luma);
        rgb.push(luma);
        rgb.push(luma);
    }
    rgb
}

// BT.601 integer conversion; YUYV packs two pixels per four bytes.
fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        push_yuv_pixel(&mut rgb, y0, u, v);
        push_yuv_pixel(&mut rgb, y1, u, v);
    }
    rgb
}

fn push_yuv_pixel(rgb: &mut Vec<u8>, y: u8, u: u8, v: u8) {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    rgb.push(clamp_u8((298 * c + 409 * e + 128) >> 8));
    rgb.push(clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8));
    rgb.push(clamp_u8((298 * c + 516 * d + 128) >> 8));
}

fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}
