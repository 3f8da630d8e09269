//! Photo Pipeline - Camera Stream to Badge Photo
//!
//! Camera hardware is a single scarce resource: at most one live stream per
//! session, and capturing always hands the stream back to the device.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::{ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{StreamConfig, WorkflowConfig};
use crate::hashing::sha256_hex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    /// Screen-side sensor ("user")
    Front,
    /// Rear sensor ("environment")
    Back,
}

impl Facing {
    pub fn opposite(self) -> Self {
        match self {
            Facing::Front => Facing::Back,
            Facing::Back => Facing::Front,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Camera permission denied")]
    PermissionDenied,

    #[error("No camera device available")]
    NoDevice,

    #[error("Camera did not respond within {0:?}")]
    Timeout(Duration),

    #[error("No active camera stream")]
    NoActiveStream,

    #[error("Frame grab failed: {0}")]
    FrameGrab(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PhotoError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Background removal failed: {0}")]
    ProcessingFailure(String),

    #[error("Photo encoding failed: {0}")]
    Encoding(String),
}

/// Failure reported by the background-removal service
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct RemovalFault(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConstraints {
    pub width: u32,
    pub height: u32,
    pub facing: Facing,
}

/// Exclusive handle to a live stream. Not `Clone`: giving it back to
/// [`Camera::release`] consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct StreamHandle {
    pub id: u64,
    pub facing: Facing,
    pub width: u32,
    pub height: u32,
}

#[async_trait]
pub trait Camera: Send + Sync {
    /// May suspend on a permission prompt.
    async fn request_stream(&self, constraints: StreamConstraints) -> Result<StreamHandle, DeviceError>;

    fn grab_frame(&self, stream: &StreamHandle) -> Result<RgbaImage, DeviceError>;

    /// Stop all tracks of the stream.
    fn release(&self, stream: StreamHandle);
}

/// Opaque image-to-image transform; single request/response.
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    async fn process(&self, image: &RgbaImage) -> Result<RgbaImage, RemovalFault>;
}

/// A camera frame as the operator saw it in the viewfinder
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub pixels: RgbaImage,
    pub facing: Facing,
    pub mirrored: bool,
    pub captured_at: DateTime<Utc>,
}

impl RawFrame {
    /// Front-facing devices preview mirrored but record unmirrored; flip so
    /// the frame matches the viewfinder before anything else touches it.
    pub fn from_device(mut pixels: RgbaImage, facing: Facing) -> Self {
        let mirrored = facing == Facing::Front;
        if mirrored {
            image::imageops::flip_horizontal_in_place(&mut pixels);
        }
        Self {
            pixels,
            facing,
            mirrored,
            captured_at: Utc::now(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedImage {
    pub pixels: RgbaImage,
}

/// Reference to the processed photo, attached to the student record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoAsset {
    pub data_url: String,
    pub sha256: String,
    pub width: u32,
    pub height: u32,
}

impl PhotoAsset {
    pub fn from_image(image: &RgbaImage) -> Result<Self, PhotoError> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| PhotoError::Encoding(e.to_string()))?;

        let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &png);
        Ok(Self {
            data_url: format!("data:image/png;base64,{}", encoded),
            sha256: sha256_hex(&png),
            width: image.width(),
            height: image.height(),
        })
    }
}

/// `processed` is always derived from exactly this `raw_frame`.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedPhoto {
    pub raw_frame: RawFrame,
    pub processed: ProcessedImage,
    pub asset: PhotoAsset,
}

/// Owns the session's camera stream. Created by the engine on first
/// activation and held by the `WorkflowSession`.
pub struct CameraSession {
    camera: Arc<dyn Camera>,
    stream: StreamConfig,
    timeout: Duration,
    facing: Facing,
    active: Option<StreamHandle>,
}

impl CameraSession {
    pub(crate) fn new(camera: Arc<dyn Camera>, config: &WorkflowConfig) -> Self {
        Self {
            camera,
            stream: config.stream,
            timeout: config.camera_timeout(),
            facing: Facing::Front,
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn facing(&self) -> Facing {
        self.facing
    }

    /// Request a live stream. Any existing stream is released first.
    ///
    /// A `DeviceError` ends this attempt; the operator retries or skips.
    pub async fn activate(&mut self, facing: Facing) -> Result<(), DeviceError> {
        self.stop();

        let constraints = StreamConstraints {
            width: self.stream.width,
            height: self.stream.height,
            facing,
        };
        debug!(?facing, "requesting camera stream");

        let handle = match tokio::time::timeout(self.timeout, self.camera.request_stream(constraints)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                warn!(?facing, error = %e, "camera activation failed");
                return Err(e);
            }
            Err(_) => {
                warn!(?facing, timeout = ?self.timeout, "camera activation timed out");
                return Err(DeviceError::Timeout(self.timeout));
            }
        };

        info!(stream_id = handle.id, ?facing, "camera stream active");
        self.facing = facing;
        self.active = Some(handle);
        Ok(())
    }

    /// Release the current stream, then activate the opposite sensor.
    pub async fn switch_facing(&mut self) -> Result<Facing, DeviceError> {
        if self.active.is_none() {
            return Err(DeviceError::NoActiveStream);
        }
        let next = self.facing.opposite();
        self.stop();
        self.activate(next).await?;
        Ok(next)
    }

    /// Grab the current frame and release the stream, even if the grab fails.
    pub fn capture(&mut self) -> Result<RawFrame, DeviceError> {
        let stream = self.active.take().ok_or(DeviceError::NoActiveStream)?;
        let facing = stream.facing;
        let grabbed = self.camera.grab_frame(&stream);
        self.camera.release(stream);

        let frame = RawFrame::from_device(grabbed?, facing);
        debug!(?facing, mirrored = frame.mirrored, "frame captured, stream released");
        Ok(frame)
    }

    /// Returns whether a stream was released.
    pub fn stop(&mut self) -> bool {
        match self.active.take() {
            Some(stream) => {
                debug!(stream_id = stream.id, "releasing camera stream");
                self.camera.release(stream);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for CameraSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraSession")
            .field("facing", &self.facing)
            .field("stream", &self.active.as_ref().map(|s| s.id))
            .finish()
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Background removal with a deadline and output checks
#[derive(Clone)]
pub struct PhotoProcessor {
    remover: Arc<dyn BackgroundRemover>,
    timeout: Duration,
}

impl PhotoProcessor {
    pub fn new(remover: Arc<dyn BackgroundRemover>, timeout: Duration) -> Self {
        Self { remover, timeout }
    }

    /// Consumes the frame. On failure the frame is dropped, never substituted
    /// for the processed image.
    pub async fn remove_background(&self, raw: RawFrame) -> Result<CapturedPhoto, PhotoError> {
        let pixels = match tokio::time::timeout(self.timeout, self.remover.process(&raw.pixels)).await {
            Ok(Ok(pixels)) => pixels,
            Ok(Err(fault)) => return Err(PhotoError::ProcessingFailure(fault.0)),
            Err(_) => {
                return Err(PhotoError::ProcessingFailure(format!(
                    "no response within {:?}",
                    self.timeout
                )))
            }
        };

        if pixels.dimensions() != raw.dimensions() {
            return Err(PhotoError::ProcessingFailure(format!(
                "service returned {}x{} for a {}x{} frame",
                pixels.width(),
                pixels.height(),
                raw.pixels.width(),
                raw.pixels.height(),
            )));
        }

        let asset = PhotoAsset::from_image(&pixels)?;
        Ok(CapturedPhoto {
            raw_frame: raw,
            processed: ProcessedImage { pixels },
            asset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn marked_frame() -> RgbaImage {
        let mut img = RgbaImage::from_pixel(4, 2, Rgba([255, 255, 255, 255]));
        img.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
        img
    }

    #[test]
    fn test_front_frames_are_mirrored() {
        let frame = RawFrame::from_device(marked_frame(), Facing::Front);
        assert!(frame.mirrored);
        assert_eq!(frame.pixels.get_pixel(3, 0), &Rgba([0, 0, 0, 255]));
        assert_eq!(frame.pixels.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_back_frames_untouched() {
        let frame = RawFrame::from_device(marked_frame(), Facing::Back);
        assert!(!frame.mirrored);
        assert_eq!(frame.pixels, marked_frame());
    }

    #[test]
    fn test_photo_asset_is_png_data_url() {
        let asset = PhotoAsset::from_image(&marked_frame()).unwrap();
        assert!(asset.data_url.starts_with("data:image/png;base64,"));
        assert_eq!(asset.sha256.len(), 64);
        assert_eq!((asset.width, asset.height), (4, 2));
    }

    #[test]
    fn test_facing_opposite() {
        assert_eq!(Facing::Front.opposite(), Facing::Back);
        assert_eq!(Facing::Back.opposite(), Facing::Front);
    }
}
