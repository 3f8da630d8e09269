//! Simulated Devices
//!
//! Stand-ins for the camera, background-removal service and encoder systems.
//! They behave like the real boundaries (latency, failures, scarce streams)
//! without any hardware.

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::directory::StudentDirectory;
use crate::encoder::{EncoderSystem, WriteFault};
use crate::photo::{BackgroundRemover, Camera, DeviceError, RemovalFault, StreamConstraints, StreamHandle};
use crate::workflow::Collaborators;

const BACKDROP: Rgba<u8> = Rgba([250, 250, 250, 255]);
const SUBJECT: Rgba<u8> = Rgba([196, 148, 120, 255]);

/// A camera that renders a plain portrait: light backdrop, subject left of centre.
#[derive(Default)]
pub struct SimulatedCamera {
    deny_permission: bool,
    latency: Duration,
    next_id: AtomicU64,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl SimulatedCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stream request fails as if the operator denied access.
    pub fn denying() -> Self {
        Self {
            deny_permission: true,
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open streams seen so far
    pub fn peak_streams(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Camera for SimulatedCamera {
    async fn request_stream(&self, constraints: StreamConstraints) -> Result<StreamHandle, DeviceError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.deny_permission {
            return Err(DeviceError::PermissionDenied);
        }

        let open = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(open, Ordering::SeqCst);
        Ok(StreamHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            facing: constraints.facing,
            width: constraints.width,
            height: constraints.height,
        })
    }

    fn grab_frame(&self, stream: &StreamHandle) -> Result<RgbaImage, DeviceError> {
        if stream.width == 0 || stream.height == 0 {
            return Err(DeviceError::FrameGrab("zero-sized stream".into()));
        }
        Ok(portrait(stream.width, stream.height))
    }

    fn release(&self, stream: StreamHandle) {
        debug!(stream_id = stream.id, "simulated stream stopped");
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Synthetic frame: the subject occupies columns [w/8, w/2).
pub fn portrait(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let in_subject = x >= width / 8 && x < width / 2 && y >= height / 4;
        if in_subject { SUBJECT } else { BACKDROP }
    })
}

/// Keys out near-white pixels by making them transparent.
pub struct SimulatedBackgroundRemover {
    threshold: u8,
    fail_with: Option<String>,
}

impl SimulatedBackgroundRemover {
    pub fn new() -> Self {
        Self {
            threshold: 240,
            fail_with: None,
        }
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            threshold: 240,
            fail_with: Some(reason.into()),
        }
    }
}

impl Default for SimulatedBackgroundRemover {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackgroundRemover for SimulatedBackgroundRemover {
    async fn process(&self, image: &RgbaImage) -> Result<RgbaImage, RemovalFault> {
        if let Some(reason) = &self.fail_with {
            return Err(RemovalFault(reason.clone()));
        }

        let mut out = image.clone();
        for pixel in out.pixels_mut() {
            let Rgba([r, g, b, _]) = *pixel;
            if r >= self.threshold && g >= self.threshold && b >= self.threshold {
                *pixel = Rgba([255, 255, 255, 0]);
            }
        }
        Ok(out)
    }
}

/// Issues `<PREFIX>-<7 digits>` serials, unique per instance.
pub struct SimulatedEncoder {
    prefix: String,
    counter: AtomicU64,
    fail_with: Option<String>,
}

impl SimulatedEncoder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(1),
            fail_with: None,
        }
    }

    pub fn failing(prefix: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            fail_with: Some(reason.into()),
            ..Self::new(prefix)
        }
    }

    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::SeqCst) - 1
    }
}

#[async_trait]
impl EncoderSystem for SimulatedEncoder {
    fn system_id(&self) -> &str {
        &self.prefix
    }

    async fn write(&self, student_id: &str) -> Result<String, WriteFault> {
        if let Some(reason) = &self.fail_with {
            return Err(WriteFault(reason.clone()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        debug!(system = %self.prefix, student_id, serial = n, "simulated write");
        Ok(format!("{}-{:07}", self.prefix, n))
    }
}

impl Collaborators {
    /// Real directory, simulated devices: NFC reader as system A, Salto as B.
    pub fn simulated(directory: Arc<dyn StudentDirectory>) -> Self {
        Self {
            directory,
            camera: Arc::new(SimulatedCamera::new()),
            background_remover: Arc::new(SimulatedBackgroundRemover::new()),
            system_a: Arc::new(SimulatedEncoder::new("NFC")),
            system_b: Arc::new(SimulatedEncoder::new("SALTO")),
        }
    }
}
