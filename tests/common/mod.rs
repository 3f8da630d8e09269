//! Shared fakes and session drivers for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use image::RgbaImage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use badgeflow_core::{
    directory::{DirectoryError, Lookup, StudentDirectory},
    encoder::{EncoderSystem, WriteFault},
    photo::{BackgroundRemover, RemovalFault},
    simulated::{portrait, SimulatedBackgroundRemover},
    BadgeWorkflow, Collaborators, Facing, InMemoryDirectory, RawFrame, Step, WorkflowConfig,
    WorkflowSession,
};

pub fn collaborators() -> Collaborators {
    Collaborators::simulated(Arc::new(InMemoryDirectory::sample()))
}

pub fn engine() -> BadgeWorkflow {
    BadgeWorkflow::new(collaborators(), WorkflowConfig::default())
}

pub fn front_frame() -> RawFrame {
    RawFrame::from_device(portrait(64, 48), Facing::Front)
}

/// Drive a fresh Jane Smith session forward until `target` is the current step.
pub async fn drive_to(engine: &BadgeWorkflow, session: &mut WorkflowSession, target: Step) {
    engine.search(session, "Jane").await.unwrap();
    if target == Step::Verify {
        return;
    }
    engine.advance(session).unwrap();
    if target == Step::Photo {
        return;
    }
    engine.capture_photo(session, front_frame()).await.unwrap();
    engine.advance(session).unwrap();
    if target == Step::Preview {
        return;
    }
    engine.advance(session).unwrap();
    if target == Step::Encode {
        return;
    }
    engine.encode(session).await.unwrap();
    assert_eq!(session.current_step(), Step::Complete);
}

/// Encoder that replays a script of outcomes, then succeeds forever.
pub struct ScriptedEncoder {
    id: String,
    script: Mutex<VecDeque<Result<String, String>>>,
    calls: AtomicUsize,
}

impl ScriptedEncoder {
    pub fn new(id: &str, script: Vec<Result<&str, &str>>) -> Self {
        Self {
            id: id.to_string(),
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EncoderSystem for ScriptedEncoder {
    fn system_id(&self) -> &str {
        &self.id
    }

    async fn write(&self, _student_id: &str) -> Result<String, WriteFault> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(serial)) => Ok(serial),
            Some(Err(reason)) => Err(WriteFault(reason)),
            None => Ok(format!("{}-{}", self.id, n)),
        }
    }
}

/// Encoder that blocks until the test hands out a permit.
pub struct GatedEncoder {
    id: String,
    gate: Arc<Semaphore>,
}

impl GatedEncoder {
    pub fn new(id: &str, gate: Arc<Semaphore>) -> Self {
        Self { id: id.to_string(), gate }
    }
}

#[async_trait]
impl EncoderSystem for GatedEncoder {
    fn system_id(&self) -> &str {
        &self.id
    }

    async fn write(&self, _student_id: &str) -> Result<String, WriteFault> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| WriteFault("gate closed".into()))?;
        Ok(format!("{}-GATED", self.id))
    }
}

/// Background remover that fails the first `failures` calls.
pub struct FlakyRemover {
    failures: AtomicUsize,
    inner: SimulatedBackgroundRemover,
}

impl FlakyRemover {
    pub fn new(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            inner: SimulatedBackgroundRemover::new(),
        }
    }
}

#[async_trait]
impl BackgroundRemover for FlakyRemover {
    async fn process(&self, image: &RgbaImage) -> Result<RgbaImage, RemovalFault> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RemovalFault("segmentation model unavailable".into()));
        }
        self.inner.process(image).await
    }
}

/// Background remover that returns a cropped image.
pub struct CroppingRemover;

#[async_trait]
impl BackgroundRemover for CroppingRemover {
    async fn process(&self, image: &RgbaImage) -> Result<RgbaImage, RemovalFault> {
        Ok(image::imageops::crop_imm(image, 0, 0, image.width() / 2, image.height()).to_image())
    }
}

/// Directory that answers only after `delay`.
pub struct SlowDirectory {
    delay: Duration,
    inner: InMemoryDirectory,
}

impl SlowDirectory {
    pub fn new(delay: Duration) -> Self {
        Self { delay, inner: InMemoryDirectory::sample() }
    }
}

#[async_trait]
impl StudentDirectory for SlowDirectory {
    async fn search(&self, query: &str) -> Result<Lookup, DirectoryError> {
        tokio::time::sleep(self.delay).await;
        self.inner.search(query).await
    }
}

/// Background remover that answers only after `delay`.
pub struct SlowRemover {
    delay: Duration,
    inner: SimulatedBackgroundRemover,
}

impl SlowRemover {
    pub fn new(delay: Duration) -> Self {
        Self { delay, inner: SimulatedBackgroundRemover::new() }
    }
}

#[async_trait]
impl BackgroundRemover for SlowRemover {
    async fn process(&self, image: &RgbaImage) -> Result<RgbaImage, RemovalFault> {
        tokio::time::sleep(self.delay).await;
        self.inner.process(image).await
    }
}
