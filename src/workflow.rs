//! Workflow Engine - Single Entry Point for Badge Issuance
//!
//! CRITICAL: every forward move goes through a guard. A rejected transition
//! leaves the session exactly where it was.
//!
//! Suspending operations (search, capture processing, encode) are split into
//! `begin_*` (guards + ticket), `run` (external call, no session access) and
//! `apply_*` (ticket check + state update). The `async fn` wrappers chain the
//! three for callers that own the session for the whole call.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::badge::BadgePreview;
use crate::config::WorkflowConfig;
use crate::directory::{DirectoryError, Lookup, StudentDirectory, StudentRecord};
use crate::encoder::{CredentialEncoder, CredentialRecord, EncodeError, EncoderSystem};
use crate::export::{ExportError, ExportedFile};
use crate::photo::{
    BackgroundRemover, Camera, CameraSession, CapturedPhoto, DeviceError, Facing, PhotoError, PhotoProcessor, RawFrame,
};
use crate::session::{OperationKind, Step, Ticket, WorkflowSession};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{operation} is not available in step {step:?}")]
    InvalidStep { operation: &'static str, step: Step },

    #[error("No student selected")]
    NoStudent,

    #[error("Student {student_id} is missing information: {}", .missing.join(", "))]
    IncompleteRecord { student_id: String, missing: Vec<String> },

    #[error("A photo is required; capture one or skip the photo step")]
    PhotoRequired,

    #[error("Credentials have not been encoded")]
    NotEncoded,

    #[error("Already at the first step")]
    AtFirstStep,

    #[error("A {0:?} operation is still processing")]
    Busy(OperationKind),

    #[error("Operation was superseded by a reset or navigation")]
    Superseded,

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Photo(#[from] PhotoError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

/// Result of handing a completion back to the session
#[derive(Debug)]
pub enum Applied<T> {
    Applied(T),
    /// The session moved on; nothing was changed.
    Discarded,
}

impl<T> Applied<Result<T, WorkflowError>> {
    fn settled(self) -> Result<T, WorkflowError> {
        match self {
            Applied::Applied(result) => result,
            Applied::Discarded => Err(WorkflowError::Superseded),
        }
    }
}

/// Output of a suspended operation, tagged with the ticket that started it
#[derive(Debug)]
pub struct Completion<T> {
    ticket: Ticket,
    result: T,
}

impl<T> Completion<T> {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }
}

#[derive(Debug)]
pub struct SearchRequest {
    ticket: Ticket,
    query: String,
}

impl SearchRequest {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub async fn run(self, engine: &BadgeWorkflow) -> Completion<Result<Lookup, DirectoryError>> {
        let timeout = engine.config.directory_timeout();
        let result = match tokio::time::timeout(timeout, engine.directory.search(&self.query)).await {
            Ok(result) => result,
            Err(_) => Err(DirectoryError::Timeout(timeout)),
        };
        Completion { ticket: self.ticket, result }
    }
}

pub struct CaptureRequest {
    ticket: Ticket,
    frame: RawFrame,
}

impl CaptureRequest {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub async fn run(self, engine: &BadgeWorkflow) -> Completion<Result<CapturedPhoto, PhotoError>> {
        let result = engine.processor.remove_background(self.frame).await;
        Completion { ticket: self.ticket, result }
    }
}

pub struct EncodeRequest {
    ticket: Ticket,
    student: StudentRecord,
}

impl EncodeRequest {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub async fn run(self, engine: &BadgeWorkflow) -> Completion<Result<CredentialRecord, EncodeError>> {
        let result = engine.encoder.encode(&self.student).await;
        Completion { ticket: self.ticket, result }
    }
}

/// External systems the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn StudentDirectory>,
    pub camera: Arc<dyn Camera>,
    pub background_remover: Arc<dyn BackgroundRemover>,
    pub system_a: Arc<dyn EncoderSystem>,
    pub system_b: Arc<dyn EncoderSystem>,
}

/// The workflow engine. Holds no per-session state; sessions are passed in.
#[derive(Clone)]
pub struct BadgeWorkflow {
    directory: Arc<dyn StudentDirectory>,
    camera: Arc<dyn Camera>,
    processor: PhotoProcessor,
    encoder: CredentialEncoder,
    config: WorkflowConfig,
}

impl BadgeWorkflow {
    pub fn new(collaborators: Collaborators, config: WorkflowConfig) -> Self {
        let processor = PhotoProcessor::new(collaborators.background_remover, config.background_removal_timeout());
        let encoder = CredentialEncoder::new(collaborators.system_a, collaborators.system_b, config.encoder_timeout());
        Self {
            directory: collaborators.directory,
            camera: collaborators.camera,
            processor,
            encoder,
            config,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }


    // --- Verify ---

    pub fn begin_search(&self, session: &mut WorkflowSession, query: &str) -> Result<SearchRequest, WorkflowError> {
        require_step(session, Step::Verify, "search")?;
        let ticket = session.begin(OperationKind::Search)?;
        debug!(session = %session.id(), query, "search started");
        Ok(SearchRequest {
            ticket,
            query: query.to_string(),
        })
    }

    pub fn apply_search(
        &self,
        session: &mut WorkflowSession,
        completion: Completion<Result<Lookup, DirectoryError>>,
    ) -> Applied<Result<Lookup, WorkflowError>> {
        if !session.settle(completion.ticket) {
            debug!(session = %session.id(), "stale search result discarded");
            return Applied::Discarded;
        }

        let lookup = match completion.result {
            Ok(lookup) => lookup,
            Err(e) => {
                warn!(session = %session.id(), error = %e, "directory lookup failed");
                return Applied::Applied(Err(e.into()));
            }
        };

        if let Lookup::Found(found) = &lookup {
            let state = session.state_mut();
            let mut student = found.clone();
            let same_student = state
                .student
                .as_ref()
                .map_or(false, |current| current.student_id == student.student_id);
            if same_student {
                student.photo_asset = state.student.as_ref().and_then(|s| s.photo_asset.clone());
            } else {
                state.photo = None;
                state.credentials = None;
            }

            if student.is_complete {
                info!(student_id = %student.student_id, "student found");
            } else {
                warn!(
                    student_id = %student.student_id,
                    missing = ?student.missing_fields,
                    "student found with missing information"
                );
            }
            state.student = Some(student);
        } else {
            info!(session = %session.id(), "no matching student");
        }

        Applied::Applied(Ok(lookup))
    }

    /// Case-insensitive lookup by name or student ID. A miss is
    /// `Lookup::NotFound`, not an error, and leaves the session unchanged.
    pub async fn search(&self, session: &mut WorkflowSession, query: &str) -> Result<Lookup, WorkflowError> {
        let request = self.begin_search(session, query)?;
        let completion = request.run(self).await;
        self.apply_search(session, completion).settled()
    }

    // --- Photo ---

    /// Starts background removal for `frame`. Any earlier photo is discarded.
    pub fn begin_capture(&self, session: &mut WorkflowSession, frame: RawFrame) -> Result<CaptureRequest, WorkflowError> {
        require_step(session, Step::Photo, "capture")?;
        let ticket = session.begin(OperationKind::Capture)?;
        clear_photo(session);
        debug!(session = %session.id(), facing = ?frame.facing, "background removal started");
        Ok(CaptureRequest { ticket, frame })
    }

    pub fn apply_capture(
        &self,
        session: &mut WorkflowSession,
        completion: Completion<Result<CapturedPhoto, PhotoError>>,
    ) -> Applied<Result<CapturedPhoto, WorkflowError>> {
        if !session.settle(completion.ticket) {
            debug!(session = %session.id(), "stale photo discarded");
            return Applied::Discarded;
        }

        match completion.result {
            Ok(photo) => {
                let state = session.state_mut();
                if let Some(student) = state.student.as_mut() {
                    student.photo_asset = Some(photo.asset.clone());
                }
                state.photo = Some(photo.clone());
                info!(session = %session.id(), sha256 = %photo.asset.sha256, "photo captured");
                Applied::Applied(Ok(photo))
            }
            Err(e) => {
                warn!(session = %session.id(), error = %e, "photo processing failed, frame discarded");
                Applied::Applied(Err(e.into()))
            }
        }
    }

    /// Background removal of a captured frame. Failure keeps the session in
    /// Photo with no photo, ready for another attempt.
    pub async fn capture_photo(&self, session: &mut WorkflowSession, frame: RawFrame) -> Result<CapturedPhoto, WorkflowError> {
        let request = self.begin_capture(session, frame)?;
        let completion = request.run(self).await;
        self.apply_capture(session, completion).settled()
    }

    /// Open the session's camera stream. An existing stream is released
    /// first, so the session never holds two.
    pub async fn activate_camera(&self, session: &mut WorkflowSession, facing: Facing) -> Result<(), WorkflowError> {
        require_step(session, Step::Photo, "activate camera")?;
        session.ensure_idle()?;
        let camera = session.camera_or_open(|| CameraSession::new(self.camera.clone(), &self.config));
        camera.activate(facing).await.map_err(PhotoError::from)?;
        Ok(())
    }

    pub async fn switch_camera(&self, session: &mut WorkflowSession) -> Result<Facing, WorkflowError> {
        require_step(session, Step::Photo, "switch camera")?;
        session.ensure_idle()?;
        let camera = session.camera_mut().ok_or(PhotoError::Device(DeviceError::NoActiveStream))?;
        Ok(camera.switch_facing().await.map_err(PhotoError::from)?)
    }

    /// Grab a frame from the live stream; the stream is released either way.
    pub fn capture_frame(&self, session: &mut WorkflowSession) -> Result<RawFrame, WorkflowError> {
        require_step(session, Step::Photo, "capture frame")?;
        session.ensure_idle()?;
        let camera = session.camera_mut().ok_or(PhotoError::Device(DeviceError::NoActiveStream))?;
        Ok(camera.capture().map_err(PhotoError::from)?)
    }

    /// Discard the captured photo and return to an un-captured Photo step.
    pub fn retake_photo(&self, session: &mut WorkflowSession) -> Result<(), WorkflowError> {
        require_step(session, Step::Photo, "retake")?;
        session.ensure_idle()?;
        clear_photo(session);
        debug!(session = %session.id(), "photo discarded for retake");
        Ok(())
    }

    /// Bypass capture and move to Preview with no photo.
    pub fn skip_photo(&self, session: &mut WorkflowSession) -> Result<Step, WorkflowError> {
        require_step(session, Step::Photo, "skip photo")?;
        session.ensure_idle()?;
        clear_photo(session);
        info!(session = %session.id(), "photo skipped");
        Ok(move_to(session, Step::Preview))
    }

    // --- Preview ---

    pub fn preview(&self, session: &WorkflowSession) -> Result<BadgePreview, WorkflowError> {
        if session.current_step() < Step::Preview {
            return Err(WorkflowError::InvalidStep {
                operation: "preview",
                step: session.current_step(),
            });
        }
        let student = session.student().ok_or(WorkflowError::NoStudent)?;
        Ok(BadgePreview::build(
            student,
            session.photo(),
            Utc::now().date_naive(),
            self.config.badge_validity_years,
        ))
    }

    // --- Encode ---

    /// Starts writing both credentials. Earlier credentials are dropped now so
    /// a failed attempt can never leave a stale pair behind.
    pub fn begin_encode(&self, session: &mut WorkflowSession) -> Result<EncodeRequest, WorkflowError> {
        require_step(session, Step::Encode, "encode")?;
        session.ensure_idle()?;
        let student = session.student().cloned().ok_or(WorkflowError::NoStudent)?;
        let ticket = session.begin(OperationKind::Encode)?;
        session.state_mut().credentials = None;
        debug!(session = %session.id(), student_id = %student.student_id, "encoding started");
        Ok(EncodeRequest { ticket, student })
    }

    pub fn apply_encode(
        &self,
        session: &mut WorkflowSession,
        completion: Completion<Result<CredentialRecord, EncodeError>>,
    ) -> Applied<Result<CredentialRecord, WorkflowError>> {
        if !session.settle(completion.ticket) {
            // The physical write already happened; only the session ignores it.
            warn!(session = %session.id(), "stale encode result discarded");
            return Applied::Discarded;
        }

        match completion.result {
            Ok(record) => {
                session.state_mut().credentials = Some(record.clone());
                move_to(session, Step::Complete);
                Applied::Applied(Ok(record))
            }
            Err(e) => {
                session.state_mut().credentials = None;
                Applied::Applied(Err(e.into()))
            }
        }
    }

    /// Write both credentials. Success moves the session to Complete; any
    /// failure leaves it in Encode with no credentials.
    pub async fn encode(&self, session: &mut WorkflowSession) -> Result<CredentialRecord, WorkflowError> {
        let request = self.begin_encode(session)?;
        let completion = request.run(self).await;
        self.apply_encode(session, completion).settled()
    }

    // --- Complete ---

    /// Regenerates the same file from the stored record; never re-encodes.
    pub fn export_record(&self, session: &WorkflowSession) -> Result<ExportedFile, WorkflowError> {
        require_step(session, Step::Complete, "export")?;
        let record = session.credentials().ok_or(WorkflowError::NotEncoded)?;
        Ok(ExportedFile::for_record(record)?)
    }

    // --- Navigation ---

    /// Move one step forward if the current step's guard allows it.
    pub fn advance(&self, session: &mut WorkflowSession) -> Result<Step, WorkflowError> {
        session.ensure_idle()?;
        let step = session.current_step();
        let rejected = |e: WorkflowError| {
            warn!(?step, error = %e, "transition rejected");
            e
        };

        let next = match step {
            Step::Verify => {
                let student = session.student().ok_or(WorkflowError::NoStudent).map_err(rejected)?;
                if !student.is_complete {
                    return Err(rejected(WorkflowError::IncompleteRecord {
                        student_id: student.student_id.clone(),
                        missing: student.missing_fields.clone(),
                    }));
                }
                Step::Photo
            }
            Step::Photo => {
                if session.photo().is_none() {
                    return Err(rejected(WorkflowError::PhotoRequired));
                }
                Step::Preview
            }
            Step::Preview => {
                info!(session = %session.id(), "badge sent to printer");
                Step::Encode
            }
            Step::Encode => {
                if session.credentials().is_none() {
                    return Err(rejected(WorkflowError::NotEncoded));
                }
                Step::Complete
            }
            Step::Complete => {
                return Err(rejected(WorkflowError::InvalidStep { operation: "advance", step }));
            }
        };

        Ok(move_to(session, next))
    }

    /// Move to the previous step, keeping student and photo. Cancels interest
    /// in any pending operation.
    pub fn back(&self, session: &mut WorkflowSession) -> Result<Step, WorkflowError> {
        let previous = session.current_step().previous().ok_or(WorkflowError::AtFirstStep)?;
        if let Some(kind) = session.cancel_pending() {
            info!(session = %session.id(), operation = ?kind, "pending operation abandoned");
        }
        // Credentials may only live in Encode or Complete
        if previous < Step::Encode {
            session.state_mut().credentials = None;
        }
        Ok(move_to(session, previous))
    }

    /// Return to Verify with everything cleared. Does not touch external
    /// systems; credentials already written stay written.
    pub fn reset(&self, session: &mut WorkflowSession) {
        session.reset();
        info!(session = %session.id(), "session reset");
    }
}

fn require_step(session: &WorkflowSession, step: Step, operation: &'static str) -> Result<(), WorkflowError> {
    if session.current_step() == step {
        Ok(())
    } else {
        Err(WorkflowError::InvalidStep {
            operation,
            step: session.current_step(),
        })
    }
}

fn clear_photo(session: &mut WorkflowSession) {
    let state = session.state_mut();
    state.photo = None;
    if let Some(student) = state.student.as_mut() {
        student.photo_asset = None;
    }
}

fn move_to(session: &mut WorkflowSession, next: Step) -> Step {
    let from = session.current_step();
    if from == Step::Photo && next != Step::Photo && session.stop_camera() {
        debug!(session = %session.id(), "camera released on leaving photo step");
    }
    session.state_mut().step = next;
    info!(session = %session.id(), ?from, to = ?next, "step transition");
    next
}
