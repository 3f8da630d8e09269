//! Workflow Session - the single owned value threaded through every step
//!
//! Invariants:
//! - `credentials` is set only with a student and only in Encode or Complete.
//! - at most one suspending operation is pending; its ticket is the only one
//!   whose completion may be applied.
//! - at most one camera stream is open, and only while in Photo.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::directory::StudentRecord;
use crate::encoder::CredentialRecord;
use crate::photo::{CameraSession, CapturedPhoto, Facing};
use crate::workflow::WorkflowError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    #[default]
    Verify,
    Photo,
    Preview,
    Encode,
    Complete,
}

impl Step {
    pub const ALL: [Step; 5] = [Step::Verify, Step::Photo, Step::Preview, Step::Encode, Step::Complete];

    pub fn next(self) -> Option<Step> {
        match self {
            Step::Verify => Some(Step::Photo),
            Step::Photo => Some(Step::Preview),
            Step::Preview => Some(Step::Encode),
            Step::Encode => Some(Step::Complete),
            Step::Complete => None,
        }
    }

    pub fn previous(self) -> Option<Step> {
        match self {
            Step::Verify => None,
            Step::Photo => Some(Step::Verify),
            Step::Preview => Some(Step::Photo),
            Step::Encode => Some(Step::Preview),
            Step::Complete => Some(Step::Encode),
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Step::Verify => "Student Verification",
            Step::Photo => "Photo Capture",
            Step::Preview => "Badge Preview & Printing",
            Step::Encode => "NFC Encoding",
            Step::Complete => "Process Complete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Active,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Search,
    Capture,
    Encode,
}

/// Identifies one suspending operation within one session epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    epoch: u64,
    seq: u64,
    kind: OperationKind,
}

impl Ticket {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    Ready,
    Processing { operation: OperationKind },
    /// Persistent warning: the selected student cannot leave verification.
    MissingInformation { missing: Vec<String> },
}

/// Workflow data proper. Two sessions in the same state compare equal
/// regardless of their ids or ticket history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub step: Step,
    pub student: Option<StudentRecord>,
    pub photo: Option<CapturedPhoto>,
    pub credentials: Option<CredentialRecord>,
}

#[derive(Debug)]
pub struct WorkflowSession {
    id: Uuid,
    state: SessionState,
    epoch: u64,
    next_seq: u64,
    pending: Option<Ticket>,
    camera: Option<CameraSession>,
}

impl WorkflowSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::default(),
            epoch: 0,
            next_seq: 0,
            pending: None,
            camera: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn current_step(&self) -> Step {
        self.state.step
    }

    pub fn student(&self) -> Option<&StudentRecord> {
        self.state.student.as_ref()
    }

    pub fn photo(&self) -> Option<&CapturedPhoto> {
        self.state.photo.as_ref()
    }

    pub fn credentials(&self) -> Option<&CredentialRecord> {
        self.state.credentials.as_ref()
    }

    pub fn pending(&self) -> Option<OperationKind> {
        self.pending.map(|t| t.kind)
    }

    pub fn is_processing(&self) -> bool {
        self.pending.is_some()
    }

    pub fn camera_active(&self) -> bool {
        self.camera.as_ref().map_or(false, CameraSession::is_active)
    }

    /// Facing of the live stream, if any
    pub fn camera_facing(&self) -> Option<Facing> {
        self.camera.as_ref().filter(|c| c.is_active()).map(CameraSession::facing)
    }

    pub fn status(&self) -> SessionStatus {
        if let Some(ticket) = self.pending {
            return SessionStatus::Processing { operation: ticket.kind };
        }
        match (&self.state.student, self.state.step) {
            (Some(student), Step::Verify) if !student.is_complete => SessionStatus::MissingInformation {
                missing: student.missing_fields.clone(),
            },
            _ => SessionStatus::Ready,
        }
    }

    /// Per-step status for a progress indicator
    pub fn progress(&self) -> Vec<(Step, StepStatus)> {
        Step::ALL
            .iter()
            .map(|&step| {
                let status = if step == self.state.step {
                    StepStatus::Active
                } else if step < self.state.step {
                    StepStatus::Completed
                } else {
                    StepStatus::Pending
                };
                (step, status)
            })
            .collect()
    }

    /// True when the documented invariants hold.
    pub fn is_consistent(&self) -> bool {
        let credentials_ok = self.state.credentials.is_none()
            || (self.state.student.is_some()
                && matches!(self.state.step, Step::Encode | Step::Complete));
        let photo_ok = self.state.photo.is_none() || self.state.student.is_some();
        credentials_ok && photo_ok
    }

    pub(crate) fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    pub(crate) fn ensure_idle(&self) -> Result<(), WorkflowError> {
        match self.pending {
            Some(ticket) => Err(WorkflowError::Busy(ticket.kind)),
            None => Ok(()),
        }
    }

    /// Mark an operation as in flight.
    pub(crate) fn begin(&mut self, kind: OperationKind) -> Result<Ticket, WorkflowError> {
        self.ensure_idle()?;
        let ticket = Ticket {
            epoch: self.epoch,
            seq: self.next_seq,
            kind,
        };
        self.next_seq += 1;
        self.pending = Some(ticket);
        Ok(ticket)
    }

    /// Consume the pending slot if `ticket` still owns it.
    pub(crate) fn settle(&mut self, ticket: Ticket) -> bool {
        if self.pending == Some(ticket) && ticket.epoch == self.epoch {
            self.pending = None;
            true
        } else {
            false
        }
    }

    /// Drop interest in the pending operation; its completion will be discarded.
    pub(crate) fn cancel_pending(&mut self) -> Option<OperationKind> {
        self.pending.take().map(|t| t.kind)
    }

    pub(crate) fn camera_or_open(&mut self, open: impl FnOnce() -> CameraSession) -> &mut CameraSession {
        self.camera.get_or_insert_with(open)
    }

    pub(crate) fn camera_mut(&mut self) -> Option<&mut CameraSession> {
        self.camera.as_mut()
    }

    /// Release the live stream, if any. Returns whether one was released.
    pub(crate) fn stop_camera(&mut self) -> bool {
        self.camera.as_mut().map_or(false, CameraSession::stop)
    }

    pub(crate) fn reset(&mut self) {
        self.stop_camera();
        self.state = SessionState::default();
        self.pending = None;
        self.epoch += 1;
    }
}

impl Default for WorkflowSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_order_is_linear() {
        let mut step = Step::Verify;
        let mut visited = vec![step];
        while let Some(next) = step.next() {
            assert_eq!(next.previous(), Some(step));
            visited.push(next);
            step = next;
        }
        assert_eq!(visited, Step::ALL.to_vec());
        assert_eq!(Step::Verify.previous(), None);
    }

    #[test]
    fn test_progress_marks_active_step() {
        let mut session = WorkflowSession::new();
        session.state_mut().step = Step::Preview;
        let progress = session.progress();
        assert_eq!(progress[0], (Step::Verify, StepStatus::Completed));
        assert_eq!(progress[2], (Step::Preview, StepStatus::Active));
        assert_eq!(progress[4], (Step::Complete, StepStatus::Pending));
    }

    #[test]
    fn test_single_pending_operation() {
        let mut session = WorkflowSession::new();
        let ticket = session.begin(OperationKind::Encode).unwrap();
        assert!(matches!(
            session.begin(OperationKind::Capture),
            Err(WorkflowError::Busy(OperationKind::Encode))
        ));
        assert_eq!(session.status(), SessionStatus::Processing { operation: OperationKind::Encode });

        assert!(session.settle(ticket));
        assert!(!session.settle(ticket));
        assert_eq!(session.status(), SessionStatus::Ready);
    }

    #[test]
    fn test_reset_invalidates_outstanding_ticket() {
        let mut session = WorkflowSession::new();
        let stale = session.begin(OperationKind::Search).unwrap();
        session.reset();
        assert!(!session.is_processing());

        let fresh = session.begin(OperationKind::Search).unwrap();
        assert_ne!(stale, fresh);
        assert!(!session.settle(stale));
        assert!(session.settle(fresh));
    }
}
