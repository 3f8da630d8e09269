//! BadgeFlow Core - Student Badge Issuance Engine
//!
//! # The Rules (Non-Negotiable)
//! 1. Steps Run In Order: Verify, Photo, Preview, Encode, Complete
//! 2. Incomplete Records Never Leave Verification
//! 3. Raw Frames Never Stand In For Processed Photos
//! 4. Credentials Are Written As A Pair Or Not At All
//! 5. One Operation In Flight; Late Results Never Touch A Moved-On Session
//! 6. Exports Are Pure: Same Record, Same Bytes

pub mod config;
pub mod completeness;
pub mod directory;
pub mod photo;
pub mod encoder;
pub mod export;
pub mod badge;
pub mod hashing;
pub mod session;
pub mod workflow;
pub mod simulated;

pub use config::{WorkflowConfig, ConfigError};
pub use directory::{StudentRecord, StudentDirectory, InMemoryDirectory, Lookup, DirectoryError};
pub use photo::{Facing, CameraSession, CapturedPhoto, RawFrame, PhotoError, DeviceError};
pub use encoder::{CredentialRecord, CredentialEncoder, EncodeError};
pub use export::{to_csv, ExportedFile, ExportSink, DirectorySink, IssuanceLog, ExportError};
pub use badge::BadgePreview;
pub use session::{WorkflowSession, SessionStatus, Step, StepStatus, OperationKind};
pub use workflow::{BadgeWorkflow, Collaborators, WorkflowError, Applied};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
