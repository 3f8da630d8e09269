//! BadgeFlow CLI - operator bridge to the issuance engine
//!
//! Commands: search, issue
//! Outputs JSON to stdout, logs to stderr
//! Returns 1 on load or write failures, 2 when the workflow rejects a step
//! or the query matches no student

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use badgeflow_core::{
    simulated::SimulatedEncoder,
    BadgeWorkflow, Collaborators, DirectorySink, ExportError, ExportSink, Facing, InMemoryDirectory,
    Lookup, WorkflowConfig, WorkflowError, WorkflowSession,
};

#[derive(Parser)]
#[command(name = "badgeflow-cli")]
#[command(about = "BadgeFlow CLI - Student Badge Issuance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Student roster (JSON array); defaults to the built-in sample roster
    #[arg(short, long)]
    roster: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up a student by name or student ID
    Search {
        query: String,
    },

    /// Run a full issuance session with simulated devices
    Issue {
        query: String,

        /// Proceed without a photo
        #[arg(long)]
        skip_photo: bool,

        /// Camera to capture with
        #[arg(long, value_enum, default_value = "front")]
        facing: FacingArg,

        /// Simulate a failure of encoder system A (NFC)
        #[arg(long)]
        fail_system_a: bool,

        /// Simulate a failure of encoder system B (Salto)
        #[arg(long)]
        fail_system_b: bool,

        /// Also write the CSV into the configured export directory
        #[arg(long)]
        write: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FacingArg {
    Front,
    Back,
}

impl From<FacingArg> for Facing {
    fn from(arg: FacingArg) -> Self {
        match arg {
            FacingArg::Front => Facing::Front,
            FacingArg::Back => Facing::Back,
        }
    }
}

struct IssueOptions {
    skip_photo: bool,
    facing: Facing,
    write: bool,
}

/// Why an `issue` run stopped
#[derive(Debug)]
enum IssueStop {
    /// The query matched nobody; not a workflow error
    NotFound(String),
    Workflow(WorkflowError),
}

impl From<WorkflowError> for IssueStop {
    fn from(e: WorkflowError) -> Self {
        IssueStop::Workflow(e)
    }
}

impl IssueStop {
    /// 1 for filesystem failures, 2 for anything the workflow rejected
    fn exit_status(&self) -> u8 {
        match self {
            IssueStop::Workflow(WorkflowError::Export(ExportError::Io(..))) => 1,
            IssueStop::NotFound(_) | IssueStop::Workflow(_) => 2,
        }
    }

    fn to_json(&self, session: &WorkflowSession) -> serde_json::Value {
        match self {
            IssueStop::NotFound(query) => json!({
                "success": false,
                "lookup": Lookup::NotFound,
                "query": query,
            }),
            IssueStop::Workflow(e) => json!({
                "success": false,
                "step": session.current_step(),
                "status": session.status(),
                "error": e.to_string(),
            }),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to initialise logging: {}", e);
    }

    let config = match &cli.config {
        Some(path) => match WorkflowConfig::load_from_file(path) {
            Ok(c) => c,
            Err(e) => {
                println!("{}", json!({ "success": false, "error": e.to_string() }));
                return ExitCode::FAILURE;
            }
        },
        None => WorkflowConfig::default(),
    };

    let directory = match &cli.roster {
        Some(path) => match InMemoryDirectory::load_from_file(path) {
            Ok(d) => d,
            Err(e) => {
                println!("{}", json!({ "success": false, "error": e.to_string() }));
                return ExitCode::FAILURE;
            }
        },
        None => InMemoryDirectory::sample(),
    };
    info!(version = badgeflow_core::ENGINE_VERSION, students = directory.len(), "engine ready");

    let mut collaborators = Collaborators::simulated(Arc::new(directory));

    match cli.command {
        Commands::Search { query } => {
            let engine = BadgeWorkflow::new(collaborators, config);
            let mut session = WorkflowSession::new();
            match engine.search(&mut session, &query).await {
                Ok(lookup) => {
                    let found = matches!(lookup, Lookup::Found(_));
                    println!("{:#}", json!({ "lookup": lookup, "status": session.status() }));
                    if found { ExitCode::SUCCESS } else { ExitCode::from(2) }
                }
                Err(e) => {
                    println!("{}", json!({ "success": false, "error": e.to_string() }));
                    ExitCode::FAILURE
                }
            }
        }

        Commands::Issue { query, skip_photo, facing, fail_system_a, fail_system_b, write } => {
            if fail_system_a {
                collaborators.system_a = Arc::new(SimulatedEncoder::failing("NFC", "card not detected"));
            }
            if fail_system_b {
                collaborators.system_b = Arc::new(SimulatedEncoder::failing("SALTO", "access server refused write"));
            }
            let engine = BadgeWorkflow::new(collaborators, config);
            let mut session = WorkflowSession::new();
            let options = IssueOptions {
                skip_photo,
                facing: facing.into(),
                write,
            };

            match issue(&engine, &mut session, &query, &options).await {
                Ok(output) => {
                    println!("{:#}", output);
                    ExitCode::SUCCESS
                }
                Err(stop) => {
                    match &stop {
                        IssueStop::NotFound(query) => info!(query = %query, "no matching student"),
                        IssueStop::Workflow(e) => {
                            error!(step = ?session.current_step(), error = %e, "issuance stopped")
                        }
                    }
                    println!("{}", stop.to_json(&session));
                    ExitCode::from(stop.exit_status())
                }
            }
        }
    }
}

async fn issue(
    engine: &BadgeWorkflow,
    session: &mut WorkflowSession,
    query: &str,
    options: &IssueOptions,
) -> Result<serde_json::Value, IssueStop> {
    if let Lookup::NotFound = engine.search(session, query).await? {
        return Err(IssueStop::NotFound(query.to_string()));
    }
    engine.advance(session)?;

    if options.skip_photo {
        engine.skip_photo(session)?;
    } else {
        engine.activate_camera(session, options.facing).await?;
        let frame = engine.capture_frame(session)?;
        engine.capture_photo(session, frame).await?;
        engine.advance(session)?;
    }

    let preview = engine.preview(session)?;
    engine.advance(session)?;
    let record = engine.encode(session).await?;
    let file = engine.export_record(session)?;

    let written = if options.write {
        let sink = DirectorySink::new(engine.config().export_dir.clone());
        Some(sink.deliver(&file).map_err(WorkflowError::from)?)
    } else {
        None
    };

    Ok(json!({
        "success": true,
        "step": session.current_step(),
        "preview": {
            "studentId": preview.student_id,
            "name": preview.name,
            "course": preview.course,
            "hasPhoto": preview.has_photo(),
            "validUntilYear": preview.valid_until_year,
        },
        "record": record,
        "export": {
            "filename": file.filename,
            "sha256": file.sha256,
            "path": written,
            "csv": file.content,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_failure_exits_with_io_status() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let stop = IssueStop::from(WorkflowError::from(ExportError::Io(PathBuf::from("exports"), io)));
        assert_eq!(stop.exit_status(), 1);
    }

    #[test]
    fn test_rejected_step_exits_with_workflow_status() {
        assert_eq!(IssueStop::from(WorkflowError::PhotoRequired).exit_status(), 2);
    }

    #[tokio::test]
    async fn test_unknown_student_reported_as_not_found() {
        let engine = BadgeWorkflow::new(
            Collaborators::simulated(Arc::new(InMemoryDirectory::sample())),
            WorkflowConfig::default(),
        );
        let mut session = WorkflowSession::new();
        let options = IssueOptions { skip_photo: true, facing: Facing::Front, write: false };

        let stop = issue(&engine, &mut session, "Nobody Here", &options).await.unwrap_err();
        assert!(matches!(stop, IssueStop::NotFound(ref q) if q == "Nobody Here"));
        assert_eq!(stop.exit_status(), 2);
        let output = stop.to_json(&session);
        assert_eq!(output["lookup"]["outcome"], "not_found");
    }

    #[tokio::test]
    async fn test_issue_with_photo_releases_camera() {
        let engine = BadgeWorkflow::new(
            Collaborators::simulated(Arc::new(InMemoryDirectory::sample())),
            WorkflowConfig::default(),
        );
        let mut session = WorkflowSession::new();
        let options = IssueOptions { skip_photo: false, facing: Facing::Back, write: false };

        let output = issue(&engine, &mut session, "Jane", &options).await.unwrap();
        assert_eq!(output["preview"]["hasPhoto"], true);
        assert_eq!(output["export"]["filename"], "student_serials_CS22-1234.csv");
        assert!(!session.camera_active());
    }
}
