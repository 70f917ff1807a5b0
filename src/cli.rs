//! CLI interface for gamewright.
//!
//! Each subcommand is non-interactive: arguments in, structured output out.
//! Specifications, preview handles and export jobs are printed as JSON on
//! stdout; progress and summaries go to stderr.

mod format;

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::model::{
    CompressionLevel, ControlScheme, EditOperation, ExportFormat, ExportOptions, ExportStatus,
    MobileProfile, Orientation, TargetDevice, WorkspaceId,
};
use crate::service::{EditRequest, ExportRequest, GameService, PreviewRequest, ServiceError};
use crate::templates::Template;

use format::{format_history_entry, format_job, format_session, format_summary};

/// Gamewright: build games by editing a live specification.
#[derive(Debug, Parser)]
#[command(name = "gamewright", after_long_help = WORKFLOW_HELP)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

const WORKFLOW_HELP: &str = r#"Workflow: from template to export
  1. gamewright init jumper --describe "coin collecting platformer" --name "Coin Jumper"
  2. gamewright apply jumper --file edits.json
     edits.json: [{ "op": "addObject", "scene": "Level1", "object": "Enemy", "kind": "Sprite" }]
  3. gamewright preview jumper --device phone --controls virtual-dpad
  4. gamewright export jumper --compression maximum"#;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a session for a workspace from a template.
    Init {
        workspace: WorkspaceId,

        /// Starting template. Defaults to blank.
        #[arg(long, value_enum, conflicts_with = "describe")]
        template: Option<TemplateArg>,

        /// Pick the template from a short description of the game.
        #[arg(long)]
        describe: Option<String>,

        /// Game name. Defaults to the workspace id.
        #[arg(long)]
        name: Option<String>,
    },

    /// Apply a batch of edit operations.
    ///
    /// Reads a JSON array of operations (or a single operation) from
    /// `--file`, or stdin when no file is given. The batch applies entirely
    /// or not at all.
    Apply {
        workspace: WorkspaceId,

        #[arg(long)]
        file: Option<PathBuf>,

        /// Refuse to commit unless the session is at this version.
        #[arg(long)]
        expect_version: Option<u64>,
    },

    /// Print the current specification, or a past version, as JSON.
    Show {
        workspace: WorkspaceId,

        #[arg(long)]
        version: Option<u64>,

        /// Print the whole session record: status, current version and history.
        #[arg(long, conflicts_with = "version")]
        full: bool,
    },

    /// List committed batches, oldest first.
    History { workspace: WorkspaceId },

    /// List sessions.
    List,

    /// Freeze a session. It stays readable.
    Archive { workspace: WorkspaceId },

    /// Unfreeze an archived session.
    Restore { workspace: WorkspaceId },

    /// Keep only the newest history entries.
    Compact {
        workspace: WorkspaceId,

        #[arg(long)]
        keep: usize,
    },

    /// Copy a folder of assets into the workspace and register them.
    ///
    /// Respects `.gitignore`. Files with unknown extensions are skipped.
    ImportAssets { workspace: WorkspaceId, dir: PathBuf },

    /// Build a preview bundle and print its handle.
    Preview {
        workspace: WorkspaceId,

        #[command(flatten)]
        mobile: MobileArgs,
    },

    /// Package the current version and wait for the job to finish.
    Export {
        workspace: WorkspaceId,

        #[arg(long, value_enum, default_value = "archive")]
        format: FormatArg,

        #[arg(long, value_enum, default_value = "standard")]
        compression: CompressionArg,

        /// Leave resources out of the artifact.
        #[arg(long)]
        no_assets: bool,

        /// Give up waiting after this many seconds. The job keeps running.
        #[arg(long, default_value_t = 300)]
        wait_secs: u64,

        #[command(flatten)]
        mobile: MobileArgs,
    },

    /// Delete expired preview bundles and export artifacts.
    Cleanup,
}

/// Mobile adaptation. Applied only when `--device` is given.
#[derive(Debug, Args)]
pub struct MobileArgs {
    #[arg(long, value_enum)]
    device: Option<DeviceArg>,

    #[arg(long, value_enum, default_value = "touch-direct", requires = "device")]
    controls: ControlsArg,

    #[arg(long, value_enum, default_value = "landscape", requires = "device")]
    orientation: OrientationArg,

    /// Vibrate on control input.
    #[arg(long, requires = "device")]
    haptic: bool,
}

impl MobileArgs {
    fn to_domain(&self) -> Option<MobileProfile> {
        self.device.as_ref().map(|device| MobileProfile {
            target_device: device.to_domain(),
            control_scheme: self.controls.to_domain(),
            orientation: self.orientation.to_domain(),
            haptic_enabled: self.haptic,
        })
    }
}

/// CLI-facing template, mapped to the domain `Template`.
#[derive(Debug, Clone, ValueEnum)]
pub enum TemplateArg {
    /// One empty scene.
    Blank,
    /// Player, ground and coins.
    Platformer,
    /// Hero exploring a walled map.
    TopDown,
    /// Draggable tiles and a win screen.
    Puzzle,
}

impl TemplateArg {
    fn to_domain(&self) -> Template {
        match self {
            Self::Blank => Template::Blank,
            Self::Platformer => Template::Platformer,
            Self::TopDown => Template::TopDown,
            Self::Puzzle => Template::Puzzle,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
pub enum FormatArg {
    /// A single tar archive.
    Archive,
    /// An unpacked HTML5 directory.
    Directory,
}

impl FormatArg {
    fn to_domain(&self) -> ExportFormat {
        match self {
            Self::Archive => ExportFormat::Archive,
            Self::Directory => ExportFormat::Directory,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
pub enum CompressionArg {
    None,
    Standard,
    Maximum,
}

impl CompressionArg {
    fn to_domain(&self) -> CompressionLevel {
        match self {
            Self::None => CompressionLevel::None,
            Self::Standard => CompressionLevel::Standard,
            Self::Maximum => CompressionLevel::Maximum,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
pub enum DeviceArg {
    Phone,
    Tablet,
}

impl DeviceArg {
    fn to_domain(&self) -> TargetDevice {
        match self {
            Self::Phone => TargetDevice::Phone,
            Self::Tablet => TargetDevice::Tablet,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ControlsArg {
    /// Touch where the character should go.
    TouchDirect,
    /// On-screen pad plus an action button.
    VirtualDpad,
    /// No on-screen controls.
    None,
}

impl ControlsArg {
    fn to_domain(&self) -> ControlScheme {
        match self {
            Self::TouchDirect => ControlScheme::TouchDirect,
            Self::VirtualDpad => ControlScheme::VirtualDpad,
            Self::None => ControlScheme::None,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OrientationArg {
    Landscape,
    Portrait,
}

impl OrientationArg {
    fn to_domain(&self) -> Orientation {
        match self {
            Self::Landscape => Orientation::Landscape,
            Self::Portrait => Orientation::Portrait,
        }
    }
}

/// A batch file holds either a list of operations or just one.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Batch {
    Many(Vec<EditOperation>),
    One(EditOperation),
}

impl Batch {
    fn into_operations(self) -> Vec<EditOperation> {
        match self {
            Self::Many(ops) => ops,
            Self::One(op) => vec![op],
        }
    }
}

/// Run the CLI, returning an error message on failure.
pub fn run(home: &Path, config: &Config) -> Result<(), String> {
    let cli = Cli::parse();
    let service = GameService::open(home, config).map_err(|e| describe(&e))?;

    match cli.command {
        Command::Init {
            workspace,
            template,
            describe,
            name,
        } => {
            let name = name.unwrap_or_else(|| workspace.to_string());
            let template = match (template, describe) {
                (Some(template), _) => template.to_domain(),
                (None, Some(description)) => Template::from_description(&description),
                (None, None) => Template::Blank,
            };
            let summary = service
                .initialize(&workspace, template, &name)
                .map_err(|e| self::describe(&e))?;
            eprintln!("{}", format_summary(&summary));
            Ok(())
        }
        Command::Apply {
            workspace,
            file,
            expect_version,
        } => cmd_apply(&service, workspace, file.as_deref(), expect_version),
        Command::Show {
            workspace,
            version,
            full,
        } => cmd_show(&service, &workspace, version, full),
        Command::History { workspace } => {
            let history = service
                .sessions()
                .get_history(&workspace)
                .map_err(|e| describe(&e.into()))?;
            if history.is_empty() {
                println!("No history");
            }
            for entry in &history {
                println!("{}", format_history_entry(entry));
            }
            Ok(())
        }
        Command::List => {
            let sessions = service.sessions().list().map_err(|e| describe(&e.into()))?;
            if sessions.is_empty() {
                println!("No sessions");
            }
            for session in &sessions {
                println!("{}", format_session(session));
            }
            Ok(())
        }
        Command::Archive { workspace } => {
            service
                .sessions()
                .archive(&workspace)
                .map_err(|e| describe(&e.into()))?;
            eprintln!("Archived {workspace}");
            Ok(())
        }
        Command::Restore { workspace } => {
            service
                .sessions()
                .restore(&workspace)
                .map_err(|e| describe(&e.into()))?;
            eprintln!("Restored {workspace}");
            Ok(())
        }
        Command::Compact { workspace, keep } => {
            let dropped = service
                .sessions()
                .compact(&workspace, keep)
                .map_err(|e| describe(&e.into()))?;
            eprintln!("Dropped {dropped} history entries from {workspace}");
            Ok(())
        }
        Command::ImportAssets { workspace, dir } => {
            let summary = service
                .import_assets(&workspace, &dir)
                .map_err(|e| describe(&e))?;
            eprintln!("{}", format_summary(&summary));
            Ok(())
        }
        Command::Preview { workspace, mobile } => {
            let handle = service
                .preview(&PreviewRequest {
                    workspace_id: workspace,
                    mobile_profile: mobile.to_domain(),
                })
                .map_err(|e| describe(&e))?;
            print_json(&handle)
        }
        Command::Export {
            workspace,
            format,
            compression,
            no_assets,
            wait_secs,
            mobile,
        } => {
            let request = ExportRequest {
                workspace_id: workspace,
                options: ExportOptions {
                    format: format.to_domain(),
                    include_assets: !no_assets,
                    compression_level: compression.to_domain(),
                },
                mobile_profile: mobile.to_domain(),
            };
            cmd_export(&service, &request, Duration::from_secs(wait_secs))
        }
        Command::Cleanup => {
            let (previews, exports) = service.sweep().map_err(|e| describe(&e))?;
            eprintln!("Removed {previews} preview bundle(s) and {exports} export artifact(s)");
            Ok(())
        }
    }
}

fn cmd_apply(
    service: &GameService,
    workspace: WorkspaceId,
    file: Option<&Path>,
    expected_version: Option<u64>,
) -> Result<(), String> {
    let input = match file {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| format!("failed to read stdin: {e}"))?;
            buf
        }
    };
    let batch: Batch =
        serde_json::from_str(&input).map_err(|e| format!("invalid operations JSON: {e}"))?;

    let summary = service
        .handle_edit(&EditRequest {
            workspace_id: workspace,
            operations: batch.into_operations(),
            expected_version,
        })
        .map_err(|e| describe(&e))?;
    eprintln!("{}", format_summary(&summary));
    Ok(())
}

fn cmd_show(
    service: &GameService,
    workspace: &WorkspaceId,
    version: Option<u64>,
    full: bool,
) -> Result<(), String> {
    let sessions = service.sessions();
    if full {
        let record = sessions
            .load_record(workspace)
            .map_err(|e| describe(&e.into()))?;
        return print_json(&record);
    }
    match version {
        Some(version) => {
            let spec = sessions
                .spec_at(workspace, version)
                .map_err(|e| describe(&e.into()))?;
            print_json(&spec)
        }
        None => {
            let spec = sessions
                .get_current(workspace)
                .map_err(|e| describe(&e.into()))?;
            print_json(&*spec)
        }
    }
}

fn cmd_export(
    service: &GameService,
    request: &ExportRequest,
    wait: Duration,
) -> Result<(), String> {
    let queued = service.export(request).map_err(|e| describe(&e))?;
    eprintln!("{}", format_job(&queued));

    let job = service.wait(queued.id, wait).map_err(|e| describe(&e))?;
    eprintln!("{}", format_job(&job));
    print_json(&job)?;

    match job.status {
        ExportStatus::Completed => Ok(()),
        ExportStatus::Failed => Err("export failed".to_string()),
        ExportStatus::Queued | ExportStatus::Running => {
            Err(format!("export {} still running after {wait:?}", job.id))
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), String> {
    let json =
        serde_json::to_string_pretty(value).map_err(|e| format!("failed to serialize: {e}"))?;
    println!("{json}");
    Ok(())
}

/// One-line message, pointing at the failing operation when there is one.
fn describe(error: &ServiceError) -> String {
    match error.payload().index {
        Some(index) => format!("{error} (operation {index} rejected, nothing was committed)"),
        None => error.to_string(),
    }
}
