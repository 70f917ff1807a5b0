//! Core data model for gamewright.
//!
//! The specification tree, the edit operations that change it, the session
//! that holds it, and the derived artifacts built from it.

mod edit;
mod export;
mod mobile;
mod session;
mod spec;

pub use edit::EditOperation;
pub use export::{
    CompressionLevel, ExportFormat, ExportJob, ExportManifest, ExportOptions, ExportStage,
    ExportStatus, FailureReason, ManifestAsset, ManifestFile,
};
pub use mobile::{ControlScheme, MobileProfile, TargetDevice};
pub use session::{
    HistoryEntry, InvalidWorkspaceId, SessionRecord, SessionStatus, SessionSummary, WorkspaceId,
};
pub use spec::{
    Behavior, BehaviorKind, EventRule, GameObject, GameProperties, GameSpecification,
    Instruction, ObjectKind, Orientation, PropertyValue, RefKind, ResolutionMode, Resource,
    ResourceKind, Scene, UnknownBehavior, Viewport,
};
