pub mod aggregate;
pub mod artifact;
pub mod config;
pub mod context;
pub mod error;
pub mod findings;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod risk;

pub use aggregate::Aggregator;
pub use artifact::{ArtifactKind, ArtifactLayout};
pub use config::{load_target, Capability, CapabilityName, GlobalConfig, SkipReason};
pub use context::{assemble, ReportContext, Stats};
pub use error::{ConfigError, LookupError};
pub use findings::{FindingRule, RuleSet};
pub use model::{KeyFinding, RecordSet, Severity, Target};
pub use pipeline::{stage_enablement, Orchestrator, RunReport, StageKind, StageOutcome};
pub use report::{render_context_summary, render_enablement, render_run_report, OutputFormat};
