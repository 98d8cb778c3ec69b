//! What to install and how to talk to the installation tool.

pub mod locate;
mod plan;
mod sequencer;

pub use plan::{
    test_script, Filesystem, InstallPlan, PartitionSizes, PlanError, RunMode, DEFAULT_IMAGE,
    DEFAULT_TOOL, ESP_MIB_RANGE, GIB_RANGE,
};
pub use sequencer::{
    config_commands, redact_credentials, CommandSink, ConfigSequencer, SequenceError,
    SystemSettings,
};
