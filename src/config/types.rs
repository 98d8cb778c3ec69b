use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::install::{PartitionSizes, DEFAULT_IMAGE, DEFAULT_TOOL};
use crate::session::SessionOptions;

/// Root configuration container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub installer: InstallerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub sequencer: SequencerConfig,
    #[serde(default)]
    pub test_mode: TestModeConfig,
    /// Sizes offered when the command line does not give one.
    #[serde(default)]
    pub partitions: PartitionSizes,
}

/// Which tool to run and what to install.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallerConfig {
    /// Installation tool looked up on PATH (default: "obsidianctl").
    #[serde(default = "default_tool")]
    pub tool: String,
    /// System image passed to the tool (default: "/etc/system.sfs").
    #[serde(default = "default_image")]
    pub image: String,
    /// Always run the scripted stand-in instead of the real tool.
    #[serde(default)]
    pub test_mode: bool,
}

/// Worker loop and input injector tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Readability wait per loop tick in milliseconds (default: 50).
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Pause before draining a finished child in milliseconds (default: 100).
    #[serde(default = "default_drain_settle_ms")]
    pub drain_settle_ms: u64,
    /// Reads attempted while draining (default: 16).
    #[serde(default = "default_drain_reads")]
    pub drain_reads: u32,
    /// Writability wait per stalled write in milliseconds (default: 100).
    #[serde(default = "default_write_stall_timeout_ms")]
    pub write_stall_timeout_ms: u64,
    /// Stalls tolerated before a send gives up (default: 50).
    #[serde(default = "default_max_write_stalls")]
    pub max_write_stalls: u32,
    /// SIGTERM to SIGKILL grace in milliseconds (default: 500).
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencerConfig {
    /// Pause between configuration commands in milliseconds (default: 500).
    #[serde(default = "default_command_delay_ms")]
    pub command_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestModeConfig {
    /// Pause between scripted progress lines in milliseconds (default: 1000).
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
}

fn default_tool() -> String {
    DEFAULT_TOOL.to_string()
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

fn default_poll_timeout_ms() -> u64 {
    50
}

fn default_drain_settle_ms() -> u64 {
    100
}

fn default_drain_reads() -> u32 {
    16
}

fn default_write_stall_timeout_ms() -> u64 {
    100
}

fn default_max_write_stalls() -> u32 {
    50
}

fn default_terminate_grace_ms() -> u64 {
    500
}

fn default_command_delay_ms() -> u64 {
    500
}

fn default_step_delay_ms() -> u64 {
    1000
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            tool: default_tool(),
            image: default_image(),
            test_mode: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            drain_settle_ms: default_drain_settle_ms(),
            drain_reads: default_drain_reads(),
            write_stall_timeout_ms: default_write_stall_timeout_ms(),
            max_write_stalls: default_max_write_stalls(),
            terminate_grace_ms: default_terminate_grace_ms(),
        }
    }
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            command_delay_ms: default_command_delay_ms(),
        }
    }
}

impl Default for TestModeConfig {
    fn default() -> Self {
        Self {
            step_delay_ms: default_step_delay_ms(),
        }
    }
}

impl From<&SessionConfig> for SessionOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
            drain_settle: Duration::from_millis(config.drain_settle_ms),
            drain_reads: config.drain_reads,
            write_stall_timeout: Duration::from_millis(config.write_stall_timeout_ms),
            max_write_stalls: config.max_write_stalls,
            terminate_grace: Duration::from_millis(config.terminate_grace_ms),
        }
    }
}

impl SequencerConfig {
    pub fn command_delay(&self) -> Duration {
        Duration::from_millis(self.command_delay_ms)
    }
}

impl TestModeConfig {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_defaults_match_the_session_module() {
        let options = SessionOptions::from(&SessionConfig::default());
        assert_eq!(options, SessionOptions::default());
    }

    #[test]
    fn empty_sections_take_defaults() {
        let config: Config = toml::from_str("[installer]\n[session]\n").unwrap();
        assert_eq!(config, Config::default());
    }
}
