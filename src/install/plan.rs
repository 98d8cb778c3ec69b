use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::install::locate;
use crate::pty::LaunchSpec;
use crate::session::CHROOT_QUESTION;

/// Installation tool invoked in live mode.
pub const DEFAULT_TOOL: &str = "obsidianctl";
/// System image shipped on the live medium.
pub const DEFAULT_IMAGE: &str = "/etc/system.sfs";

/// Accepted root, etc and var sizes, in GiB.
pub const GIB_RANGE: RangeInclusive<u32> = 1..=9999;
/// Accepted ESP sizes, in MiB.
pub const ESP_MIB_RANGE: RangeInclusive<u32> = 100..=2048;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("no target disk given")]
    MissingDisk,

    #[error("{partition} size {value}{unit} is outside {min}..={max}{unit}")]
    SizeOutOfRange {
        partition: &'static str,
        value: u32,
        min: u32,
        max: u32,
        unit: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Filesystem {
    #[default]
    Ext4,
    F2fs,
}

impl fmt::Display for Filesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ext4 => "ext4",
            Self::F2fs => "f2fs",
        })
    }
}

/// Partition sizes; root, etc and var in GiB, the ESP in MiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionSizes {
    pub root_gib: u32,
    pub esp_mib: u32,
    pub etc_gib: u32,
    pub var_gib: u32,
}

impl Default for PartitionSizes {
    fn default() -> Self {
        Self {
            root_gib: 6,
            esp_mib: 512,
            etc_gib: 5,
            var_gib: 5,
        }
    }
}

impl PartitionSizes {
    pub fn validate(&self) -> Result<(), PlanError> {
        check("root", self.root_gib, &GIB_RANGE, "G")?;
        check("esp", self.esp_mib, &ESP_MIB_RANGE, "M")?;
        check("etc", self.etc_gib, &GIB_RANGE, "G")?;
        check("var", self.var_gib, &GIB_RANGE, "G")
    }
}

fn check(
    partition: &'static str,
    value: u32,
    range: &RangeInclusive<u32>,
    unit: &'static str,
) -> Result<(), PlanError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(PlanError::SizeOutOfRange {
            partition,
            value,
            min: *range.start(),
            max: *range.end(),
            unit,
        })
    }
}

/// What gets installed where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    pub disk: String,
    pub image: String,
    pub sizes: PartitionSizes,
    pub dual_boot: bool,
    pub filesystem: Filesystem,
    pub secure_boot: bool,
}

impl InstallPlan {
    pub fn new(disk: impl Into<String>) -> Self {
        Self {
            disk: disk.into(),
            image: DEFAULT_IMAGE.to_string(),
            sizes: PartitionSizes::default(),
            dual_boot: false,
            filesystem: Filesystem::default(),
            secure_boot: false,
        }
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        if self.disk.trim().is_empty() {
            return Err(PlanError::MissingDisk);
        }
        self.sizes.validate()
    }

    /// Arguments after `sudo -S <tool>`.
    pub fn install_args(&self) -> Vec<String> {
        let mut args = vec![
            "install".to_string(),
            self.disk.clone(),
            self.image.clone(),
            "--rootfs-size".to_string(),
            format!("{}G", self.sizes.root_gib),
            "--esp-size".to_string(),
            format!("{}M", self.sizes.esp_mib),
            "--etc-size".to_string(),
            format!("{}G", self.sizes.etc_gib),
            "--var-size".to_string(),
            format!("{}G", self.sizes.var_gib),
        ];
        if self.dual_boot {
            args.push("--dual-boot".to_string());
        }
        if self.secure_boot {
            args.push("--secure-boot".to_string());
        }
        if self.filesystem == Filesystem::F2fs {
            args.push("--use-f2fs".to_string());
        }
        args
    }

    pub fn launch_spec(&self, mode: &RunMode) -> LaunchSpec {
        match mode {
            RunMode::Live { tool } => LaunchSpec::new("sudo")
                .args(["-S", tool.as_str()])
                .args(self.install_args()),
            RunMode::Test { step_delay } => {
                LaunchSpec::new("sh").args(["-c".to_string(), test_script(*step_delay)])
            }
        }
    }
}

/// Whether the real installation tool runs or the scripted stand-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    Live { tool: String },
    Test { step_delay: Duration },
}

impl RunMode {
    /// Decide once: explicit test mode wins, otherwise fall back to test
    /// mode when `tool` is not on `PATH`.
    pub fn resolve(force_test: bool, tool: &str, step_delay: Duration) -> Self {
        if force_test {
            return Self::Test { step_delay };
        }
        match locate::find_executable(tool) {
            Some(path) => {
                tracing::debug!(tool, path = %path.display(), "installation tool found");
                Self::Live {
                    tool: tool.to_string(),
                }
            }
            None => {
                tracing::warn!(tool, "installation tool not found on PATH, running in test mode");
                Self::Test { step_delay }
            }
        }
    }

    pub fn is_test(&self) -> bool {
        matches!(self, Self::Test { .. })
    }
}

/// Shell script that mimics the installation tool's output and its chroot
/// question.
pub fn test_script(step_delay: Duration) -> String {
    let pause = if step_delay.is_zero() {
        String::new()
    } else {
        format!(" sleep {};", step_delay.as_secs_f64())
    };
    let question = CHROOT_QUESTION.replace('\'', r"'\''");

    let mut script = String::new();
    for step in [
        "Test running...",
        "Partitioning disk...",
        "Installing system image...",
        "Configuring bootloader...",
    ] {
        script.push_str(&format!("echo \"{step}\";{pause} "));
    }
    script.push_str(&format!(
        "printf '%s' '{question}'; read answer; echo \"User answered: $answer\"; echo \"Installation complete\""
    ));
    script
}
