use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{Args, CommandFactory, Parser, ValueEnum};

use obsidian_install::config::Config;
use obsidian_install::install::{Filesystem, InstallPlan, PartitionSizes, SystemSettings};

/// Install ObsidianOS by driving its installation tool in a pseudo-terminal
#[derive(Parser, Debug)]
#[command(name = "obsidian-install")]
#[command(version)]
pub struct Cli {
    /// Target disk, e.g. /dev/sda
    #[arg(long, value_name = "DEV")]
    pub disk: String,

    /// System image to install [default: from config, else /etc/system.sfs]
    #[arg(long, value_name = "PATH")]
    pub image: Option<String>,

    /// Root filesystem size in GiB
    #[arg(long, value_name = "N")]
    pub rootfs_size: Option<u32>,

    /// EFI system partition size in MiB
    #[arg(long, value_name = "N")]
    pub esp_size: Option<u32>,

    /// /etc partition size in GiB
    #[arg(long, value_name = "N")]
    pub etc_size: Option<u32>,

    /// /var partition size in GiB
    #[arg(long, value_name = "N")]
    pub var_size: Option<u32>,

    /// Keep the existing operating system bootable
    #[arg(long)]
    pub dual_boot: bool,

    /// Filesystem for the root slots
    #[arg(long, value_enum, default_value_t = Filesystem::Ext4)]
    pub filesystem: Filesystem,

    /// Set up secure boot
    #[arg(long)]
    pub secure_boot: bool,

    /// Run the scripted stand-in instead of the installation tool
    #[arg(long)]
    pub test: bool,

    /// How to answer the chroot question
    #[arg(long, value_enum, default_value_t = AnswerMode::Ask)]
    pub answer: AnswerMode,

    #[command(flatten)]
    pub system: SystemArgs,

    /// Settings file [default: ~/.config/obsidian-install/config.toml]
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log more (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerMode {
    /// Read the answer from standard input
    Ask,
    /// Enter the chroot, apply the system settings, then leave it
    Yes,
    /// Skip the chroot
    No,
}

/// System configuration applied inside the chroot. All or none.
#[derive(Args, Debug, Default)]
pub struct SystemArgs {
    #[arg(long)]
    pub locale: Option<String>,
    #[arg(long, value_name = "TZ")]
    pub timezone: Option<String>,
    #[arg(long)]
    pub keyboard: Option<String>,
    #[arg(long)]
    pub fullname: Option<String>,
    #[arg(long)]
    pub username: Option<String>,
    #[arg(long)]
    pub password: Option<String>,
    #[arg(long)]
    pub root_password: Option<String>,
}

impl SystemArgs {
    fn fields(&self) -> [(&'static str, &Option<String>); 7] {
        [
            ("--locale", &self.locale),
            ("--timezone", &self.timezone),
            ("--keyboard", &self.keyboard),
            ("--fullname", &self.fullname),
            ("--username", &self.username),
            ("--password", &self.password),
            ("--root-password", &self.root_password),
        ]
    }

    /// `Ok(None)` when none were given, the names of the missing ones when
    /// only some were.
    pub fn settings(&self) -> Result<Option<SystemSettings>, Vec<&'static str>> {
        let fields = self.fields();
        let missing: Vec<_> = fields
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| *name)
            .collect();
        if missing.len() == fields.len() {
            return Ok(None);
        }
        if !missing.is_empty() {
            return Err(missing);
        }

        let value = |v: &Option<String>| v.clone().unwrap_or_default();
        Ok(Some(SystemSettings {
            locale: value(&self.locale),
            timezone: value(&self.timezone),
            keyboard: value(&self.keyboard),
            fullname: value(&self.fullname),
            username: value(&self.username),
            password: value(&self.password),
            root_password: value(&self.root_password),
        }))
    }
}

impl Cli {
    /// Build the plan, filling gaps from the settings file.
    pub fn plan(&self, config: &Config) -> InstallPlan {
        let defaults = config.partitions;
        let mut plan = InstallPlan::new(self.disk.clone());
        plan.image = self
            .image
            .clone()
            .unwrap_or_else(|| config.installer.image.clone());
        plan.sizes = PartitionSizes {
            root_gib: self.rootfs_size.unwrap_or(defaults.root_gib),
            esp_mib: self.esp_size.unwrap_or(defaults.esp_mib),
            etc_gib: self.etc_size.unwrap_or(defaults.etc_gib),
            var_gib: self.var_size.unwrap_or(defaults.var_gib),
        };
        plan.dual_boot = self.dual_boot;
        plan.filesystem = self.filesystem;
        plan.secure_boot = self.secure_boot;
        plan
    }

    /// System settings, or a usage error (exit status 2) when incomplete.
    pub fn system_settings(&self) -> Option<SystemSettings> {
        match self.system.settings() {
            Ok(settings) => settings,
            Err(missing) => Cli::command()
                .error(
                    ErrorKind::MissingRequiredArgument,
                    format!(
                        "system settings must be given together; missing {}",
                        missing.join(", ")
                    ),
                )
                .exit(),
        }
    }
}
