//! Clap derive structures for the `viera` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use viera_core::{Action, Key};

/// viera -- control Panasonic VIERA televisions on the local network
#[derive(Debug, Parser)]
#[command(
    name = "viera",
    version,
    about = "Discover, pair with, and control Panasonic VIERA televisions",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "VIERA_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the connector, printing every output message as a JSON line
    Run,

    /// Scan the network once and print each television found
    Discover {
        /// Seconds to wait for SSDP responses
        #[arg(long, short = 't', default_value = "3")]
        timeout: u64,
    },

    /// Pair with an encrypted television and store the credentials
    Pair {
        /// Device id from the config file
        device: String,

        /// Pin shown on screen (prompted for when omitted)
        #[arg(long)]
        pin: Option<String>,
    },

    /// Send one command to a configured television
    Send {
        /// Device id from the config file
        device: String,

        #[command(subcommand)]
        action: ActionArg,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum ActionArg {
    /// Press a remote-control key (e.g. volume_up, hdmi2, num7)
    Key { key: Key },
    /// Launch an application by product id
    App { id: String },
    /// Switch to an HDMI input (1-4)
    Hdmi {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=4))]
        input: u8,
    },
    /// Set absolute volume (0-100)
    Volume {
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        level: u8,
    },
    /// Mute or unmute
    Mute {
        #[arg(action = clap::ArgAction::Set)]
        on: bool,
    },
}

impl From<ActionArg> for Action {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Key { key } => Self::Key(key),
            ActionArg::App { id } => Self::LaunchApp(id),
            ActionArg::Hdmi { input } => Self::SwitchHdmi(input),
            ActionArg::Volume { level } => Self::SetVolume(level),
            ActionArg::Mute { on } => Self::SetMute(on),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn send_key_parses_snake_case_names() {
        let cli = Cli::try_parse_from(["viera", "send", "tv-1", "key", "volume_up"]).unwrap();
        match cli.command {
            Command::Send { device, action } => {
                assert_eq!(device, "tv-1");
                assert_eq!(Action::from(action), Action::Key(Key::VolumeUp));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn hdmi_input_is_range_checked() {
        assert!(Cli::try_parse_from(["viera", "send", "tv-1", "hdmi", "5"]).is_err());
        let cli = Cli::try_parse_from(["viera", "-vv", "send", "tv-1", "mute", "true"]).unwrap();
        assert_eq!(cli.global.verbose, 2);
    }
}
