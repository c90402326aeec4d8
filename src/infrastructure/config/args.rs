use super::app_config::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "guildsync",
    version,
    about = "Client-side sync for guild chat: realtime collections and an inline image cache",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Directory for persisted cache data.
    #[arg(long, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Backend base URL.
    #[arg(long, env = "GUILDSYNC_URL", hide_env_values = true)]
    pub url: Option<String>,

    /// Backend anonymous API key.
    #[arg(long, env = "GUILDSYNC_ANON_KEY", hide_env_values = true)]
    pub anon_key: Option<String>,

    /// User access token.
    #[arg(long, env = "GUILDSYNC_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print a channel's messages and follow new ones until Ctrl-C.
    Watch {
        #[arg(long)]
        channel: String,
    },
    /// Send a message to a channel.
    Send {
        #[arg(long)]
        channel: String,
        #[arg(long)]
        user: String,
        text: String,
    },
    /// List guilds.
    Guilds,
    /// Inspect or manage the image cache.
    Image {
        #[command(subcommand)]
        action: ImageCommand,
    },
    /// Print the effective configuration.
    Config {
        /// Write it back to the config file, keeping command-line overrides.
        #[arg(long)]
        save: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum ImageCommand {
    /// Resolve an image URL to inline data.
    Get {
        url: String,
        /// Bypass the cache.
        #[arg(long)]
        force: bool,
    },
    /// Remove every cached image.
    Clear,
    /// Show cache size and hit rate.
    Stats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send() {
        let args = CliArgs::parse_from([
            "guildsync", "send", "--channel", "c1", "--user", "u1", "hello there",
        ]);
        match args.command {
            Command::Send {
                channel,
                user,
                text,
            } => {
                assert_eq!(channel, "c1");
                assert_eq!(user, "u1");
                assert_eq!(text, "hello there");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_config_save_with_overrides() {
        let args = CliArgs::parse_from([
            "guildsync", "--url", "https://abc.example.co", "--log-level", "debug", "config", "--save",
        ]);
        assert_eq!(args.url.as_deref(), Some("https://abc.example.co"));
        assert_eq!(args.log_level, Some(LogLevel::Debug));
        assert!(matches!(args.command, Command::Config { save: true }));
    }

    #[test]
    fn test_parse_image_get_force() {
        let args = CliArgs::parse_from(["guildsync", "image", "get", "https://x.test/a.png", "--force"]);
        assert!(matches!(
            args.command,
            Command::Image {
                action: ImageCommand::Get { force: true, .. }
            }
        ));
    }
}
