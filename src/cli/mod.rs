//! CLI entry point for realtalk.

#[cfg(feature = "device")]
pub mod connect;
pub mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Realtime voice-assistant client
#[derive(Parser, Debug)]
#[command(name = "realtalk", version, about = "Realtime voice-assistant client")]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the browser client's static files
    Serve(ServeArgs),
    /// Validate configuration and print the session-creation payload
    Payload(ConfigArgs),
    /// Run one voice session on the default microphone and speakers
    #[cfg(feature = "device")]
    Connect(ConnectArgs),
}

/// Arguments for `realtalk serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = serve::DEFAULT_PORT)]
    pub port: u16,

    /// Directory to serve (index.html is served at `/`)
    #[arg(short, long, default_value = ".")]
    pub dir: PathBuf,
}

/// Configuration source shared by session commands.
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// TOML config file; `REALTALK_*` environment variables override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Arguments for `realtalk connect`.
#[cfg(feature = "device")]
#[derive(Parser, Debug)]
pub struct ConnectArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Print assistant transcript deltas as they stream in
    #[arg(long)]
    pub stream_transcript: bool,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Print the session-creation JSON for the resolved configuration.
pub fn handle_payload(args: &ConfigArgs) -> Result<(), crate::error::RealtalkError> {
    let config = crate::config::RealtalkConfig::load(args.config.as_deref())?;
    let payload = crate::audio::realtime::build_session_payload(&config.session)?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_serve_with_port() {
        let cli = Cli::try_parse_from(["realtalk", "serve", "--port", "8080"]).unwrap();
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.port, 8080);
                assert_eq!(args.dir, PathBuf::from("."));
            }
            other => panic!("expected Serve, got {other:?}"),
        }
        assert!(!cli.log_json);
    }

    #[test]
    fn parse_payload_with_config_and_json_logs() {
        let cli =
            Cli::try_parse_from(["realtalk", "payload", "-c", "realtalk.toml", "--log-json"])
                .unwrap();
        assert!(cli.log_json);
        match cli.command {
            Commands::Payload(args) => {
                assert_eq!(args.config, Some(PathBuf::from("realtalk.toml")));
            }
            other => panic!("expected Payload, got {other:?}"),
        }
    }

    #[test]
    fn parse_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["realtalk"]).is_err());
    }
}
