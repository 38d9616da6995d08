//! realtalk CLI binary entry point.

use std::process::ExitCode;

use realtalk::cli::{Cli, Commands};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_tracing(cli.log_json);

    let result = match cli.command {
        Commands::Serve(args) => realtalk::cli::serve::run(args.port, args.dir)
            .await
            .map(|()| ExitCode::SUCCESS),
        Commands::Payload(args) => {
            realtalk::cli::handle_payload(&args).map(|()| ExitCode::SUCCESS)
        }
        #[cfg(feature = "device")]
        Commands::Connect(args) => realtalk::cli::connect::run(args).await.map(ExitCode::from),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, category = ?e.category(), "Command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "realtalk=info,tower_http=info".into());
    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
