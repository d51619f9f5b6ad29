use clap::Parser;
use videokb::cli::{Cli, execute};
use videokb::logging::init_tracing;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("warning: failed to initialize logging: {e}");
    }

    if let Err(err) = execute(cli).await {
        // user-facing message; the cause chain went to the log
        eprintln!("error: {err}");
        std::process::exit(err.exit_code());
    }
}
