mod cli;
mod initializers;

use crate::{cli::CLI, initializers::init_tracing};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[tokio::main]
async fn main() {
    let CLI { log, command } = match CLI::try_parse() {
        Ok(cli) => cli,
        // --help and --version
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            let _ = err.print();
            std::process::exit(1);
        }
    };
    init_tracing(&log);

    let cancel = CancellationToken::new();
    let mut migration = {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || command.run(&cancel))
    };
    let joined = tokio::select! {
        joined = &mut migration => joined,
        _ = tokio::signal::ctrl_c() => {
            warn!("Received Ctrl+C, stopping the migration");
            cancel.cancel();
            migration.await
        }
    };

    if let Err(error) = joined.map_err(eyre::Report::from).and_then(|result| result) {
        eprintln!("Error: {error:#}");
        std::process::exit(1);
    }
}
