use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cumulus_message_adapter_rs::{
    logging, single_command, FsBlobStore, MessageAdapter, MessageError, Settings, StreamSession,
};

#[derive(Debug, Parser)]
#[command(
    name = "cma",
    about = "Cumulus message adapter: prepares task input and builds the next workflow message"
)]
struct Cli {
    /// Operation to run once on the envelope read from stdin, or `stream`
    /// to serve the line protocol
    command: String,
    /// Directory backing the blob store (default: $CMA_BLOB_ROOT or ./.cma/blobs)
    #[arg(long)]
    blob_root: Option<PathBuf>,
    /// Directory schema paths are resolved against (default: $LAMBDA_TASK_ROOT or .)
    #[arg(long)]
    task_root: Option<PathBuf>,
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        match err.downcast_ref::<MessageError>() {
            Some(message_error) => eprintln!("{}: {err:#}", message_error.kind()),
            None => eprintln!("Error: {err:#}"),
        }
        let _ = io::stdout().flush();
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::from_env().context("invalid environment")?;
    if let Some(root) = cli.blob_root {
        settings.blob_root = root;
    }
    if let Some(root) = cli.task_root {
        settings.task_root = root;
    }

    ctrlc::set_handler(|| {
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
        std::process::exit(1);
    })
    .context("unable to install signal handler")?;

    let blobs = FsBlobStore::new(settings.blob_root.clone());
    let adapter = MessageAdapter::new(Arc::new(blobs)).with_settings(settings);

    let stdin = io::stdin();
    let stdout = io::stdout();
    if cli.command == "stream" {
        let mut session = StreamSession::new(adapter, stdin.lock(), stdout.lock());
        session.run()?;
    } else {
        single_command(&adapter, &cli.command, stdin.lock(), stdout.lock())?;
    }
    Ok(())
}
