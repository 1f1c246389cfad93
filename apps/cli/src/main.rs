//! sheetloader CLI: extract spreadsheet-like files into a workbook store.
//!
//! Runs the extraction pipeline against the remote API, or fully offline
//! against a local libSQL store.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
