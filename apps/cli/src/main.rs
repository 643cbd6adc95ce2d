//! LandReport CLI: parcel property reports as KML/KMZ.
//!
//! Fetches land types, vegetation, bores, easements and water layers for
//! a parcel, clips them to its boundary and packages the result.

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
