pub mod check;
pub mod dump;
pub mod roundtrip;

use std::path::Path;

use miette::{Context, Result};
use nitf_tre::HandlerRegistry;
use tracing::warn;

#[derive(clap::Subcommand)]
pub enum TreCommands {
    /// Load a handler directory and list what it registers
    Check(check::CheckArgs),
    /// Print the fields of a TRE or of an extension section
    Dump(dump::DumpArgs),
    /// Parse a TRE, write it back and compare the bytes
    Roundtrip(roundtrip::RoundtripArgs),
}

impl TreCommands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            TreCommands::Check(check) => check.handle(),
            TreCommands::Dump(dump) => dump.handle(),
            TreCommands::Roundtrip(roundtrip) => roundtrip.handle(),
        }
    }
}

/// Build a registry from a handler directory, warning about modules that failed
pub(crate) fn load_registry(directory: &Path) -> Result<HandlerRegistry> {
    let mut builder = HandlerRegistry::builder();
    let report = builder
        .load_directory(directory)
        .context(format!("loading handlers from {}", directory.display()))?;
    for (path, e) in &report.failed {
        warn!("{}: {e}", path.display());
    }
    Ok(builder.build())
}
