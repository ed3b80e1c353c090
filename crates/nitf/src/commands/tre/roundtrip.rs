use clap::Args;
use itertools::Itertools;
use miette::{miette, Context, IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use similar::{ChangeTag, TextDiff};
use std::{io::Cursor, path::PathBuf};
use tracing::info;

use super::load_registry;

#[derive(Args)]
pub struct RoundtripArgs {
    /// A handler directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// A single TRE's data
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Tag of the TRE held in the file
    #[arg(short, long)]
    tag: String,
}

/// One line per 16 bytes, offset then hex
fn hex_lines(data: &[u8]) -> String {
    data.chunks(16)
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "{:08x}  {}\n",
                i * 16,
                chunk.iter().map(|b| format!("{b:02x}")).join(" ")
            )
        })
        .collect()
}

impl RoundtripArgs {
    pub fn handle(&self) -> Result<()> {
        let registry = load_registry(&self.directory)?;

        let original = std::fs::read(&self.file)
            .into_diagnostic()
            .context(format!("path: {}", &self.file.display()))?;
        let tre = registry.read_tre(&self.tag, original.len(), &mut Cursor::new(&original))?;
        let written = tre.to_bytes()?;

        if written == original {
            info!("{} ({}) round-trips {} bytes", self.tag, tre.id(), written.len());
            println!("✅ {}", self.tag.green());
            return Ok(());
        }

        let old = hex_lines(&original);
        let new = hex_lines(&written);
        let diff = TextDiff::from_lines(&old, &new);
        println!("🔃 {}", self.tag.blue());
        for change in diff.iter_all_changes() {
            match change.tag() {
                ChangeTag::Delete => print!("-{}", change.value().red()),
                ChangeTag::Insert => print!("+{}", change.value().green()),
                ChangeTag::Equal => print!(" {}", change.value().dimmed()),
            }
        }

        Err(miette!(
            "{} changed on round-trip ({} bytes read, {} written)",
            self.tag,
            original.len(),
            written.len()
        ))
    }
}
