use clap::Args;
use miette::{Context, IntoDiagnostic, Result};
use nitf_tre::{Extensions, Tre};
use owo_colors::OwoColorize;
use std::{fs::File, io::BufReader, path::PathBuf};

use super::load_registry;

#[derive(Args)]
pub struct DumpArgs {
    /// A handler directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// An extension section, or a single TRE's data when a tag is given
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Tag of the TRE held in the file
    #[arg(short, long)]
    tag: Option<String>,
}

fn print_tre(tre: &Tre) {
    if tre.is_raw() {
        println!("{} ({})", tre.tag().yellow(), "no handler".dimmed());
    } else {
        println!("{} ({})", tre.tag().green(), tre.id());
    }
    for description in tre.describe() {
        println!("  {description}");
    }
}

impl DumpArgs {
    pub fn handle(&self) -> Result<()> {
        let registry = load_registry(&self.directory)?;

        let f = File::open(&self.file)
            .into_diagnostic()
            .context(format!("path: {}", &self.file.display()))?;
        let length = f.metadata().into_diagnostic()?.len() as usize;
        let mut reader = BufReader::new(f);

        match &self.tag {
            Some(tag) => {
                let tre = registry.read_tre(tag, length, &mut reader)?;
                print_tre(&tre);
            }
            None => {
                let extensions = Extensions::read(&registry, &mut reader, length)?;
                for tre in &extensions {
                    print_tre(tre);
                }
            }
        }
        Ok(())
    }
}
