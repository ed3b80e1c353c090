use clap::Args;
use itertools::Itertools;
use miette::{miette, Context, Result};
use nitf_tre::HandlerRegistry;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct CheckArgs {
    /// A handler directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,
}

impl CheckArgs {
    pub fn handle(&self) -> Result<()> {
        let mut builder = HandlerRegistry::builder();
        let report = builder
            .load_directory(&self.directory)
            .context(format!("path: {}", &self.directory.display()))?;
        let registry = builder.build();

        for tag in registry.tags().sorted() {
            let candidates = registry
                .candidates(tag)
                .unwrap_or_default()
                .iter()
                .map(|c| format!("{} ({})", c.program.name(), c.length))
                .join(", ");
            println!("✅ {}: {}", tag.green(), candidates);
        }

        for module in registry.modules() {
            info!("shared library {}", module.display());
        }

        for path in &report.skipped {
            info!("skipped {}", path.display());
        }

        for (path, e) in &report.failed {
            println!("❌ {}: {}", path.display().red(), e);
        }

        if !report.failed.is_empty() {
            return Err(miette!(
                "{} of {} modules failed to load",
                report.failed.len(),
                report.failed.len() + report.loaded.len()
            ));
        }
        Ok(())
    }
}
