pub mod tre;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Check handler directories, dump TRE fields and verify that TREs survive a
    /// read and write cycle
    Tre {
        #[command(subcommand)]
        command: tre::TreCommands,
    },
}

impl Commands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            Commands::Tre { command } => command.handle(),
        }
    }
}
