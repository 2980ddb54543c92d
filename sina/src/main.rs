#![deny(clippy::mod_module_files)]

use anyhow::Result;
use clap::Parser;

mod align;
mod fasta;
mod search;

#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    subcommand: Subcommand,
}

#[derive(clap::Subcommand)]
enum Subcommand {
    /// Align query sequences against a reference template.
    Align(Box<align::Cli>),
    /// Search and classify query sequences against a reference database.
    Search(Box<search::Cli>),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.subcommand {
        Subcommand::Align(cli) => align::cli(*cli),
        Subcommand::Search(cli) => search::cli(*cli),
    }
}
