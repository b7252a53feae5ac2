use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    wolfpack::infra::secrets::install_panic_redaction_hook();

    let cli = wolfpack::cli::Cli::parse();
    wolfpack::app::run(cli)
}
