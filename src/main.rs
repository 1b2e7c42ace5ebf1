use anyhow::Result;
use clap::Parser;
use mov2wav::{cli, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    logging::init_tracing(args.verbose);

    let code = cli::run(args).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
