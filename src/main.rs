// src/main.rs

use cachedag::types::RunOutcome;
use cachedag::{cli, logging, run};

#[tokio::main]
async fn main() {
    match run_main().await {
        Ok(RunOutcome::Succeeded) => {}
        Ok(RunOutcome::Failed) => std::process::exit(1),
        Err(err) => {
            eprintln!("cachedag error: {err:?}");
            std::process::exit(1);
        }
    }
}

async fn run_main() -> anyhow::Result<RunOutcome> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}
