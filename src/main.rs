use clap::Parser;

use fca_session::cli::{Cli, run};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    fca_session::bootstrap::load_fca_env();
    fca_session::bootstrap::init_tracing();

    run(Cli::parse()).await
}
