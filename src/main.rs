use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    clipwatch::init_tracing();
    clipwatch::cli::run(clipwatch::cli::Cli::parse()).await
}
