//! Conduit - adapter configuration and simulation tool

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    conduit_cli::run().await?;
    Ok(())
}
