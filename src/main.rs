use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    e2e_pilot::cli::run().await
}
