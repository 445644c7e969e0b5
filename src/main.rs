use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    asv8::app_init().await?;
    asv8::app::bootstrap::run().await
}
