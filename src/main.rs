use jsonserver_operator::{init_tracing, Operator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    let operator = Operator::from_env()?;
    tracing::info!(config = ?operator.config(), "loaded configuration");
    operator.run().await?;
    Ok(())
}
