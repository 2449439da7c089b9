mod host;
mod inputs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
