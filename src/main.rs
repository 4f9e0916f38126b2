#[tokio::main]
async fn main() -> anyhow::Result<()> {
    doris_gateway_lib::run().await
}
