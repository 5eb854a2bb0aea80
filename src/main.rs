#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kbvec::run().await
}
