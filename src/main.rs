use scaleway_provider::{init_logging, provider, serve};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting scaleway provider");
    serve(provider::new()?).await
}
