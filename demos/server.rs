//! Example server: settings from env (`BACKEND`, `DATABASE_URL`, ...), resources from
//! `RESOURCES_PATH` (default `demos/resources.json`).

use restgen::{load_resources, ApiBuilder, Callback, Payload, Settings};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("restgen=info".parse()?))
        .init();

    let settings = Settings::from_env()?;
    let path = std::env::var("RESOURCES_PATH").unwrap_or_else(|_| "demos/resources.json".into());
    let resources = load_resources(&path)?;

    let api = ApiBuilder::from_settings(settings)?
        .resources(resources)?
        .on(
            "after_fetch_item",
            Callback::sync(|ctx, payload| {
                if let Payload::Document(doc) = payload {
                    tracing::debug!(resource = %ctx.resource, fields = doc.len(), "served item");
                }
                Ok(())
            }),
        )?
        .build()?;

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = TcpListener::bind(&addr).await?;
    api.serve(listener).await?;
    Ok(())
}
