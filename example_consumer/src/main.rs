//! Example consumer: declares resources in code and serves them from the in-memory store.
//!
//! Run from repo root: `cargo run -p example-consumer`

use restgen::{
    ApiBuilder, AppError, Callback, Field, MemoryStore, Method, Model, Payload, Resource, Settings,
};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;

fn people() -> Result<Resource, restgen::ConfigError> {
    Resource::builder(
        Model::new("People")
            .field(Field::string("name").required().unique())
            .field(Field::integer("age"))
            .field(Field::string("email")),
    )
    .response_model(
        Model::new("PeopleOut")
            .field(Field::string("name"))
            .field(Field::integer("age")),
    )
    .resource_methods([Method::Get, Method::Post])
    .item_methods([Method::Get, Method::Patch, Method::Delete])
    .alt_id("name")
    .build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("restgen=info")),
        )
        .init();

    let api = ApiBuilder::new(Settings::from_env()?, Arc::new(MemoryStore::new()))
        .resource(people()?)?
        .on(
            "before_create_items_people",
            Callback::sync(|_, payload| {
                if let Payload::Documents(docs) = payload {
                    for doc in docs.iter_mut() {
                        doc.entry("age").or_insert(json!(0));
                    }
                }
                Ok(())
            }),
        )?
        .on(
            "before_DELETE_people",
            Callback::sync(|_, _| Err(AppError::Forbidden("people are read only".into()))),
        )?
        .build()?;

    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    tracing::info!("example consumer listening on http://{}", listener.local_addr()?);
    api.serve(listener).await?;
    Ok(())
}
