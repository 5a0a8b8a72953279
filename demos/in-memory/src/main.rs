use std::time::Duration;

use async_trait::async_trait;
use offload::prelude::*;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[tokio::main]
pub async fn main() -> Result<(), OffloadError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("offload=debug")),
        )
        .init();

    let trigger = InProcessTrigger::new();
    let process = BackgroundProcess::builder("import_products", ImportProducts)
        .with_trigger(trigger.clone())
        .with_config(
            Config::default()
                .with_time_limit(Some(Duration::from_millis(250)))
                .with_item_delay(Duration::from_millis(20)),
        )
        .build();
    process.register();
    process.on_completed(|identifier| println!("{identifier} finished"));
    process.on_paused(|identifier| println!("{identifier} paused"));
    process.on_resumed(|identifier| println!("{identifier} resumed"));

    for page in 0..3 {
        let key = process
            .queue()
            .extend((0..10).map(|row| Import::Fetch(page * 10 + row)))
            .save()
            .await?;
        println!("Queued page {page} as {key:?}");
    }
    process.dispatch().await?;

    tokio::time::sleep(Duration::from_millis(400)).await;
    process.pause().await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    println!(
        "Paused with {} batches still queued",
        process.batches(None).await?.len()
    );

    process.resume().await?;
    trigger.wait_idle().await;
    println!("Queue empty: {}", !process.is_queued().await?);

    process.deregister();
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Import {
    Fetch(u32),
    Store(u32),
}

struct ImportProducts;

#[async_trait]
impl Task for ImportProducts {
    type Item = Import;

    async fn execute(&self, item: Self::Item) -> TaskResult<Self::Item> {
        match item {
            Import::Fetch(row) => {
                tokio::time::sleep(Duration::from_millis(10)).await;
                TaskResult::Requeue(Import::Store(row))
            }
            Import::Store(row) => {
                println!("Stored product {row}");
                TaskResult::Done
            }
        }
    }
}
