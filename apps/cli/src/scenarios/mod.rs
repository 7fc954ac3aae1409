//! Demonstration scenarios, each wiring the policies to a simulated dependency

pub mod api;
pub mod database;
pub mod notify;
pub mod queue;

use crate::settings::Settings;

const DIVIDER: &str = "\n---------------------------------------------\n";

/// Run every scenario in order
pub async fn run_all(settings: &Settings, seed: u64) -> anyhow::Result<()> {
    api::run(&settings.api).await?;
    println!("{DIVIDER}");
    database::run(&settings.database, seed).await?;
    println!("{DIVIDER}");
    queue::run(&settings.queue, seed).await?;
    println!("{DIVIDER}");
    notify::run(&settings.notify).await
}
