// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

mod api;
mod config;
mod db;
mod decode;
mod ingest;
mod models;
mod validate;

use anyhow::Result;
use chrono::Local;
use dotenvy::dotenv;
use tracing::{info, subscriber};
use tracing_subscriber::FmtSubscriber;

use crate::api::FobClient;
use crate::config::Config;
use crate::ingest::IngestSettings;

const RULE: &str = "-------------------------------------------------------------";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let config = Config::from_env()?;

    let my_subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .finish();
    subscriber::set_global_default(my_subscriber)?;

    println!("{RULE}");
    println!("Starting FOB price import...");

    let pool = db::create_db_pool(config.db.connect_options()).await?;
    let client = FobClient::new(&config.api_url, config.http_timeout, config.retry)?;
    let settings = IngestSettings {
        epoch: config::epoch(),
        max_retries: config.max_retries,
    };

    let summary = ingest::run(&client, &pool, settings, Local::now().date_naive()).await?;

    info!(
        days = summary.days,
        days_failed = summary.days_failed,
        days_empty = summary.days_empty,
        incomplete = summary.incomplete,
        bad_date = summary.bad_date,
        duplicates = summary.duplicates,
        write_errors = summary.write_errors,
        "Run finished"
    );
    println!("Import finished. Rows inserted: {}", summary.inserted);
    println!("{RULE}");

    pool.close().await;
    Ok(())
}
