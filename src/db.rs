// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

use crate::models::PriceRow;

/// Connects to Postgres and checks the connection is usable.
///
/// One connection is enough: rows are checked and written one at a time.
pub async fn create_db_pool(options: PgConnectOptions) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .context("Could not connect to the database")?;

    Ok(pool)
}

/// Storage operations needed by the ingestion loop.
///
/// `exists` and `insert` are separate round-trips; nothing makes the pair
/// atomic.
#[async_trait]
pub trait PriceStore {
    /// Latest stored `date`, or `None` on an empty table.
    async fn latest_date(&self) -> Result<Option<NaiveDateTime>>;
    async fn exists(&self, date: NaiveDateTime, position: &str) -> Result<bool>;
    async fn insert(&self, row: &PriceRow) -> Result<()>;
}

#[async_trait]
impl PriceStore for PgPool {
    async fn latest_date(&self) -> Result<Option<NaiveDateTime>> {
        let (latest,) = sqlx::query_as::<_, (Option<NaiveDateTime>,)>(
            r#"
            SELECT MAX(date)::timestamp
            FROM precios_fob
            "#,
        )
        .fetch_one(self)
        .await?;

        Ok(latest)
    }

    async fn exists(&self, date: NaiveDateTime, position: &str) -> Result<bool> {
        let (exists,) = sqlx::query_as::<_, (bool,)>(
            r#"
            SELECT EXISTS(
                SELECT 1
                FROM precios_fob
                WHERE date = $1 AND posicion = $2
            )
            "#,
        )
        .bind(date)
        .bind(position)
        .fetch_one(self)
        .await?;

        Ok(exists)
    }

    async fn insert(&self, row: &PriceRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO precios_fob
                (date, circular, posicion, precio, mes_desde, ano_desde, mes_hasta, ano_hasta)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(row.date)
        .bind(&row.circular)
        .bind(&row.position)
        .bind(row.price)
        .bind(row.month_from)
        .bind(row.year_from)
        .bind(row.month_to)
        .bind(row.year_to)
        .execute(self)
        .await?;

        Ok(())
    }
}
