// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::postgres::PgConnectOptions;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

use crate::api::{RetryPolicy, DEFAULT_API_URL};

/// Earliest day the upstream has prices for.
pub fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1993, 1, 4).unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone)]
pub struct DbSettings {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl DbSettings {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db: DbSettings,
    pub api_url: String,
    pub max_retries: u32,
    pub retry: RetryPolicy,
    pub http_timeout: Duration,
    pub log_level: Level,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| lookup(key).with_context(|| format!("{key} must be set"));

        let db = DbSettings {
            user: required("POSTGRES_USER")?,
            password: required("POSTGRES_PASSWORD")?,
            host: required("POSTGRES_HOST")?,
            port: parse_or(&lookup, "POSTGRES_PORT", 5432)?,
            database: required("POSTGRES_DB")?,
        };

        Ok(Self {
            db,
            api_url: lookup("FOB_API_URL")
                .filter(|url| !url.is_empty())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            max_retries: parse_or(&lookup, "FOB_MAX_RETRIES", 3)?,
            retry: RetryPolicy {
                step: Duration::from_secs(parse_or(&lookup, "FOB_RETRY_STEP_SECS", 2)?),
            },
            http_timeout: Duration::from_secs(parse_or(&lookup, "FOB_HTTP_TIMEOUT_SECS", 60)?),
            log_level: parse_or(&lookup, "FOB_LOG_LEVEL", Level::INFO)?,
        })
    }
}

/// Parses `key` when set and non-empty, otherwise falls back to `default`.
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value {raw:?} for {key}: {e}")),
        None => Ok(default),
    }
}
