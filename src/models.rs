// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer};

/// One FOB price as published by the upstream API.
///
/// Identifier fields tolerate `null` or absence (they become empty strings);
/// the numeric fields stay optional and are checked before storage.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PriceRecord {
    #[serde(rename = "fecha", default, deserialize_with = "null_as_default")]
    pub date: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub circular: String,
    #[serde(rename = "posicion", default, deserialize_with = "null_as_default")]
    pub position: String,
    #[serde(rename = "precio", default)]
    pub price: Option<f64>,
    #[serde(rename = "mesDesde", default)]
    pub month_from: Option<i32>,
    #[serde(rename = "añoDesde", default)]
    pub year_from: Option<i32>,
    #[serde(rename = "mesHasta", default)]
    pub month_to: Option<i32>,
    #[serde(rename = "añoHasta", default)]
    pub year_to: Option<i32>,
}

/// A complete price, ready for the `precios_fob` table.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRow {
    pub date: NaiveDateTime,
    pub circular: String,
    pub position: String,
    pub price: f64,
    pub month_from: i32,
    pub year_from: i32,
    pub month_to: i32,
    pub year_to: i32,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
