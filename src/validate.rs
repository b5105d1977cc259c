// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::models::{PriceRecord, PriceRow};

/// Format of the `fecha` field, e.g. `1993-01-04 00:00:00.000`.
pub const FECHA_FORMAT: &str = "%Y-%m-%d %H:%M:%S.%3f";

#[derive(Debug, Error)]
pub enum RowError {
    #[error("incomplete row (price or validity window missing)")]
    Incomplete,
    #[error("malformed date {fecha:?}: {source}")]
    BadDate {
        fecha: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// True when every field needed for storage is present.
pub fn is_complete(record: &PriceRecord) -> bool {
    record.price.is_some()
        && record.month_from.is_some()
        && record.year_from.is_some()
        && record.month_to.is_some()
        && record.year_to.is_some()
}

pub fn parse_fecha(fecha: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(fecha, FECHA_FORMAT)
}

impl TryFrom<PriceRecord> for PriceRow {
    type Error = RowError;

    /// Completeness is checked before the date, so a record missing both is
    /// reported as incomplete.
    fn try_from(record: PriceRecord) -> Result<Self, Self::Error> {
        let (Some(price), Some(month_from), Some(year_from), Some(month_to), Some(year_to)) = (
            record.price,
            record.month_from,
            record.year_from,
            record.month_to,
            record.year_to,
        ) else {
            return Err(RowError::Incomplete);
        };

        let date = parse_fecha(&record.date).map_err(|source| RowError::BadDate {
            fecha: record.date.clone(),
            source,
        })?;

        Ok(PriceRow {
            date,
            circular: record.circular,
            position: record.position,
            price,
            month_from,
            year_from,
            month_to,
            year_to,
        })
    }
}
