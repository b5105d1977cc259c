// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::models::PriceRecord;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("response is not valid JSON: {0}")]
    Syntax(#[source] serde_json::Error),
    #[error("response is neither an object with posts nor an array (object: {wrapped}; array: {bare})")]
    UnknownShape { wrapped: String, bare: String },
}

/// Which of the two accepted payload shapes matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// `{"posts": [...]}`
    Wrapped,
    /// `[...]`
    Bare,
}

#[derive(Debug)]
pub struct Decoded {
    pub shape: PayloadShape,
    pub records: Vec<PriceRecord>,
}

#[derive(Deserialize)]
struct PostsEnvelope {
    #[serde(default)]
    posts: Option<Vec<PriceRecord>>,
}

/// Decodes a response body, trying the wrapped object first and the bare
/// array second.
///
/// An object that parses but has no `posts` field yields an empty list.
pub fn decode_records(body: &[u8]) -> Result<Decoded, DecodeError> {
    let value: Value = serde_json::from_slice(body).map_err(DecodeError::Syntax)?;

    // serde accepts a sequence for a struct, so only objects may take the
    // wrapped path.
    let wrapped_err = if value.is_object() {
        match PostsEnvelope::deserialize(&value) {
            Ok(envelope) => {
                return Ok(Decoded {
                    shape: PayloadShape::Wrapped,
                    records: envelope.posts.unwrap_or_default(),
                })
            }
            Err(e) => e.to_string(),
        }
    } else {
        "not an object".to_string()
    };

    match Vec::<PriceRecord>::deserialize(&value) {
        Ok(records) => Ok(Decoded {
            shape: PayloadShape::Bare,
            records,
        }),
        Err(e) => Err(DecodeError::UnknownShape {
            wrapped: wrapped_err,
            bare: e.to_string(),
        }),
    }
}
