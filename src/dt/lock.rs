//! Row lock keys. A lock key names the rows a branch holds for the lifetime of
//! its global transaction, in the form `table:pk1,pk2`. Composite primary key
//! values are joined with `_`, and multiple tables are separated by `;`.

use super::image::TableRecords;
use crate::error::{Error, Result};
use crate::sql::types::Value;

use std::collections::BTreeSet;

pub const TABLE_SEPARATOR: char = ';';
pub const TABLE_PK_SEPARATOR: char = ':';
pub const ROW_SEPARATOR: char = ',';
pub const COMPOSITE_KEY_SEPARATOR: char = '_';

/// Builds the lock key of an image. Rows are deduplicated and ordered by
/// primary key value, so two images of the same physical rows yield the same
/// key regardless of row order. Errors if any row has no complete primary key.
pub fn build_lock_key(image: &TableRecords) -> Result<String> {
    if image.primary_keys.is_empty() {
        return Err(Error::Value(format!(
            "table {} has no primary key, can't build lock key",
            image.table_name
        )));
    }
    let keys: BTreeSet<Vec<Value>> = image.primary_key_values()?.into_iter().collect();
    let rows = keys
        .iter()
        .map(|key| {
            key.iter()
                .map(|v| v.to_key_string())
                .collect::<Vec<_>>()
                .join(&COMPOSITE_KEY_SEPARATOR.to_string())
        })
        .collect::<Vec<_>>()
        .join(&ROW_SEPARATOR.to_string());
    Ok(format!("{}{}{}", image.table_name, TABLE_PK_SEPARATOR, rows))
}

/// Splits a lock key into individual `table:pk` row keys, as a coordinator's
/// lock table stores them.
pub fn split_row_keys(lock_key: &str) -> Result<Vec<String>> {
    let mut row_keys = Vec::new();
    for table_keys in lock_key.split(TABLE_SEPARATOR).filter(|s| !s.is_empty()) {
        let (table, pks) = table_keys
            .split_once(TABLE_PK_SEPARATOR)
            .ok_or_else(|| Error::Value(format!("Invalid lock key {}", lock_key)))?;
        for pk in pks.split(ROW_SEPARATOR).filter(|s| !s.is_empty()) {
            row_keys.push(format!("{}{}{}", table, TABLE_PK_SEPARATOR, pk));
        }
    }
    Ok(row_keys)
}
