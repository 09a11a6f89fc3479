//! Projection of nested saved-track payloads into the flat dataset columns.
//!
//! A missing or mistyped field fails the whole page with `MalformedRecord`
//! instead of dropping the row.

use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackRow {
    pub track_id: String,
    pub track_name: String,
    pub track_type: String,
    pub duration_ms: i64,
    pub track_number: i64,
    pub available_markets: Vec<String>,
    pub popularity: i64,
    pub album_id: String,
    pub album_name: String,
    pub album_type: String,
    pub album_release_date: String,
    pub added_at: String,
}

pub fn normalize_page(items: &[Value]) -> Result<Vec<TrackRow>> {
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| normalize_item(item).map_err(|field| malformed(idx, &field)))
        .collect()
}

fn malformed(idx: usize, field: &str) -> SyncError {
    SyncError::MalformedRecord(format!("item {idx}: missing or invalid field `{field}`"))
}

// Errors carry the dotted path of the offending field.
fn normalize_item(item: &Value) -> std::result::Result<TrackRow, String> {
    Ok(TrackRow {
        track_id: string_at(item, "track.id")?,
        track_name: string_at(item, "track.name")?,
        track_type: string_at(item, "track.type")?,
        duration_ms: int_at(item, "track.duration_ms")?,
        track_number: int_at(item, "track.track_number")?,
        available_markets: string_list_at(item, "track.available_markets")?,
        popularity: int_at(item, "track.popularity")?,
        album_id: string_at(item, "track.album.id")?,
        album_name: string_at(item, "track.album.name")?,
        album_type: string_at(item, "track.album.type")?,
        album_release_date: string_at(item, "track.album.release_date")?,
        added_at: string_at(item, "added_at")?,
    })
}

fn lookup<'a>(item: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(item, |v, key| v.get(key))
}

fn string_at(item: &Value, path: &str) -> std::result::Result<String, String> {
    lookup(item, path)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| path.to_string())
}

fn int_at(item: &Value, path: &str) -> std::result::Result<i64, String> {
    lookup(item, path)
        .and_then(Value::as_i64)
        .ok_or_else(|| path.to_string())
}

fn string_list_at(item: &Value, path: &str) -> std::result::Result<Vec<String>, String> {
    lookup(item, path)
        .and_then(Value::as_array)
        .ok_or_else(|| path.to_string())?
        .iter()
        .map(|v| v.as_str().map(str::to_string).ok_or_else(|| path.to_string()))
        .collect()
}
