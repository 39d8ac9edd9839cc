//! Diesel models for the `characters` table.

use diesel::prelude::*;

use crate::models::UpstreamRecord;
use crate::schema;

/// Stored character row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::characters)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CharacterRecord {
    pub id: i64,
    pub name: Option<String>,
    /// The upstream JSON object, verbatim.
    pub payload: String,
    /// RFC 3339 timestamp of the fetch that stored this row.
    pub fetched_at: String,
}

impl CharacterRecord {
    /// Decode the stored payload back into an upstream record.
    pub fn to_upstream(&self) -> Option<UpstreamRecord> {
        serde_json::from_str(&self.payload)
            .ok()
            .and_then(UpstreamRecord::from_value)
    }
}

/// New character for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::characters)]
pub struct NewCharacter<'a> {
    pub id: i64,
    pub name: Option<&'a str>,
    pub payload: &'a str,
    pub fetched_at: &'a str,
}
