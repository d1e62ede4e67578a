//! Schema-pin persistence against the `schema_pins` table (spec.md §3
//! "Schema pin" is durable; §3 "Suspension entry" is not — it stays in
//! [`super::lifecycle::McpManager`]'s in-memory state).

use diesel::prelude::*;

use crate::database::{schema::schema_pins, DbPool};

use super::pin::SchemaPin;

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = schema_pins)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct SchemaPinRow {
    server_key: String,
    hash: String,
    tool_names_json: String,
    fingerprints_json: String,
    updated_at_ms: i64,
}

impl SchemaPinRow {
    fn from_pin(server_key: &str, pin: &SchemaPin, now_ms: i64) -> Option<Self> {
        Some(Self {
            server_key: server_key.to_string(),
            hash: pin.hash.clone(),
            tool_names_json: serde_json::to_string(&pin.tool_names).ok()?,
            fingerprints_json: serde_json::to_string(&pin.fingerprints).ok()?,
            updated_at_ms: now_ms,
        })
    }

    fn into_pin(self) -> Option<SchemaPin> {
        Some(SchemaPin {
            hash: self.hash,
            tool_names: serde_json::from_str(&self.tool_names_json).ok()?,
            fingerprints: serde_json::from_str(&self.fingerprints_json).ok()?,
        })
    }
}

/// Loads every persisted pin, keyed by server name.
pub fn load_all(pool: &DbPool) -> std::collections::HashMap<String, SchemaPin> {
    let Ok(mut conn) = pool.get() else {
        return Default::default();
    };
    let rows: Vec<(String, SchemaPinRow)> = match schema_pins::table
        .select((schema_pins::server_key, SchemaPinRow::as_select()))
        .load(&mut conn)
    {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load schema pins");
            return Default::default();
        }
    };
    rows.into_iter()
        .filter_map(|(key, row)| row.into_pin().map(|pin| (key, pin)))
        .collect()
}

/// Upserts one server's pin (spec.md §4.5 "record the pin").
pub fn save(pool: &DbPool, server_key: &str, pin: &SchemaPin, now_ms: i64) {
    let Ok(mut conn) = pool.get() else { return };
    let Some(row) = SchemaPinRow::from_pin(server_key, pin, now_ms) else {
        return;
    };
    if let Err(e) = diesel::replace_into(schema_pins::table)
        .values(&row)
        .execute(&mut conn)
    {
        tracing::warn!(server_key, error = %e, "failed to persist schema pin");
    }
}
