//! Catalog DDL for the strata SQLite store.
//!
//! SQLite has one namespace per database file, so a `(schema, name)` pair is
//! stored as the single table name `schema.name`. The catalog tables below
//! track what SQLite itself cannot: declared schemas, sequences and
//! materialised view definitions.

/// Connection-level setup plus catalog tables; idempotent.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS strata_schemas (
    name        TEXT PRIMARY KEY,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS strata_sequences (
    name        TEXT PRIMARY KEY,      -- qualified 'schema.name'
    last_value  INTEGER NOT NULL DEFAULT 0
);

-- A row exists only once the view table is fully built; it is written in
-- the same transaction as the CREATE TABLE AS.
CREATE TABLE IF NOT EXISTS strata_materialized_views (
    name          TEXT PRIMARY KEY,    -- qualified 'schema.name'
    definition    TEXT NOT NULL,       -- SELECT used to (re)compute it
    refreshed_at  TEXT NOT NULL
);

PRAGMA user_version = 1;
";
