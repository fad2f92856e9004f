//! SQLite schema definitions and migrations.

use rusqlite::Connection;

use crate::error::{store_error, CoreResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> CoreResult<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        create_schema_v1(conn)?;
        set_schema_version(conn, 1)?;
        migrate_schema(conn, 1)?;
    } else if current_version < SCHEMA_VERSION {
        migrate_schema(conn, current_version)?;
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> CoreResult<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )
    .map_err(|e| sqlite_error("Failed to create schema_version table", e))?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> CoreResult<()> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| sqlite_error("Failed to clear schema_version", e))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
        .map_err(|e| sqlite_error("Failed to set schema_version", e))?;
    Ok(())
}

fn sqlite_error(context: &str, err: rusqlite::Error) -> crate::error::CoreError {
    store_error("sqlite", format!("{}: {}", context, err))
}

/// Create the initial tables (version 1).
fn create_schema_v1(conn: &Connection) -> CoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS patient_identifiers (
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            identifier_type TEXT NOT NULL,
            identifier_value TEXT NOT NULL,
            is_primary INTEGER NOT NULL DEFAULT 0,
            valid_from TEXT,
            valid_to TEXT,
            issuer_name TEXT,
            issuer_code TEXT,
            verification_status TEXT NOT NULL DEFAULT 'unverified',
            verified_at TEXT,
            verified_by TEXT,
            created_at TEXT NOT NULL,
            created_by TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            updated_by TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT
        );

        CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            logged_at TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            action TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            subject_id TEXT,
            success INTEGER NOT NULL,
            error_message TEXT,
            fields_accessed TEXT,
            ip_address TEXT,
            user_agent TEXT
        );

        CREATE TABLE IF NOT EXISTS clinical_records (
            id TEXT PRIMARY KEY,
            version INTEGER NOT NULL DEFAULT 1,
            patient_id TEXT NOT NULL,
            encounter_id TEXT,
            record_type TEXT NOT NULL,
            status TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            created_by TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            updated_by TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT
        );

        CREATE TABLE IF NOT EXISTS medication_orders (
            id TEXT PRIMARY KEY,
            version INTEGER NOT NULL DEFAULT 1,
            patient_id TEXT NOT NULL,
            prescriber_id TEXT NOT NULL,
            medication_code TEXT NOT NULL,
            medication_name TEXT NOT NULL,
            dosage TEXT NOT NULL,
            route TEXT NOT NULL,
            frequency TEXT NOT NULL,
            status TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT,
            notes TEXT,
            created_at TEXT NOT NULL,
            created_by TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            updated_by TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT
        );",
    )
    .map_err(|e| sqlite_error("Failed to create v1 tables", e))
}

fn migrate_schema(conn: &Connection, from_version: i32) -> CoreResult<()> {
    let mut version = from_version;
    while version < SCHEMA_VERSION {
        match version {
            1 => migrate_v1_to_v2(conn)?,
            _ => {}
        }
        version += 1;
        set_schema_version(conn, version)?;
        tracing::debug!(version, "Migrated SQLite schema");
    }
    Ok(())
}

/// Version 2: lookup indexes and append-only audit triggers.
fn migrate_v1_to_v2(conn: &Connection) -> CoreResult<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_identifiers_subject
            ON patient_identifiers(subject_id, is_deleted);
        CREATE INDEX IF NOT EXISTS idx_audit_subject
            ON audit_logs(subject_id, logged_at);
        CREATE INDEX IF NOT EXISTS idx_audit_actor
            ON audit_logs(actor_id, logged_at);
        CREATE INDEX IF NOT EXISTS idx_audit_logged_at
            ON audit_logs(logged_at);
        CREATE INDEX IF NOT EXISTS idx_clinical_records_patient
            ON clinical_records(patient_id, is_deleted);
        CREATE INDEX IF NOT EXISTS idx_medication_orders_patient
            ON medication_orders(patient_id, is_deleted);

        CREATE TRIGGER IF NOT EXISTS audit_logs_no_update
            BEFORE UPDATE ON audit_logs
        BEGIN
            SELECT RAISE(ABORT, 'audit_logs is append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS audit_logs_no_delete
            BEFORE DELETE ON audit_logs
        BEGIN
            SELECT RAISE(ABORT, 'audit_logs is append-only');
        END;",
    )
    .map_err(|e| sqlite_error("Failed to migrate schema to v2", e))
}
