//! PostgreSQL schema definitions and migrations.

use crate::error::{store_error, CoreError, CoreResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema.
pub async fn initialize_schema(client: &deadpool_postgres::Client) -> CoreResult<()> {
    let current_version = get_schema_version(client).await?;

    if current_version == 0 {
        create_schema_v1(client).await?;
        set_schema_version(client, 1).await?;
        migrate_schema(client, 1).await?;
    } else if current_version < SCHEMA_VERSION {
        migrate_schema(client, current_version).await?;
    }

    Ok(())
}

async fn get_schema_version(client: &deadpool_postgres::Client) -> CoreResult<i32> {
    client
        .execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            )",
            &[],
        )
        .await
        .map_err(|e| pg_error(format!("Failed to create schema_version table: {}", e)))?;

    let row = client
        .query_opt("SELECT version FROM schema_version LIMIT 1", &[])
        .await
        .map_err(|e| pg_error(format!("Failed to query schema version: {}", e)))?;

    Ok(row.map(|r| r.get::<_, i32>(0)).unwrap_or(0))
}

async fn set_schema_version(client: &deadpool_postgres::Client, version: i32) -> CoreResult<()> {
    client
        .execute("DELETE FROM schema_version", &[])
        .await
        .map_err(|e| pg_error(format!("Failed to clear schema_version: {}", e)))?;

    client
        .execute(
            "INSERT INTO schema_version (version) VALUES ($1)",
            &[&version],
        )
        .await
        .map_err(|e| pg_error(format!("Failed to set schema_version: {}", e)))?;

    Ok(())
}

/// Create the initial tables (version 1).
async fn create_schema_v1(client: &deadpool_postgres::Client) -> CoreResult<()> {
    let tables = [
        "CREATE TABLE IF NOT EXISTS patient_identifiers (
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            identifier_type TEXT NOT NULL,
            identifier_value TEXT NOT NULL,
            is_primary BIGINT NOT NULL DEFAULT 0,
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
            is_deleted BIGINT NOT NULL DEFAULT 0,
            deleted_at TEXT
        )",
        "CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            logged_at TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            action TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            subject_id TEXT,
            success BIGINT NOT NULL,
            error_message TEXT,
            fields_accessed TEXT,
            ip_address TEXT,
            user_agent TEXT
        )",
        "CREATE TABLE IF NOT EXISTS clinical_records (
            id TEXT PRIMARY KEY,
            version BIGINT NOT NULL DEFAULT 1,
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
            is_deleted BIGINT NOT NULL DEFAULT 0,
            deleted_at TEXT
        )",
        "CREATE TABLE IF NOT EXISTS medication_orders (
            id TEXT PRIMARY KEY,
            version BIGINT NOT NULL DEFAULT 1,
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
            is_deleted BIGINT NOT NULL DEFAULT 0,
            deleted_at TEXT
        )",
    ];

    for sql in &tables {
        client
            .execute(*sql, &[])
            .await
            .map_err(|e| pg_error(format!("Failed to create v1 tables: {}", e)))?;
    }

    Ok(())
}

async fn migrate_schema(client: &deadpool_postgres::Client, from_version: i32) -> CoreResult<()> {
    let mut version = from_version;

    while version < SCHEMA_VERSION {
        match version {
            1 => migrate_v1_to_v2(client).await?,
            _ => {
                return Err(pg_error(format!("Unknown schema version: {}", version)));
            }
        }
        version += 1;
        set_schema_version(client, version).await?;
        tracing::debug!(version, "Migrated PostgreSQL schema");
    }

    Ok(())
}

/// v1 -> v2: lookup indexes and append-only audit triggers.
async fn migrate_v1_to_v2(client: &deadpool_postgres::Client) -> CoreResult<()> {
    let statements = [
        "CREATE INDEX IF NOT EXISTS idx_identifiers_subject ON patient_identifiers(subject_id, is_deleted)",
        "CREATE INDEX IF NOT EXISTS idx_audit_subject ON audit_logs(subject_id, logged_at)",
        "CREATE INDEX IF NOT EXISTS idx_audit_actor ON audit_logs(actor_id, logged_at)",
        "CREATE INDEX IF NOT EXISTS idx_audit_logged_at ON audit_logs(logged_at)",
        "CREATE INDEX IF NOT EXISTS idx_clinical_records_patient ON clinical_records(patient_id, is_deleted)",
        "CREATE INDEX IF NOT EXISTS idx_medication_orders_patient ON medication_orders(patient_id, is_deleted)",
        "CREATE OR REPLACE FUNCTION audit_logs_append_only() RETURNS TRIGGER AS $$
        BEGIN
            RAISE EXCEPTION 'audit_logs is append-only';
        END
        $$ LANGUAGE plpgsql",
        "DROP TRIGGER IF EXISTS audit_logs_append_only ON audit_logs",
        "CREATE TRIGGER audit_logs_append_only
            BEFORE UPDATE OR DELETE ON audit_logs
            FOR EACH ROW EXECUTE FUNCTION audit_logs_append_only()",
    ];

    for sql in &statements {
        client
            .execute(*sql, &[])
            .await
            .map_err(|e| pg_error(format!("Migration v1->v2 failed: {}", e)))?;
    }

    Ok(())
}

fn pg_error(message: String) -> CoreError {
    store_error("postgres", message)
}
