//! Applies the secure core schema to the configured database.

use clap::Parser;
use helios_secure_core::store::{RowStore, open_store};
use helios_secure_core::{CoreConfig, init_logging};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CoreConfig::parse();
    init_logging(&config.log_level);

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    info!(
        database = %config.database_url,
        dialect = %config.dialect,
        "Applying secure core schema"
    );

    let store = open_store(&config)
        .await
        .map_err(|e| anyhow::anyhow!("Schema migration failed: {}", e))?;

    info!(
        backend = store.backend_name(),
        schema_version = store.schema_version(),
        "Schema is up to date"
    );

    Ok(())
}
