use std::sync::Arc;

use tracing::{error, info};

use cumulus::{AccountService, Config, Database, FileService, FileStorage, UserLocks};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = cumulus::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        cumulus::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = run(config).await {
        error!("Startup failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> cumulus::Result<()> {
    config.validate()?;

    let db = Database::open(&config.database.path).await?;
    let storage = Arc::new(
        FileStorage::new(&config.storage.root)?.with_stream_settings(
            config.storage.archive_chunk_size,
            config.storage.archive_buffer_chunks,
        ),
    );

    let locks = UserLocks::new();
    let _files = FileService::new(db.clone(), storage.clone()).with_locks(locks.clone());
    let accounts = AccountService::new(db, storage, &config.storage).with_locks(locks);

    info!("Cumulus - personal cloud storage");
    info!(
        "Storage root {}, {} registered account(s)",
        config.storage.root,
        accounts.list_emails().await?.len()
    );
    Ok(())
}
