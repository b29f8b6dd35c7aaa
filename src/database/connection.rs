use mongodb::{bson::doc, Client, Database};

use crate::config::AppConfig;
use crate::errors::{AppError, Result};

const EXPECTED_COLLECTIONS: [&str; 5] = [
    "stints",
    "applications",
    "payment_intents",
    "disputes",
    "payouts",
];

pub async fn get_db_client(config: &AppConfig) -> Result<Database> {
    let client = Client::with_uri_str(&config.database_url)
        .await
        .map_err(|e| AppError::configuration(format!("Failed to connect to MongoDB: {}", e)))?;

    let db = client.database(&config.database_name);

    // Verify the database answers before serving traffic.
    db.run_command(doc! { "ping": 1 }).await?;

    match db.list_collection_names().await {
        Ok(collections) => {
            tracing::info!("✅ Connected to database: {}", config.database_name);
            for expected in EXPECTED_COLLECTIONS {
                if !collections.iter().any(|c| c == expected) {
                    tracing::info!("📂 Collection '{}' will be created on first write", expected);
                }
            }
        }
        Err(e) => {
            tracing::warn!(
                "⚠️ Could not list collections in '{}': {}",
                config.database_name,
                e
            );
        }
    }

    Ok(db)
}
