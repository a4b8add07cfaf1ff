//! Creates a user profile and prints a freshly generated API key.
//!
//! Usage: `issue-api-key <email> [credits_total]`

use anyhow::Context;
use dotenvy::dotenv;
use std::env;

use prospect_engine::auth::{generate_api_key, hash_api_key};
use prospect_engine::credits::DEFAULT_CREDITS_TOTAL;
use prospect_engine::db::Database;
use prospect_engine::store::{PgStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let mut args = env::args().skip(1);
    let email = args
        .next()
        .context("usage: issue-api-key <email> [credits_total]")?;
    let credits_total = match args.next() {
        Some(raw) => raw
            .parse::<i32>()
            .with_context(|| format!("credits_total must be an integer, got '{}'", raw))?,
        None => DEFAULT_CREDITS_TOTAL,
    };
    anyhow::ensure!(credits_total >= 0, "credits_total must not be negative");

    let database_url = env::var("DATABASE_URL")
        .or_else(|_| env::var("DB_URL"))
        .context("DATABASE_URL must be set")?;
    let db = Database::new(&database_url).await?;
    let store = PgStore::new(db.pool);

    let api_key = generate_api_key();
    let user = store
        .create_user(&email, credits_total, &hash_api_key(&api_key))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create user {}: {}", email, e))?;

    tracing::info!(
        "Created user {} ({}) with {} credits",
        user.id,
        user.email,
        user.credits_total
    );

    println!("{}", api_key);
    Ok(())
}
