//! Basic example showing how to use sea-orm-query-tracing.
//!
//! Run with: cargo run --example basic

use sea_orm::{ConnectionTrait, Database, DbErr, Statement};
use sea_orm_query_tracing::prelude::*;
use tracing::Instrument;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn handle_request(db: &TracedConnection, user_id: i32) -> Result<(), DbErr> {
    // Statements below become children of the request span.
    let db = db.with_current_span();

    let stmt = Statement::from_sql_and_values(
        db.get_database_backend(),
        r#"SELECT "id", "name" FROM "users" WHERE "id" = $1"#,
        [user_id.into()],
    );
    let user = db.query_one(stmt).await?;
    tracing::info!(found = user.is_some(), "looked up user");

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,sea_orm_query_tracing=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/test".into());

    tracing::info!("Connecting to database...");

    let db = Database::connect(&database_url)
        .await?
        .with_tracing_config(TracingConfig::development().with_database_name("test"))
        .with_sql_vars_truncation(SqlVarsTruncation::new(256, 64));

    let request = tracing::info_span!("request", http.route = "/users/:id");
    handle_request(&db, 1).instrument(request).await?;

    Ok(())
}
