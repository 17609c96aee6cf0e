//! Applies `migrations/V*.sql` in name order, each at most once.
//!
//! `migrate --status` lists the files and whether they have been applied.

use dotenvy::dotenv;
use glob::glob;
use std::fs;
use std::path::Path;
use tokio_postgres::NoTls;

const MIGRATIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version VARCHAR(100) PRIMARY KEY,
    checksum VARCHAR(64) NOT NULL,
    installed_on TIMESTAMPTZ NOT NULL DEFAULT NOW()
)";

fn checksum(sql: &str) -> String {
    use sha2::{Digest, Sha256};
    format!("{:x}", Sha256::digest(sql.as_bytes()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenv();
    let status_only = std::env::args().any(|a| a == "--status");

    let database_url = std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set")?;
    let (mut client, connection) = tokio_postgres::connect(&database_url, NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("connection error: {}", e);
        }
    });

    client.batch_execute(MIGRATIONS_TABLE).await?;

    let mut migrations: Vec<String> = glob("migrations/V*.sql")?
        .filter_map(Result::ok)
        .map(|path| path.to_string_lossy().to_string())
        .collect();
    // V1__, V2__ ... sort correctly as long as versions share a width
    migrations.sort();

    if migrations.is_empty() {
        println!("No migration files found in migrations/");
        return Ok(());
    }

    for file in migrations {
        let name = Path::new(&file)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(&file)
            .to_string();
        let sql = fs::read_to_string(&file)?;
        let sum = checksum(&sql);

        let applied = client
            .query_opt("SELECT checksum FROM schema_migrations WHERE version = $1", &[&name])
            .await?
            .map(|row| row.get::<_, String>(0));

        match applied {
            Some(recorded) => {
                if recorded != sum {
                    eprintln!("Warning: {} changed after it was applied", name);
                }
                println!("applied  {}", name);
                continue;
            }
            None if status_only => {
                println!("pending  {}", name);
                continue;
            }
            None => {}
        }

        println!("Applying migration: {}", name);
        let txn = client.transaction().await?;
        txn.batch_execute(&sql).await?;
        txn.execute(
            "INSERT INTO schema_migrations (version, checksum) VALUES ($1, $2)",
            &[&name, &sum],
        )
        .await?;
        txn.commit().await?;
        println!("Applied: {}", name);
    }

    if !status_only {
        println!("Migrations complete");
    }
    Ok(())
}
