use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use passaporte::cpf;
use passaporte::routes::auth::create_admin_account;

#[derive(Parser, Debug)]
#[command(author, version, about = "passaporte portal operations tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Ensure the reserved admin account exists (idempotent)
    InitAdmin {
        /// Bootstrap password; falls back to ADMIN_BOOTSTRAP_PASSWORD
        #[arg(long)]
        password: Option<String>,
    },
    /// Print the allow-list
    ListCpfs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; when running in Docker the binary CWD may differ,
    // so fall back to the crate-local `.env` using CARGO_MANIFEST_DIR.
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::InitAdmin { password } => {
            let password = password
                .or_else(|| std::env::var("ADMIN_BOOTSTRAP_PASSWORD").ok())
                .context("pass --password or set ADMIN_BOOTSTRAP_PASSWORD")?;

            let pool = get_pool().await?;
            let existing: Option<Vec<u8>> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
                .bind(cpf::ADMIN_EMAIL)
                .fetch_optional(&pool)
                .await?;

            match existing {
                Some(_) => println!("Admin user already exists ({})", cpf::ADMIN_EMAIL),
                None => {
                    let uid = create_admin_account(&pool, &password).await?;
                    println!("Admin user created: {} ({})", uid, cpf::ADMIN_EMAIL);
                }
            }
        }
        Commands::ListCpfs => {
            let pool = get_pool().await?;
            let rows = sqlx::query(
                "SELECT cpf, coalesce(email, '') AS email, has_account, blocked FROM authorized_cpfs ORDER BY added_at DESC",
            )
            .fetch_all(&pool)
            .await?;

            println!("{:<16} {:<32} {:<8} {}", "CPF", "Login", "Conta", "Status");
            for row in rows {
                let cpf_value: String = row.try_get("cpf")?;
                let email: String = row.try_get("email")?;
                let has_account: bool = row.try_get("has_account")?;
                let blocked: bool = row.try_get("blocked")?;
                println!(
                    "{:<16} {:<32} {:<8} {}",
                    cpf::format_cpf(&cpf_value),
                    email,
                    if has_account { "sim" } else { "não" },
                    if blocked { "bloqueado" } else { "ativo" }
                );
            }
        }
    }

    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let db_applied = sqlx::query(
        "SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'",
    )
    .fetch_optional(pool)
    .await?;
    let applied_versions: HashSet<i64> = if db_applied.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter()
            .filter_map(|row| row.try_get::<i64, _>("version").ok())
            .collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let version = migration.version;
        let applied = applied_versions.contains(&version);
        let status = if applied { "applied" } else { "pending" };
        let desc = migration.description.as_ref().trim();
        let name = if !desc.is_empty() { desc } else { "unknown" };
        println!("{:<8} {:<20} {}", status, version, name);
    }

    Ok(())
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Try local ./migrations first (when running from repo root). If that
    // doesn't exist (common in containers where CWD differs), fall back to
    // the crate-local migrations folder determined by CARGO_MANIFEST_DIR.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let migrator_path_display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", migrator_path_display))
}
