use clap::Parser;
use trail_service::{
    repository::connect_pool,
    seed::{self, SCHEMA_SQL, SeedOptions},
};

/// Populates the TrailService database with reference and sample data.
#[derive(Parser)]
#[command(name = "seed")]
#[command(about = "Seed the TrailService database (geography, features, users, trails, reviews)")]
#[command(version)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", help = "ADO.NET connection string for SQL Server")]
    database_url: String,

    #[arg(long, help = "Create the CW2 schema and tables before seeding")]
    schema: bool,

    #[arg(long, help = "Delete all existing rows before seeding")]
    reset: bool,

    #[arg(long, help = "E-mail of the seeded administrator (must exist at the Authenticator API)")]
    admin_email: Option<String>,

    #[arg(long, help = "Username of the seeded administrator")]
    admin_username: Option<String>,
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trail_service=info".into()),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), trail_service::error::RepoError> {
    let pool = connect_pool(&cli.database_url, 1).await?;

    if cli.schema {
        let batches = seed::apply_schema(&pool, SCHEMA_SQL).await?;
        println!("Applied schema ({batches} batches)");
    }

    if cli.reset {
        let cleared = seed::reset(&pool).await?;
        println!("Cleared existing data:\n{cleared}");
    }

    let options = SeedOptions {
        admin_email: cli.admin_email,
        admin_username: cli.admin_username,
    };
    let report = seed::seed(&pool, &options).await?;
    println!("Inserted rows:\n{report}");

    Ok(())
}
