use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use release_cms::{api, config::Config, db, models::CreateReleaseInput};

const CLI_USER: &str = "cli";

#[derive(Parser)]
#[command(name = "release-cms")]
#[command(about = "Release-scoped content store with deploy and rollback")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port for HTTP API (overrides RELEASE_CMS_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Apply pending database migrations and exit
    Migrate,
    /// Manage releases
    Release {
        #[command(subcommand)]
        command: ReleaseCommands,
    },
}

#[derive(Subcommand)]
enum ReleaseCommands {
    /// List releases, newest first
    List,
    /// Create an OPEN release
    Create {
        name: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Close an OPEN release
    Close { id: Uuid },
    /// Deploy a CLOSED release
    Deploy { id: Uuid },
    /// Roll production back to a previously deployed release
    Rollback { id: Uuid },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "release_cms=debug,tower_http=debug".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn open_database(config: &Config) -> anyhow::Result<db::Database> {
    let db = match &config.db_path {
        Some(path) => db::Database::open(path.clone())?,
        None => db::Database::open_default()?,
    };
    db.migrate()?;
    Ok(db.with_conflict_gate(config.block_on_conflicts))
}

async fn serve(config: &Config, port: u16) -> anyhow::Result<()> {
    let db = open_database(config)?;

    if let Some(name) = &config.default_release {
        match db.ensure_open_release(name, "system") {
            Ok(Some(release)) => tracing::info!(release_id = %release.id, "Opened default release"),
            Ok(None) => {}
            Err(e) => tracing::warn!("Could not create default release: {}", e),
        }
    }

    let app = api::create_router(db);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("release-cms listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn release_command(config: &Config, command: ReleaseCommands) -> anyhow::Result<()> {
    use release_cms::models::{ReleaseStatus, UpdateReleaseInput};

    let db = open_database(config)?;
    match command {
        ReleaseCommands::List => print_json(&db.list_releases()?),
        ReleaseCommands::Create { name, description } => {
            print_json(&db.create_release(CreateReleaseInput { name, description }, CLI_USER)?)
        }
        ReleaseCommands::Close { id } => {
            let input = UpdateReleaseInput {
                status: Some(ReleaseStatus::Closed),
                ..Default::default()
            };
            print_json(&db.update_release(id, input)?)
        }
        ReleaseCommands::Deploy { id } => print_json(&db.deploy_release(id, CLI_USER)?),
        ReleaseCommands::Rollback { id } => print_json(&db.rollback_to_release(id, CLI_USER)?),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = Config::from_env();

    match cli.command {
        Some(Commands::Serve { port }) => serve(&config, port.unwrap_or(config.port)).await?,
        Some(Commands::Migrate) => {
            open_database(&config)?;
            tracing::info!("Migrations applied");
        }
        Some(Commands::Release { command }) => release_command(&config, command)?,
        None => serve(&config, config.port).await?,
    }

    Ok(())
}
