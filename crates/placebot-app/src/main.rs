//! placebot application binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Initialize tracing
//! 3. Build the completion client and session registry
//! 4. Run the selected command: HTTP API, interactive chat, one-shot
//!    question, schema dump, or database provisioning

mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use placebot_api::state::AppState;
use placebot_chat::{ChatError, SessionRegistry};
use placebot_core::config::PlacebotConfig;
use placebot_llm::{CompletionService, HttpCompletionClient};
use placebot_storage::{seed_demo_data, Database, DatabaseOptions};

use cli::{CliArgs, Command};

/// How often idle sessions are swept while serving.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = PlacebotConfig::load_or_default(&config_file);
    if let Some(path) = args.resolve_database() {
        config.database.path = path;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }

    // Tracing. RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting placebot v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), database = %config.database.path, "Configuration resolved");
    config.validate()?;

    match &args.command {
        Command::InitDb { no_seed } => init_db(&config, *no_seed),
        Command::Schema => {
            let registry = build_registry(&config)?;
            println!("{}", registry.schema().await?);
            Ok(())
        }
        Command::Ask { question } => ask(&config, &question.join(" ")).await,
        Command::Chat => chat(&config).await,
        Command::Serve { .. } => {
            config.server.port = args.resolve_port(config.server.port);
            serve(config).await
        }
    }
}

fn build_registry(config: &PlacebotConfig) -> Result<SessionRegistry, Box<dyn std::error::Error>> {
    let client = HttpCompletionClient::from_config(&config.completion)?;
    tracing::info!(
        provider = %client.provider(),
        model = client.model(),
        endpoint = %client.endpoint(),
        "Completion client ready"
    );
    let service: Arc<dyn CompletionService> = Arc::new(client);
    Ok(SessionRegistry::new(config.clone(), service))
}

/// Create the schema (and demo data unless `no_seed`).
fn init_db(config: &PlacebotConfig, no_seed: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = Path::new(&config.database.path);
    let db = Database::create(path, DatabaseOptions::from(&config.database))?;
    tracing::info!(path = %path.display(), "Placement schema ready");

    if no_seed {
        println!("Created placement schema at {}", path.display());
        return Ok(());
    }

    let report = db.with_conn(seed_demo_data)?;
    if report.is_empty() {
        println!("{} already holds data; nothing seeded", path.display());
    } else {
        println!(
            "Seeded {}: {} departments, {} students, {} companies, {} placements",
            path.display(),
            report.departments,
            report.students,
            report.companies,
            report.placements
        );
    }
    Ok(())
}

/// One turn, answer on stdout.
async fn ask(config: &PlacebotConfig, question: &str) -> Result<(), Box<dyn std::error::Error>> {
    let registry = build_registry(config)?;
    let session = registry.create()?;
    let reply = session.submit(question).await?;
    if let Some(sql) = &reply.sql {
        tracing::debug!(sql = %sql, "Executed query");
    }
    println!("{}", reply.answer);
    Ok(())
}

/// Interactive loop over stdin until `exit`, `quit`, or end of input.
async fn chat(config: &PlacebotConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = build_registry(config)?;
    let session = registry.create()?;

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    if let Some(greeting) = session.greeting() {
        stdout.write_all(format!("{}\n", greeting).as_bytes()).await?;
    }

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }
        if line.is_empty() {
            continue;
        }

        let text = match session.submit(line).await {
            Ok(reply) => reply.answer,
            Err(e @ (ChatError::EmptyMessage | ChatError::MessageTooLong(_))) => e.to_string(),
            Err(e) => return Err(e.into()),
        };
        stdout.write_all(format!("{}\n", text).as_bytes()).await?;
    }

    registry.delete(session.id())?;
    Ok(())
}

/// Serve the HTTP API and sweep expired sessions in the background.
async fn serve(config: PlacebotConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = build_registry(&config)?;
    let state = AppState::new(registry);

    let sessions = Arc::clone(&state.sessions);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let purged = sessions.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "Session sweep");
            }
        }
    });

    placebot_api::start_server(state).await?;
    Ok(())
}
