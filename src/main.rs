use clap::Parser;
use color_eyre::Result;
use eras::{
    Config, Database, Planner, Profile,
    cli::{self, Cli, Commands},
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,eras=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Determine profile: --dev flag enables dev mode, otherwise use prod
    let profile = if cli.dev { Profile::Dev } else { Profile::Prod };

    let config = Config::load_with_profile(profile)?;

    if let Commands::Serve = cli.command {
        eras::llm::proxy::serve(&config).await?;
        return Ok(());
    }

    let db_path = config.get_database_path();
    let db = Database::new(
        db_path
            .to_str()
            .ok_or_else(|| color_eyre::eyre::eyre!("Database path contains invalid UTF-8"))?,
    )?;
    let mut planner = Planner::load(db, &config.owner_id)?;
    if let Some(era) = config.selected_era_id() {
        if let Err(e) = planner.select_theme(Some(era)) {
            tracing::warn!(error = %e, "ignoring pinned era");
        }
    }

    match cli.command {
        Commands::Era { action } => cli::handle_era(action, &mut planner, profile)?,
        Commands::Story { action } => cli::handle_story(action, &mut planner)?,
        Commands::Task { action } => cli::handle_task(action, &mut planner, &config).await?,
        Commands::Session => cli::handle_session(&planner)?,
        Commands::Chat { action } => cli::handle_chat(action, &mut planner, &config, profile).await?,
        Commands::Export { task, ics, copy } => cli::handle_export(task, ics, copy, &planner)?,
        Commands::Profile { action } => cli::handle_profile(action, &planner)?,
        Commands::Serve => {}
    }

    Ok(())
}
