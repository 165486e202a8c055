use anyhow::Result;
use clap::Parser;
use fh_config::RunnerConfig;
use fh_core::NewJob;

mod admin_cmds;
mod cli;
mod config_cmds;
mod jobs_cmd;
mod logging;
mod serve_cmd;

use cli::{Cli, Commands, ConfigCommands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = cli.format;

    // Kept alive until exit so buffered file logs get flushed.
    let _log_guard = match &cli.command {
        Commands::Serve {
            log_dir: Some(dir), ..
        } => {
            let (writer, guard) = logging::create_serve_log_writer(dir)?;
            logging::init(Some(writer));
            Some(guard)
        }
        _ => {
            logging::init(None);
            None
        }
    };

    if let Commands::Config {
        cmd: ConfigCommands::Template,
    } = cli.command
    {
        config_cmds::handle_config_template();
        return Ok(());
    }

    let config = RunnerConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { ephemeral, .. } => serve_cmd::handle_serve(config, ephemeral).await?,
        Commands::Submit {
            class,
            providers,
            priority,
            payload,
        } => {
            let request = NewJob {
                class,
                providers,
                priority,
                payload,
            };
            admin_cmds::handle_submit(&config, request, format).await?;
        }
        Commands::Cancel { id } => admin_cmds::handle_cancel(&config, &id, format).await?,
        Commands::Job { id } => admin_cmds::handle_job(&config, &id, format).await?,
        Commands::Health => admin_cmds::handle_health(&config, format).await?,
        Commands::Pause => admin_cmds::handle_pause(&config, format).await?,
        Commands::Resume => admin_cmds::handle_resume(&config, format).await?,
        Commands::Jobs { status, class } => {
            jobs_cmd::handle_jobs(&config, status, class, format).await?;
        }
        Commands::Config { cmd } => match cmd {
            ConfigCommands::Show => config_cmds::handle_config_show(&config, format)?,
            ConfigCommands::Validate => config_cmds::handle_config_validate(&config)?,
            ConfigCommands::Template => config_cmds::handle_config_template(),
        },
    }

    Ok(())
}
