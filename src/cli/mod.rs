// CLI module - User-facing command-line interface over the REST API

mod output;

use crate::error::Result;
use crate::http::client::{ApiClient, DEFAULT_API_URL};
use crate::http::protocol::StartRequest;
use clap::{Args, Parser, Subcommand};

/// labkeeper - keeps a local Jupyter notebook server alive
#[derive(Parser)]
#[command(name = "labkeeper")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Address of the labkeeper service
    #[arg(long, global = true, default_value = DEFAULT_API_URL)]
    api: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the notebook server status
    Status,

    /// Start the notebook server
    Start(LaunchArgs),

    /// Stop the notebook server
    Stop,

    /// Restart the notebook server
    Restart(LaunchArgs),

    /// Inspect the configured Python interpreter
    Detect,

    /// Check that the service is reachable
    Health,

    /// Inspect the stored configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the stored configuration
    Show,
}

/// Overrides accepted by start and restart
#[derive(Args, Debug, Clone, Default)]
struct LaunchArgs {
    /// Port for the notebook server
    #[arg(short, long)]
    port: Option<u16>,

    /// Python interpreter to run
    #[arg(long)]
    python: Option<String>,

    /// Directory to serve, or a notebook file to open
    #[arg(long)]
    path: Option<String>,

    /// Use the classic Notebook interface instead of Lab
    #[arg(long)]
    notebook: bool,
}

impl LaunchArgs {
    fn to_request(&self) -> StartRequest {
        StartRequest {
            port: self.port.map(i64::from),
            python_executable: self.python.clone(),
            project_dir: self.path.clone(),
            // Without the flag the stored preference applies
            use_notebook: self.notebook.then_some(true),
            ..StartRequest::default()
        }
    }
}

impl Cli {
    /// Run the CLI application
    pub async fn run() -> Result<()> {
        let cli = Cli::parse();
        let result = cli.execute().await;
        if let Err(e) = &result {
            output::print_error(&e.to_string());
        }
        result
    }

    /// Execute the parsed command
    async fn execute(&self) -> Result<()> {
        let client = ApiClient::new(&self.api)?;

        match &self.command {
            Commands::Status => {
                let status = client.status().await?;
                output::print_status(&status);
            }

            Commands::Start(args) => {
                let pb = output::create_progress_bar("Starting notebook server...");
                match client.start(&args.to_request()).await {
                    Ok(response) => {
                        output::finish_progress_success(pb, &response.message);
                        output::print_started(&response);
                    }
                    Err(e) => {
                        output::finish_progress_error(pb, "Start failed");
                        return Err(e);
                    }
                }
            }

            Commands::Stop => {
                let response = client.stop().await?;
                output::print_stopped(&response);
            }

            Commands::Restart(args) => {
                let pb = output::create_progress_bar("Restarting notebook server...");
                match client.restart(&args.to_request()).await {
                    Ok(response) => {
                        output::finish_progress_success(pb, &response.message);
                        output::print_started(&response);
                    }
                    Err(e) => {
                        output::finish_progress_error(pb, "Restart failed");
                        return Err(e);
                    }
                }
            }

            Commands::Detect => {
                let response = client.detect_python().await?;
                output::print_detect(&response);
            }

            Commands::Health => {
                let health = client.health().await?;
                output::print_health(&health, client.base_url().as_str());
            }

            Commands::Config {
                command: ConfigCommands::Show,
            } => {
                let response = client.load_config().await?;
                output::print_config(&response.config)?;
            }
        }

        Ok(())
    }
}
