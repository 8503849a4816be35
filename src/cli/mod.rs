mod client;
mod daemon;

use anyhow::Result;
use console::style;

use crate::core::config::Config;
use crate::logging::{self, LogFormat};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Serve,
    Run { project: Option<String> },
    Status { api_url: Option<String>, json: bool },
    Backup { project: String, api_url: Option<String> },
    Help,
}

fn print_help() {
    println!("{}", style("pgbackup").bold().green());
    println!("Scheduled, container-isolated logical backups for PostgreSQL\n");

    println!("{}", style("Commands").bold());
    println!("  serve                          Run the scheduler and HTTP API (default)");
    println!("  run [project]                  Run a backup job now and print the result");
    println!("  status [--api-url URL] [--json]  Show the status reported by a running service");
    println!("  backup <project> [--api-url URL]  Ask a running service to back up one project");
    println!("  help                           Show this help");

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("pgbackup").green()
    );
}

/// Parse everything after the binary name. `Err` carries a usage message.
pub(crate) fn parse_command(args: &[String]) -> Result<Command, String> {
    let Some(first) = args.first() else {
        return Ok(Command::Serve);
    };

    let mut api_url = None;
    let mut json = false;
    let mut positional = Vec::new();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--api-url" => {
                let Some(value) = args.get(i + 1) else {
                    return Err("--api-url requires a value".to_string());
                };
                api_url = Some(value.clone());
                i += 2;
            }
            "--json" => {
                json = true;
                i += 1;
            }
            other => {
                positional.push(other.to_string());
                i += 1;
            }
        }
    }

    match first.as_str() {
        "serve" => Ok(Command::Serve),
        "run" => Ok(Command::Run {
            project: positional.into_iter().next(),
        }),
        "status" => Ok(Command::Status { api_url, json }),
        "backup" => match positional.into_iter().next() {
            Some(project) => Ok(Command::Backup { project, api_url }),
            None => Err("project name required: pgbackup backup <project>".to_string()),
        },
        "help" | "--help" | "-h" => Ok(Command::Help),
        other => Err(format!("unknown command: {}", other)),
    }
}

/// `--api-url`, then `API_URL`, then the local service port.
pub(crate) fn resolve_api_url(flag: Option<String>, env: Option<String>, port: u16) -> String {
    flag.or(env)
        .map(|u| u.trim().trim_end_matches('/').to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", port))
}

fn init_logging(config: &Config) {
    logging::init(&config.log_level, LogFormat::parse(&config.log_format));
}

pub async fn run_main() -> Result<i32> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_command(&args) {
        Ok(command) => command,
        Err(usage) => {
            crate::core::terminal::print_error(&usage);
            print_help();
            return Ok(2);
        }
    };

    match command {
        Command::Help => {
            print_help();
            Ok(0)
        }
        Command::Serve => {
            let config = Config::load()?;
            init_logging(&config);
            daemon::serve(config).await?;
            Ok(0)
        }
        Command::Run { project } => {
            let config = Config::load()?;
            init_logging(&config);
            daemon::run_once(config, project.as_deref()).await
        }
        Command::Status { api_url, json } => {
            let config = Config::load()?;
            let url = resolve_api_url(api_url, std::env::var("API_URL").ok(), config.service_port);
            client::status(&url, json).await
        }
        Command::Backup { project, api_url } => {
            let config = Config::load()?;
            let url = resolve_api_url(api_url, std::env::var("API_URL").ok(), config.service_port);
            client::trigger_backup(&url, &project).await
        }
    }
}
