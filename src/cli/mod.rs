//! Command-line surface of the `fca-session` binary.

pub mod doctor;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::backup::{BackupSink, SnapshotKind};
use crate::config::Config;
use crate::session::cookies::normalize_cookie_header;
use crate::session::login_provider::mask;
use crate::session::{
    ApiLoginProvider, CookieStore, ReqwestHttpClient, Session, SessionRecovery, SessionSeed,
};

pub use self::doctor::run_doctor_command;

#[derive(Parser, Debug)]
#[command(name = "fca-session", version, about = "Cookie session recovery for the messaging client")]
pub struct Cli {
    /// TOML config overlay (default: ~/.fca/config.toml).
    #[arg(long, global = true, env = "FCA_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Recover a session and print who it belongs to.
    Login {
        /// Cookie header (`c_user=...; xs=...`) or a JSON app-state array.
        #[arg(long, conflicts_with = "appstate")]
        cookie: Option<String>,

        /// File holding a JSON app-state export.
        #[arg(long)]
        appstate: Option<PathBuf>,
    },

    /// Inspect stored session snapshots.
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },

    /// Cookie header utilities.
    Cookies {
        #[command(subcommand)]
        command: CookiesCommand,
    },

    /// Persist env vars to ~/.fca/.env.
    Env {
        #[command(subcommand)]
        command: EnvCommand,
    },

    /// Check configuration and reachability.
    Doctor {
        /// Exit with an error when any check fails.
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum BackupCommand {
    /// Print the latest snapshot.
    Show {
        /// Owner of the snapshot; the most recent of any identity when omitted.
        #[arg(long)]
        identity: Option<String>,

        #[arg(long, default_value = "cookie")]
        kind: SnapshotKind,
    },
}

#[derive(Subcommand, Debug)]
pub enum CookiesCommand {
    /// Print the `name=value` pairs recognised in a cookie header.
    Normalize { header: String },
}

#[derive(Subcommand, Debug)]
pub enum EnvCommand {
    /// Write `KEY=VALUE` entries, keeping the others.
    Save {
        #[arg(value_parser = parse_key_value, required = true)]
        entries: Vec<(String, String)>,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("invalid variable name '{key}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Login { cookie, appstate } => {
            let config = Config::from_env_with_toml(cli.config.as_deref())?;
            let seed = match (cookie, appstate) {
                (Some(raw), _) => Some(SessionSeed::from_text(&raw)),
                (None, Some(path)) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    Some(SessionSeed::from_app_state_json(&raw)?)
                }
                (None, None) => config.login.credentials.clone().map(SessionSeed::Credentials),
            };
            run_login(&config, seed).await
        }
        Command::Backup {
            command: BackupCommand::Show { identity, kind },
        } => {
            let config = Config::from_env_with_toml(cli.config.as_deref())?;
            let sink = open_backups(&config)
                .await?
                .context("session backups are disabled")?;
            let snapshot = match identity.as_deref() {
                Some(identity) => sink.get(identity, kind).await?,
                None => sink.get_latest_any(kind).await?,
            };
            match snapshot {
                Some(snapshot) => {
                    println!("identity:   {}", snapshot.identity);
                    println!("kind:       {}", snapshot.kind);
                    println!("updated_at: {}", snapshot.updated_at.to_rfc3339());
                    println!("{}", snapshot.data);
                }
                None => println!("No {kind} snapshot stored."),
            }
            Ok(())
        }
        Command::Cookies {
            command: CookiesCommand::Normalize { header },
        } => {
            for pair in normalize_cookie_header(&header) {
                println!("{pair}");
            }
            Ok(())
        }
        Command::Env {
            command: EnvCommand::Save { entries },
        } => {
            let vars: Vec<(&str, &str)> = entries
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            crate::bootstrap::save_fca_env(&vars)?;
            println!(
                "Saved {} variable(s) to {}",
                vars.len(),
                crate::bootstrap::fca_env_path().display()
            );
            Ok(())
        }
        Command::Doctor { strict } => run_doctor_command(cli.config.as_deref(), strict).await,
    }
}

async fn run_login(config: &Config, seed: Option<SessionSeed>) -> anyhow::Result<()> {
    let http = ReqwestHttpClient::new(&config.network.user_agent, config.network.http_timeout)?;
    let provider = ApiLoginProvider::new(
        config.login.api_server.clone(),
        config.login.api_key.clone(),
    )?;

    let mut recovery = SessionRecovery::new(
        Arc::new(http),
        Arc::new(CookieStore::new()),
        config.login.recovery_options(),
    )
    .with_login_provider(Arc::new(provider));
    if let Some(sink) = open_backups(config).await? {
        recovery = recovery.with_backups(sink);
    }

    let (session, backup_task) =
        Session::login(Arc::new(recovery), seed, config.network.task_timeout).await?;

    let context = session.context();
    println!("identity: {}", session.identity().as_str());
    println!("source:   {}", session.identity().source().as_str());
    if let Some(name) = &context.user_name {
        println!("name:     {}", mask(name, 2));
    }
    match context.region_info() {
        Some(region) => println!("region:   {} ({})", region.code, region.location),
        None => println!("region:   {}", context.region),
    }
    if session.is_degraded() {
        println!("status:   degraded (cookie identity only, not confirmed by a page)");
    }

    if let Some(task) = backup_task
        && let Err(e) = task.await
    {
        tracing::warn!("Backup task ended abnormally: {}", e);
    }
    Ok(())
}

#[cfg(feature = "libsql")]
async fn open_backups(config: &Config) -> anyhow::Result<Option<Arc<dyn BackupSink>>> {
    if !config.backup.enabled {
        return Ok(None);
    }
    let sink = crate::backup::LibSqlBackupSink::new_local(&config.backup.libsql_path).await?;
    Ok(Some(Arc::new(sink)))
}

#[cfg(not(feature = "libsql"))]
async fn open_backups(config: &Config) -> anyhow::Result<Option<Arc<dyn BackupSink>>> {
    if config.backup.enabled {
        tracing::warn!("Built without libsql; session backups are unavailable");
    }
    Ok(None)
}
