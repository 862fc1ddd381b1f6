//! # warden
//!
//! Command-line access to a pooled warden database: run queries and
//! commands, inspect pool statistics, print the connection init script.

#![deny(unsafe_code)]

mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::types::Value;
use serde_json::json;
use warden_pool::{PoolKey, PoolRegistry};
use warden_settings::WardenSettings;

/// Query pooled warden `SQLite` databases.
#[derive(Parser, Debug)]
#[command(name = "warden", about = "Query pooled warden SQLite databases")]
struct Cli {
    /// Settings file (defaults to `$WARDEN_SETTINGS` or `~/.warden/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Database path, or `:memory:` (overrides settings).
    #[arg(long)]
    db: Option<String>,

    /// Log filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a read statement and print its rows.
    Query {
        /// SQL text with `?` placeholders.
        sql: String,
        /// Positional parameters. Integers, reals, and `null` are typed; anything else is text.
        params: Vec<String>,
    },
    /// Run a mutating statement in a transaction and print the affected row count.
    Exec {
        /// SQL text with `?` placeholders.
        sql: String,
        /// Positional parameters.
        params: Vec<String>,
    },
    /// Open the configured pool and print pool and registry statistics.
    Stats,
    /// Print the PRAGMA script applied to every new connection.
    Pragmas,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| settings.logging.level.clone());
    logging::init_subscriber(&level, cli.json_logs);

    let key = PoolKey::from_settings(&settings.database);
    let init_script = settings.database.directives.init_script();
    // Size the process-wide registry from the settings resolved above.
    let _ = warden_settings::init_settings(settings);
    let registry = PoolRegistry::global();

    let output = match cli.command {
        Command::Query { sql, params } => {
            let result = registry
                .query(&key, &sql, rusqlite::params_from_iter(parse_params(&params)))
                .with_context(|| format!("query failed against {}", key.target))?;
            json!({
                "columns": result.columns,
                "rows": result
                    .rows
                    .into_iter()
                    .map(|row| row.into_iter().map(value_to_json).collect::<Vec<_>>())
                    .collect::<Vec<_>>(),
            })
        }
        Command::Exec { sql, params } => {
            let affected = registry
                .execute(&key, &sql, rusqlite::params_from_iter(parse_params(&params)))
                .with_context(|| format!("command failed against {}", key.target))?;
            json!({ "rowsAffected": affected })
        }
        Command::Stats => {
            let _ = registry
                .get_or_create(&key)
                .with_context(|| format!("failed to open pool for {}", key.target))?;
            json!({
                "pool": registry.pool_stats(&key),
                "registry": registry.stats(),
            })
        }
        Command::Pragmas => {
            println!("{init_script}");
            return Ok(());
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn load_settings(cli: &Cli) -> Result<WardenSettings> {
    let path = cli
        .settings
        .clone()
        .unwrap_or_else(warden_settings::settings_path);
    let mut settings = warden_settings::load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    if let Some(db) = &cli.db {
        settings.database.path.clone_from(db);
    }
    Ok(settings)
}

/// Type positional parameters: integer, then real, then `null`, else text.
fn parse_params(raw: &[String]) -> Vec<Value> {
    raw.iter().map(|s| parse_param(s)).collect()
}

fn parse_param(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        Value::Integer(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::Real(f)
    } else if raw.eq_ignore_ascii_case("null") {
        Value::Null
    } else {
        Value::Text(raw.to_string())
    }
}

fn value_to_json(value: Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => i.into(),
        Value::Real(f) => serde_json::Number::from_f64(f).map_or(serde_json::Value::Null, Into::into),
        Value::Text(s) => s.into(),
        Value::Blob(bytes) => bytes.iter().map(|b| format!("{b:02x}")).collect::<String>().into(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_are_typed() {
        assert_eq!(parse_param("42"), Value::Integer(42));
        assert_eq!(parse_param("-7"), Value::Integer(-7));
        assert_eq!(parse_param("2.5"), Value::Real(2.5));
        assert_eq!(parse_param("NULL"), Value::Null);
        assert_eq!(parse_param("alice@example.com"), Value::Text("alice@example.com".into()));
    }

    #[test]
    fn values_render_as_json() {
        assert_eq!(value_to_json(Value::Integer(3)), json!(3));
        assert_eq!(value_to_json(Value::Text("x".into())), json!("x"));
        assert_eq!(value_to_json(Value::Null), json!(null));
        assert_eq!(value_to_json(Value::Real(f64::NAN)), json!(null));
        assert_eq!(value_to_json(Value::Blob(vec![0xde, 0xad])), json!("dead"));
    }

    #[test]
    fn db_flag_overrides_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"database": {"path": "from-file.db", "maxConnections": 4}}"#)
            .unwrap();
        let cli = Cli::parse_from([
            "warden",
            "--settings",
            path.to_str().unwrap(),
            "--db",
            ":memory:",
            "pragmas",
        ]);
        let settings = load_settings(&cli).unwrap();
        assert_eq!(settings.database.path, ":memory:");
        assert_eq!(settings.database.max_connections, 4);
    }

    #[test]
    fn query_subcommand_collects_params() {
        let cli = Cli::parse_from(["warden", "query", "SELECT ?1, ?2", "1", "bob"]);
        let Command::Query { sql, params } = cli.command else {
            panic!("expected query");
        };
        assert_eq!(sql, "SELECT ?1, ?2");
        assert_eq!(params, ["1", "bob"]);
    }
}
