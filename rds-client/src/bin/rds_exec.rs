//! # rds-exec
//!
//! Purpose: Run one cache command from the shell through the pooled client,
//! mostly to check connectivity and the debug line.
//!
//! Usage: `rds-exec <COMMAND> [ARGS...]`, configured through the
//! `RDS_CACHE_*` environment variables. `RUST_LOG` controls verbosity.

use std::env;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rds_client::{Arg, CacheClient, CacheConfig, Value};

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "rds_client=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let mut argv = env::args().skip(1);
    let Some(command) = argv.next() else {
        bail!("usage: rds-exec <COMMAND> [ARGS...]");
    };
    let args: Vec<Arg> = argv.map(Arg::from).collect();

    let config = CacheConfig::from_env();
    let client = CacheClient::new(&config)
        .with_context(|| format!("connecting to cache at {}", config.addr()))?;

    let reply = client
        .execute(&command, &args)
        .with_context(|| format!("executing {}", command))?;
    print_value(&reply, 0);
    Ok(())
}

fn print_value(value: &Value, depth: usize) {
    let indent = "  ".repeat(depth);
    match value {
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                println!("{}{})", indent, idx + 1);
                print_value(item, depth + 1);
            }
        }
        Value::Nil => println!("{}(nil)", indent),
        Value::Int(n) => println!("{}(integer) {}", indent, n),
        Value::Error(message) => println!("{}(error) {}", indent, message),
        other => println!("{}{}", indent, other),
    }
}
