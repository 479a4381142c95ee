//! RFS Client Binary
//!
//! Run with: cargo run --bin rfs-client -- --host 127.0.0.1

use anyhow::{Context, Result};
use clap::Parser;
use rfs::protocol::DEFAULT_PORT;
use rfs::shell::{self, ShellCommand};
use rfs::{Client, Error};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host (prompted for when omitted)
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Username (prompted for when omitted)
    #[arg(short, long)]
    username: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

const DEFAULT_HOST: &str = "127.0.0.1";

/// Print a prompt and read one line; `None` at end of input
async fn prompt(input: &mut Lines<BufReader<Stdin>>, text: &str) -> Result<Option<String>> {
    print!("{text}");
    std::io::stdout().flush()?;
    Ok(input.next_line().await?)
}

/// Retry until the server accepts a login; false if input ended first
async fn login(
    client: &mut Client,
    input: &mut Lines<BufReader<Stdin>>,
    mut username: Option<String>,
) -> Result<bool> {
    loop {
        let user = match username.take() {
            Some(user) => user,
            None => match prompt(input, "Username: ").await? {
                Some(user) => user.trim().to_string(),
                None => return Ok(false),
            },
        };
        let Some(password) = prompt(input, "Password: ").await? else {
            return Ok(false);
        };

        match client.login(&user, password.trim_end_matches(['\r', '\n'])).await {
            Ok(()) => return Ok(true),
            Err(Error::Remote(reason)) => {
                if !reason.is_empty() {
                    println!("{reason}");
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut input = BufReader::new(tokio::io::stdin()).lines();

    let host = match args.host {
        Some(host) => host,
        None => {
            let entered = prompt(&mut input, &format!("Host [{DEFAULT_HOST}]: "))
                .await?
                .unwrap_or_default();
            let entered = entered.trim();
            if entered.is_empty() {
                DEFAULT_HOST.to_string()
            } else {
                entered.to_string()
            }
        }
    };

    let mut client = Client::connect(&host, args.port)
        .await
        .with_context(|| format!("Failed to connect to {host}:{}", args.port))?;

    if !login(&mut client, &mut input, args.username).await? {
        return Ok(());
    }

    while let Some(line) = prompt(&mut input, ">> ").await? {
        let command = match shell::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                // Help and usage errors both render their own text
                print!("{}", e.render());
                continue;
            }
        };

        if command == ShellCommand::Exit {
            break;
        }

        match shell::execute(&mut client, command).await {
            Ok(Some(output)) => println!("{output}"),
            Ok(None) => {}
            Err(e) if e.is_fatal() => {
                println!("Error: {e}");
                return Err(e.into());
            }
            Err(e) => println!("Error: {e}"),
        }
    }

    Ok(())
}
