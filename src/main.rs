use std::io::Write;

use clap::Parser;
use switchboard::agents::{MessageContext, Switchboard};
use switchboard::cli::Cli;
use switchboard::config::Settings;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

async fn run_turn(switchboard: &Switchboard, cli: &Cli, ctx: &MessageContext, message: &str) {
    if cli.stream {
        switchboard
            .send_stream(&cli.thread_id, message, ctx, &mut |chunk: &str| {
                print!("{}", chunk);
                let _ = std::io::stdout().flush();
            })
            .await;
        println!();
    } else {
        println!("{}", switchboard.send(&cli.thread_id, message, ctx).await);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so replies stay clean on stdout
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)?;
    info!(config = %cli.config.display(), agents = settings.agents.len(), "Starting switchboard");

    let switchboard = Switchboard::from_settings(&settings).await?;
    let ctx = match &cli.agent {
        Some(agent) => MessageContext::new().with_agent(agent.clone()),
        None => MessageContext::new(),
    };

    if let Some(message) = &cli.message {
        run_turn(&switchboard, &cli, &ctx, message).await;
        return Ok(());
    }

    println!("Thread '{}'. Type 'quit' or 'exit' to leave.", cli.thread_id);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if message.eq_ignore_ascii_case("quit") || message.eq_ignore_ascii_case("exit") {
            break;
        }
        run_turn(&switchboard, &cli, &ctx, message).await;
    }

    Ok(())
}
