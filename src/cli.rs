use clap::Parser;
use std::path::PathBuf;

/// Route chat messages to configured LLM agents
#[derive(Parser, Debug, Clone)]
#[command(name = "switchboard", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "SWITCHBOARD_CONFIG", default_value = "switchboard.toml")]
    pub config: PathBuf,

    /// Conversation thread to use
    #[arg(short, long, env = "SWITCHBOARD_THREAD_ID", default_value = "default")]
    pub thread_id: String,

    /// Send every message to this agent, bypassing routing
    #[arg(short, long)]
    pub agent: Option<String>,

    /// Print replies as they are generated
    #[arg(short, long)]
    pub stream: bool,

    /// Message to send; starts an interactive session when omitted
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["switchboard"]);
        assert_eq!(cli.config, PathBuf::from("switchboard.toml"));
        assert_eq!(cli.thread_id, "default");
        assert!(cli.agent.is_none());
        assert!(!cli.stream);
        assert!(cli.message.is_none());
    }

    #[test]
    fn test_cli_with_args() {
        let cli = Cli::parse_from([
            "switchboard",
            "--config",
            "custom.toml",
            "--thread-id",
            "t-42",
            "--agent",
            "english",
            "--stream",
            "hello there",
        ]);
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert_eq!(cli.thread_id, "t-42");
        assert_eq!(cli.agent.as_deref(), Some("english"));
        assert!(cli.stream);
        assert_eq!(cli.message.as_deref(), Some("hello there"));
    }
}
