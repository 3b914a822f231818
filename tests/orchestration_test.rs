use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use switchboard::agents::classifiers::{Classifier, LlmClassifier};
use switchboard::agents::config::{AgentConfig, BackendConfig, ProviderKind};
use switchboard::agents::core::{create_agent, AgentDeps};
use switchboard::agents::llm::{MockProvider, MockResponse};
use switchboard::agents::memory::{FileSystemRepository, MemoryService};
use switchboard::agents::orchestration::{
    Orchestrator, RolePrompt, SimpleOrchestrator, NO_AGENT_FOUND,
};
use switchboard::agents::registry::AgentRegistry;
use switchboard::agents::{MessageContext, Switchboard};
use switchboard::config::Settings;
use tempfile::TempDir;

/// Scripted backend: answers routing prompts by keyword, ReAct roles from a
/// fixed script and everything else with "reply to <message>"
fn provider() -> MockProvider {
    MockProvider::new().with_handler(|request| {
        let system = request.system_prompt().unwrap_or_default();
        let user = request.last_user_message().unwrap_or_default();

        let reply = if system.starts_with("You are a classifier") {
            let target = if user.contains("hola") { "spanish" } else { "english" };
            target.to_string()
        } else if system == RolePrompt::FinalAnswerCheck.system_prompt() {
            "null".to_string()
        } else if system == RolePrompt::Task.system_prompt() {
            "Task: look it up".to_string()
        } else if system == RolePrompt::Thought.system_prompt() {
            "I need the english agent".to_string()
        } else {
            format!("reply to {}", user)
        };
        Some(MockResponse::text(reply))
    })
}

const AGENTS: &str = r#"
[[agents]]
name = "english"
description = "Answers in English"
[agents.backend]
type = "llm"
provider = "mock"

[[agents]]
name = "spanish"
description = "Answers in Spanish"
[agents.backend]
type = "llm"
provider = "mock"

[[agents]]
name = "router"
description = "Routes messages"
[agents.backend]
type = "llm"
provider = "mock"
"#;

#[tokio::test]
async fn test_simple_orchestrator_with_empty_registry() {
    let orchestrator = SimpleOrchestrator::new(AgentRegistry::new(), None);
    let reply = orchestrator
        .orchestrate("thread", "hello", &MessageContext::new())
        .await;
    assert_eq!(reply, NO_AGENT_FOUND);
}

#[tokio::test]
async fn test_unlisted_classifier_reply_uses_default() -> anyhow::Result<()> {
    let config = AgentConfig::new("router", "Routes messages", BackendConfig::llm(ProviderKind::Mock))?;
    let deps = AgentDeps::new().with_provider(Arc::new(MockProvider::new().with_response("banana")));
    let classifier = LlmClassifier::new(create_agent(&config, &deps)?, Some("english".to_string()));

    let registry = AgentRegistry::new();
    for name in ["english", "spanish"] {
        let config = AgentConfig::new(name, format!("Answers in {}", name), BackendConfig::llm(ProviderKind::Mock))?;
        registry.register_agent(create_agent(&config, &AgentDeps::new())?).await;
    }

    let selected = classifier
        .classify("which one?", None, &registry.list_agents().await)
        .await;
    assert_eq!(selected.as_deref(), Some("english"));
    Ok(())
}

#[tokio::test]
async fn test_multi_agent_turn_persists_to_files() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let toml = format!(
        "[memory]\nbackend = \"file\"\npath = {:?}\n\n[orchestrator]\nkind = \"multi_agent\"\nclassifier_agent = \"router\"\ndefault_agent = \"english\"\n{}",
        dir.path().display().to_string(),
        AGENTS
    );
    let settings = Settings::from_toml_str(&toml)?;
    let switchboard = Switchboard::with_provider(&settings, Arc::new(provider())).await?;

    let reply = switchboard.send("t1", "hola amigo", &MessageContext::new()).await;
    assert_eq!(reply, "[spanish] reply to hola amigo");

    // A torn write leaves a malformed line behind; it is skipped on read
    let mut file = OpenOptions::new().append(true).open(dir.path().join("t1.json"))?;
    writeln!(file, "{{not json")?;

    let reopened = MemoryService::new(Arc::new(FileSystemRepository::new(dir.path())?));
    let messages = reopened.get_last_n_messages("t1", 10).await?;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].sender, "user");
    assert_eq!(messages[0].content.to_string(), "hola amigo");
    assert_eq!(messages[1].sender, "spanish");
    assert_eq!(messages[1].content.to_string(), reply);
    Ok(())
}

#[tokio::test]
async fn test_react_single_step_returns_observation() -> anyhow::Result<()> {
    let toml = format!(
        "[orchestrator]\nkind = \"react\"\ndefault_agent = \"english\"\nplanner_agent = \"router\"\nmax_steps = 1\n{}",
        AGENTS
    );
    let settings = Settings::from_toml_str(&toml)?;
    let mock = provider();
    let switchboard = Switchboard::with_provider(&settings, Arc::new(mock.clone())).await?;

    let reply = switchboard.send("t", "what is routing?", &MessageContext::new()).await;
    assert_eq!(reply, "reply to look it up");

    // One step: the raw query is never checked and the budget ends the loop
    let checks = mock
        .requests()
        .iter()
        .filter(|r| r.system_prompt() == Some(RolePrompt::FinalAnswerCheck.system_prompt()))
        .count();
    assert_eq!(checks, 0);

    let stored = switchboard.memory().get_last_n_messages("t", 10).await?;
    assert_eq!(stored.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_react_stops_at_step_budget() -> anyhow::Result<()> {
    let toml = format!(
        "[orchestrator]\nkind = \"react\"\ndefault_agent = \"english\"\nplanner_agent = \"router\"\n{}",
        AGENTS
    );
    let settings = Settings::from_toml_str(&toml)?;
    let mock = provider();
    let switchboard = Switchboard::with_provider(&settings, Arc::new(mock.clone())).await?;

    let reply = switchboard
        .orchestrator()
        .orchestrate("t", "never satisfied", &MessageContext::new())
        .await;
    assert_eq!(reply, "reply to look it up");

    let thoughts = mock
        .requests()
        .iter()
        .filter(|r| r.system_prompt() == Some(RolePrompt::Thought.system_prompt()))
        .count();
    assert_eq!(thoughts, 5);
    Ok(())
}
