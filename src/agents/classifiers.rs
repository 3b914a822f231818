//! Agent selection for multi-agent routing

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agents::core::Agent;
use crate::agents::domain::{AgentInfo, MessageContext};

/// Chooses which agent should answer a message
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Name of the selected agent, or `None` when nothing can be chosen
    async fn classify(
        &self,
        message: &str,
        thread_id: Option<&str>,
        available_agents: &[AgentInfo],
    ) -> Option<String>;
}

fn agent_listing(agents: &[AgentInfo]) -> String {
    agents
        .iter()
        .map(|a| format!("'{}: {}'", a.name, a.description))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Asks an LLM-backed agent to pick an agent name
pub struct LlmClassifier {
    agent: Arc<dyn Agent>,
    default_agent: Option<String>,
}

impl LlmClassifier {
    pub fn new(agent: Arc<dyn Agent>, default_agent: Option<String>) -> Self {
        Self { agent, default_agent }
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    fn prompt(message: &str, available_agents: &[AgentInfo]) -> String {
        format!(
            "Given the following user message and list of available specialized agents, \
             select the most appropriate agent to handle the request. Return only the agent id.\n\n\
             Available agents: {}\n\n\
             User message: {}\n",
            agent_listing(available_agents),
            message
        )
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(
        &self,
        message: &str,
        thread_id: Option<&str>,
        available_agents: &[AgentInfo],
    ) -> Option<String> {
        if available_agents.is_empty() {
            return None;
        }

        let mut ctx = MessageContext::new();
        ctx.thread_id = thread_id.map(str::to_string);
        let reply = self
            .agent
            .handle_message(&Self::prompt(message, available_agents), &ctx)
            .await;
        let selected = reply.trim();

        if available_agents.iter().any(|a| a.name == selected) {
            debug!(selected, "Classifier selected agent");
            Some(selected.to_string())
        } else {
            warn!(reply = %selected, "Classifier reply is not a known agent, using default");
            self.default_agent.clone()
        }
    }
}

/// Keyword rule: any keyword present in the message routes to `agent`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub agent: String,
    pub keywords: Vec<String>,
}

impl RoutingRule {
    pub fn new<I, S>(agent: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            agent: agent.into(),
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }

    fn matches(&self, message: &str) -> bool {
        self.keywords
            .iter()
            .any(|keyword| message.contains(&keyword.to_lowercase()))
    }
}

/// Rule-based classifier: first matching rule whose agent is available wins
#[derive(Debug, Clone, Default)]
pub struct RuleClassifier {
    rules: Vec<RoutingRule>,
    default_agent: Option<String>,
}

impl RuleClassifier {
    pub fn new(rules: Vec<RoutingRule>, default_agent: Option<String>) -> Self {
        Self { rules, default_agent }
    }

    pub fn with_rule(mut self, rule: RoutingRule) -> Self {
        self.rules.push(rule);
        self
    }
}

#[async_trait]
impl Classifier for RuleClassifier {
    async fn classify(
        &self,
        message: &str,
        _thread_id: Option<&str>,
        available_agents: &[AgentInfo],
    ) -> Option<String> {
        if available_agents.is_empty() {
            return None;
        }

        let message = message.to_lowercase();
        let available = |name: &str| available_agents.iter().any(|a| a.name == name);

        self.rules
            .iter()
            .find(|rule| available(&rule.agent) && rule.matches(&message))
            .map(|rule| rule.agent.clone())
            .or_else(|| self.default_agent.clone().filter(|name| available(name)))
    }
}

/// Rewrite a classifier agent's system prompt with the current peer list
pub fn refresh_classifier_prompt(agent: &dyn Agent, available_agents: &[AgentInfo]) {
    let peers: Vec<String> = available_agents
        .iter()
        .filter(|a| a.name != agent.name())
        .map(|a| format!("- {}: {}", a.name, a.description))
        .collect();

    agent.set_system_prompt(format!(
        "You are a classifier. Your job is to determine the best agent based on the user's message. \
         Available agents:\n{}\n\
         Reply with only the name of the agent that should handle the message.",
        peers.join("\n")
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::config::{AgentConfig, BackendConfig, ProviderKind};
    use crate::agents::core::ChatAgent;
    use crate::agents::llm::MockProvider;

    fn classifier_agent(provider: MockProvider) -> Arc<dyn Agent> {
        let config = AgentConfig::new("router", "Routes messages", BackendConfig::llm(ProviderKind::Mock)).unwrap();
        Arc::new(ChatAgent::new(config, Arc::new(provider), None, None))
    }

    fn agents() -> Vec<AgentInfo> {
        vec![
            AgentInfo::new("english", "Answers in English", "ChatAgent"),
            AgentInfo::new("spanish", "Answers in Spanish", "ChatAgent"),
        ]
    }

    #[tokio::test]
    async fn test_llm_classifier_trims_and_validates() {
        let provider = MockProvider::new().with_response("  spanish\n").with_response("klingon");
        let classifier = LlmClassifier::new(classifier_agent(provider.clone()), Some("english".to_string()));

        assert_eq!(classifier.classify("hola", None, &agents()).await.as_deref(), Some("spanish"));
        assert_eq!(classifier.classify("nuqneH", None, &agents()).await.as_deref(), Some("english"));

        let prompt = provider.requests()[0].last_user_message().unwrap().to_string();
        assert!(prompt.contains("'english: Answers in English', 'spanish: Answers in Spanish'"));
        assert!(prompt.contains("User message: hola"));
    }

    #[tokio::test]
    async fn test_llm_classifier_empty_candidates() {
        let provider = MockProvider::new();
        let classifier = LlmClassifier::new(classifier_agent(provider.clone()), Some("english".to_string()));
        assert_eq!(classifier.classify("hi", None, &[]).await, None);
        assert_eq!(provider.request_count(), 0);
    }

    #[tokio::test]
    async fn test_rule_classifier() {
        let classifier = RuleClassifier::new(
            vec![
                RoutingRule::new("spanish", ["hola", "gracias"]),
                RoutingRule::new("french", ["bonjour"]),
            ],
            Some("english".to_string()),
        );

        assert_eq!(classifier.classify("HOLA amigo", None, &agents()).await.as_deref(), Some("spanish"));
        // Rule target not registered
        assert_eq!(classifier.classify("bonjour", None, &agents()).await.as_deref(), Some("english"));
        assert_eq!(classifier.classify("bonjour", None, &[]).await, None);
    }

    #[test]
    fn test_refresh_classifier_prompt() {
        let agent = classifier_agent(MockProvider::new());
        let mut available = agents();
        available.push(agent.info());

        refresh_classifier_prompt(agent.as_ref(), &available);
        let prompt = agent.system_prompt();
        assert!(prompt.contains("- english: Answers in English\n- spanish: Answers in Spanish"));
        assert!(!prompt.contains("router"));
    }
}
