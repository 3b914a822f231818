//! ReAct orchestration: think, act, observe until the answer is in hand
//!
//! Each reasoning role (thought, task, termination check) is one stateless
//! completion carrying its own system prompt; nothing shared is mutated
//! between roles.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{agent_context, Orchestrator, StreamSink, NO_AGENT_FOUND};
use crate::agents::classifiers::Classifier;
use crate::agents::config::LlmConfig;
use crate::agents::domain::{ChatMessage, MessageContext};
use crate::agents::error::backend_error;
use crate::agents::llm::{CompletionRequest, LlmProvider};
use crate::agents::registry::AgentRegistry;

/// Default bound on think/act/observe cycles
pub const DEFAULT_MAX_STEPS: usize = 5;

/// Reply of the termination check (and task generation) that ends the loop
const FINAL_ANSWER: &str = "final_answer";

const OBSERVATION_PREFIX: &str = "Observation: ";

/// Reasoning roles and their system prompts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolePrompt {
    Thought,
    Task,
    FinalAnswerCheck,
}

impl RolePrompt {
    pub fn system_prompt(&self) -> &'static str {
        match self {
            Self::Thought => {
                "You are an Orchestrator that follows the ReAct framework. \
                 You will be provided with an observation for the user query. \
                 Based on the observation, generate a thought to determine the next action. \
                 You can only think in English; for other languages, first translate the observation to English, \
                 perform the thought process, and then use the specific language agent."
            }
            Self::Task => {
                "Use the agent details along with the observation to generate a descriptive task. \
                 NOTE THAT YOU SHOULD ONLY TELL THE AGENT WHAT TO DO, NOT HOW TO DO IT."
            }
            Self::FinalAnswerCheck => {
                "You will be provided with an observation. If the observation seems to contain the answer \
                 to the user query, return 'final_answer', else return null."
            }
        }
    }
}

/// Stateless completions for the reasoning roles
#[derive(Clone)]
pub struct Planner {
    provider: Arc<dyn LlmProvider>,
    llm: LlmConfig,
}

impl Planner {
    pub fn new(provider: Arc<dyn LlmProvider>, llm: LlmConfig) -> Self {
        Self { provider, llm }
    }

    /// One completion for `role`; failures come back as a tagged string
    pub async fn ask(&self, role: RolePrompt, message: &str) -> String {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(role.system_prompt()),
            ChatMessage::user(message),
        ])
        .with_llm_config(&self.llm);

        match self.provider.complete(request).await {
            Ok(response) => response.message.content,
            Err(e) => {
                warn!(role = ?role, error = %e, "Planner completion failed");
                backend_error("Planner", e)
            }
        }
    }
}

/// One think/act/observe cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReActStep {
    pub step: usize,
    pub thought: String,
    pub agent: String,
    pub task: String,
    pub observation: String,
}

/// Keep the first and last `keep` characters of long text on one line
fn truncate_middle(text: &str, keep: usize) -> String {
    let flat = text.replace('\n', " ");
    let chars: Vec<char> = flat.chars().collect();
    if chars.len() <= keep * 2 {
        return flat;
    }
    let head: String = chars[..keep].iter().collect();
    let tail: String = chars[chars.len() - keep..].iter().collect();
    format!("{}...{}", head, tail)
}

fn strip_task_label(task: &str) -> String {
    task.replace("task: ", "").replace("Task: ", "").trim().to_string()
}

/// Multi-hop orchestrator following the ReAct pattern.
///
/// Before each cycle the current observation is checked for a final answer;
/// the check is skipped while the observation is still the raw query. The
/// loop also ends after `max_steps` cycles, returning whatever observation
/// it has.
pub struct ReActOrchestrator {
    registry: AgentRegistry,
    classifier: Arc<dyn Classifier>,
    planner: Planner,
    default_agent: Option<String>,
    max_steps: usize,
    verbose: bool,
}

impl ReActOrchestrator {
    pub fn new(
        registry: AgentRegistry,
        classifier: Arc<dyn Classifier>,
        planner: Planner,
        default_agent: Option<String>,
    ) -> Self {
        Self {
            registry,
            classifier,
            planner,
            default_agent,
            max_steps: DEFAULT_MAX_STEPS,
            verbose: false,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn trace(&self, line: &str) {
        if self.verbose {
            for part in line.lines().map(str::trim).filter(|l| !l.is_empty()) {
                info!(target: "switchboard::react", "{}", part);
            }
        }
    }

    async fn is_final_answer(&self, observation: &str, query: &str) -> bool {
        if observation == query {
            return false;
        }
        let reply = self
            .planner
            .ask(
                RolePrompt::FinalAnswerCheck,
                &format!("Observation: {}, User Query: {}", observation, query),
            )
            .await;
        let done = reply.trim() == FINAL_ANSWER;
        self.trace(&format!("Is final answer: {}", if done { "yes" } else { "no" }));
        done
    }

    /// Run the loop and return the answer with the recorded steps
    pub async fn orchestrate_traced(
        &self,
        thread_id: &str,
        message: &str,
        ctx: &MessageContext,
    ) -> (String, Vec<ReActStep>) {
        let mut observation = message.to_string();
        let mut steps = Vec::new();

        loop {
            if steps.len() >= self.max_steps {
                debug!(max_steps = self.max_steps, "ReAct step budget exhausted");
                break;
            }
            if self.is_final_answer(&observation, message).await {
                break;
            }
            self.trace(&format!("Step {}", steps.len()));

            // THINK
            let thought = self
                .planner
                .ask(
                    RolePrompt::Thought,
                    &format!("Observation: {}, User Query: {}", observation, message),
                )
                .await;

            // ACT
            let available = self.registry.list_agents().await;
            let Some(agent_name) = self
                .classifier
                .classify(&thought, None, &available)
                .await
                .or_else(|| self.default_agent.clone())
            else {
                warn!("ReAct could not resolve an agent for the thought");
                return (NO_AGENT_FOUND.to_string(), steps);
            };
            let Some(agent) = self.registry.get_agent(&agent_name).await else {
                warn!(agent = %agent_name, "ReAct selected an unregistered agent");
                return (NO_AGENT_FOUND.to_string(), steps);
            };

            let task = strip_task_label(
                &self
                    .planner
                    .ask(
                        RolePrompt::Task,
                        &format!("Thought: {}. Agent Description: {}", thought, agent.description()),
                    )
                    .await,
            );
            self.trace(&format!("{}\n  agent: {}\n  task: {}", thought, agent_name, task));

            // OBSERVE
            let terminal = task == FINAL_ANSWER;
            observation = if terminal {
                task.clone()
            } else {
                let response = agent.handle_message(&task, &agent_context(thread_id, ctx)).await;
                format!("{}{}", OBSERVATION_PREFIX, response)
            };
            self.trace(&truncate_middle(&observation, 50));

            steps.push(ReActStep {
                step: steps.len(),
                thought,
                agent: agent_name,
                task,
                observation: observation.clone(),
            });
            if terminal {
                break;
            }
        }

        self.trace("=== Final Answer ===");
        let answer = observation
            .strip_prefix(OBSERVATION_PREFIX)
            .unwrap_or(&observation)
            .to_string();
        (answer, steps)
    }
}

#[async_trait]
impl Orchestrator for ReActOrchestrator {
    async fn orchestrate(&self, thread_id: &str, message: &str, ctx: &MessageContext) -> String {
        self.orchestrate_traced(thread_id, message, ctx).await.0
    }

    async fn orchestrate_stream(
        &self,
        thread_id: &str,
        message: &str,
        ctx: &MessageContext,
        sink: &mut StreamSink<'_>,
    ) -> String {
        let answer = self.orchestrate(thread_id, message, ctx).await;
        sink(&answer);
        answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::classifiers::RuleClassifier;
    use crate::agents::llm::{MockProvider, MockResponse};
    use crate::agents::orchestration::test_support::fixed_agent;

    /// Planner that answers each role from a script
    fn planner(check: &'static str, task: &'static str) -> (Planner, MockProvider) {
        let provider = MockProvider::new().with_handler(move |request| {
            let reply = match request.system_prompt() {
                Some(p) if p == RolePrompt::FinalAnswerCheck.system_prompt() => check,
                Some(p) if p == RolePrompt::Task.system_prompt() => task,
                _ => "I should ask the helper.",
            };
            Some(MockResponse::text(reply))
        });
        (Planner::new(Arc::new(provider.clone()), LlmConfig::default()), provider)
    }

    async fn orchestrator(check: &'static str, task: &'static str) -> (ReActOrchestrator, MockProvider) {
        let registry = AgentRegistry::new();
        registry.register_agent(fixed_agent("helper", "The answer is 42")).await;
        let classifier = Arc::new(RuleClassifier::new(Vec::new(), Some("helper".to_string())));
        let (planner, provider) = planner(check, task);
        (ReActOrchestrator::new(registry, classifier, planner, None), provider)
    }

    fn check_calls(provider: &MockProvider) -> usize {
        provider
            .requests()
            .iter()
            .filter(|r| r.system_prompt() == Some(RolePrompt::FinalAnswerCheck.system_prompt()))
            .count()
    }

    #[tokio::test]
    async fn test_first_check_is_skipped_for_raw_query() {
        let (orchestrator, provider) = orchestrator("final_answer", "Task: compute it").await;
        let (answer, steps) = orchestrator
            .orchestrate_traced("t", "what is the answer?", &MessageContext::new())
            .await;

        assert_eq!(answer, "The answer is 42");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].task, "compute it");
        assert_eq!(steps[0].agent, "helper");
        assert_eq!(steps[0].observation, "Observation: The answer is 42");
        // Only the check after the first observation reached the planner
        assert_eq!(check_calls(&provider), 1);
    }

    #[tokio::test]
    async fn test_single_step_budget_skips_check() {
        let (orchestrator, provider) = orchestrator("null", "compute it").await;
        let orchestrator = orchestrator.with_max_steps(1);

        let (answer, steps) = orchestrator
            .orchestrate_traced("t", "what is the answer?", &MessageContext::new())
            .await;
        assert_eq!(steps.len(), 1);
        assert_eq!(answer, "The answer is 42");
        assert_eq!(check_calls(&provider), 0);
    }

    #[tokio::test]
    async fn test_step_budget_bounds_loop() {
        let (orchestrator, provider) = orchestrator("null", "compute it").await;
        let (answer, steps) = orchestrator
            .orchestrate_traced("t", "what is the answer?", &MessageContext::new())
            .await;

        assert_eq!(steps.len(), DEFAULT_MAX_STEPS);
        assert_eq!(answer, "The answer is 42");
        assert_eq!(check_calls(&provider), DEFAULT_MAX_STEPS - 1);
    }

    #[tokio::test]
    async fn test_final_answer_task_skips_dispatch() {
        let (orchestrator, _) = orchestrator("null", "Task: final_answer").await;
        let (answer, steps) = orchestrator
            .orchestrate_traced("t", "hello", &MessageContext::new())
            .await;

        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].observation, "final_answer");
        assert_eq!(answer, "final_answer");
    }

    #[tokio::test]
    async fn test_no_resolvable_agent() {
        let classifier = Arc::new(RuleClassifier::default());
        let (planner, _) = planner("null", "x");
        let orchestrator = ReActOrchestrator::new(AgentRegistry::new(), classifier, planner, None);
        assert_eq!(
            orchestrator.orchestrate("t", "hi", &MessageContext::new()).await,
            NO_AGENT_FOUND
        );
    }

    #[test]
    fn test_truncate_middle() {
        assert_eq!(truncate_middle("short\ntext", 50), "short text");
        let long = "a".repeat(60) + &"b".repeat(60);
        let truncated = truncate_middle(&long, 50);
        assert_eq!(truncated, format!("{}...{}", "a".repeat(50), "b".repeat(50)));
    }

    #[test]
    fn test_strip_task_label() {
        assert_eq!(strip_task_label("Task: translate this "), "translate this");
        assert_eq!(strip_task_label("task: final_answer"), "final_answer");
    }
}
