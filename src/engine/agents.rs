// The Agent Invocation Hook (spec.md §4.10).
//
// Generalizes the teacher's `AgentStorage` trait: there, the engine
// owned a concrete LLM wire client (OpenAI/Anthropic/Google/Ollama,
// all behind `reqwest`) and retried the HTTP call itself. Here, the
// evaluator never talks to a provider directly — an agent-typed
// workflow step hands the agent definition and a `statementsExecutor`
// callback to whatever the host plugs in, and the host's answer comes
// back as zero or more statements to run inside the *current*
// transaction. The retry/backoff shape of `AgentRetryConfig` is kept
// as-is; it governs how the core schedules invocation attempts, which
// is a core concern, even though the attempt itself is the host's.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use std::time::Duration;

use tracing::{info, warn};

use crate::error::{AgentlangError, Result};
use crate::models::{AgentDefinition, Instance, Statement};

/// What the evaluator hands to the invocation hook when an agent-typed
/// statement is reached: the agent's declaration, the triggering
/// instance (usually the event that started the workflow), and a
/// callback the provider can use to compile follow-up statements into
/// a runnable sub-graph before handing them back (spec.md §4.10,
/// "hands the agent a callback `statementsExecutor`").
pub struct AgentInvocationRequest<'a> {
    pub agent: &'a AgentDefinition,
    pub trigger: &'a Instance,
    /// Free-form input the workflow computed for this invocation, e.g.
    /// the result of evaluating the step's argument expression.
    pub input: serde_json::Value,
}

/// What a provider may return: free-form output for the caller to
/// bind via the statement's alias, plus zero or more statements the
/// evaluator should run in the *current* environment and transaction
/// (spec.md §4.10, "their effects are transactional like any other
/// statement").
#[derive(Debug, Clone, Default)]
pub struct AgentInvocationResult {
    pub output: serde_json::Value,
    pub generated_statements: Vec<Statement>,
}

type CompiledStatements = Vec<Statement>;

/// The `statementsExecutor(statements[]) -> compiled sub-graph`
/// callback from spec.md §4.10. A provider that wants to hand
/// generated statements straight back simply echoes its input; a
/// provider that wants to pre-validate or partially fold constants
/// before the evaluator sees them can do so here.
pub type StatementsExecutor =
    dyn Fn(Vec<Statement>) -> Pin<Box<dyn Future<Output = Result<CompiledStatements>> + Send>> + Send + Sync;

/// External collaborator the core delegates agent-typed steps to
/// (spec.md §1, "LLM provider adapters... consumed via an
/// agent-invocation hook"; §4.10). The host implements this against
/// whatever LLM client it chooses; the core never constructs an HTTP
/// request itself.
#[async_trait::async_trait]
pub trait AgentInvocationHook: Send + Sync {
    async fn invoke(
        &self,
        request: AgentInvocationRequest<'_>,
        statements_executor: Arc<StatementsExecutor>,
    ) -> Result<AgentInvocationResult>;
}

/// Runs `hook.invoke` under the agent's own `AgentRetryConfig`
/// (spec.md §4.10, §5 "each resolver call... timeout -> retry ->
/// circuit-breaker" — an agent call is the same kind of "may suspend"
/// operation, so it gets the same retry discipline, minus the circuit
/// breaker, since a single agent has no shared-pool state to trip).
pub async fn invoke_with_retry(
    hook: &dyn AgentInvocationHook,
    request: AgentInvocationRequest<'_>,
    statements_executor: Arc<StatementsExecutor>,
) -> Result<AgentInvocationResult> {
    let retry = request.agent.retry_config.clone();
    let mut attempt: u32 = 0;
    loop {
        match hook
            .invoke(
                AgentInvocationRequest {
                    agent: request.agent,
                    trigger: request.trigger,
                    input: request.input.clone(),
                },
                Arc::clone(&statements_executor),
            )
            .await
        {
            Ok(result) => return Ok(result),
            Err(err) if attempt < retry.max_attempts.saturating_sub(1) => {
                warn!(agent = %request.agent.name, attempt, error = %err, "agent invocation failed, retrying");
                tokio::time::sleep(Duration::from_secs(retry.backoff_seconds)).await;
                attempt += 1;
            }
            Err(err) => {
                return Err(AgentlangError::ResolverUnavailable(format!(
                    "agent {} failed after {} attempts: {err}",
                    request.agent.name,
                    attempt + 1
                )))
            }
        }
    }
}

/// A hook with no backing provider: returns the trigger's plain-data
/// projection as output and generates no statements. Useful as the
/// default when a host hasn't wired an LLM adapter yet, and in tests
/// that exercise agent-typed steps without a real provider.
#[derive(Debug, Default)]
pub struct NoopAgentHook;

#[async_trait::async_trait]
impl AgentInvocationHook for NoopAgentHook {
    async fn invoke(
        &self,
        request: AgentInvocationRequest<'_>,
        _statements_executor: Arc<StatementsExecutor>,
    ) -> Result<AgentInvocationResult> {
        info!(agent = %request.agent.name, "no agent hook configured, returning trigger as-is");
        Ok(AgentInvocationResult {
            output: request.trigger.to_plain_data(),
            generated_statements: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentRetryConfig, FqName, Instance, LLMConfig, LLMProvider};

    fn agent(max_attempts: u32) -> AgentDefinition {
        AgentDefinition {
            name: "Summarizer".into(),
            role: "summarizer".into(),
            instruction: "summarize the input".into(),
            llm_provider: LLMProvider::Ollama {
                base_url: "http://localhost:11434".into(),
                model: "llama3".into(),
            },
            llm_config: LLMConfig::default(),
            tools: vec![],
            flows: vec![],
            scenarios: vec![],
            directives: vec![],
            glossary: Default::default(),
            retry_config: AgentRetryConfig {
                max_attempts,
                backoff_seconds: 0,
                retry_on_errors: vec![],
            },
        }
    }

    fn trigger() -> Instance {
        Instance::new(FqName::new("M", "E"), vec![])
    }

    fn echo_executor() -> Arc<StatementsExecutor> {
        Arc::new(|statements: Vec<Statement>| Box::pin(async move { Ok(statements) }))
    }

    struct FlakyHook {
        fails_before_success: std::sync::atomic::AtomicU32,
    }

    #[async_trait::async_trait]
    impl AgentInvocationHook for FlakyHook {
        async fn invoke(
            &self,
            request: AgentInvocationRequest<'_>,
            _statements_executor: Arc<StatementsExecutor>,
        ) -> Result<AgentInvocationResult> {
            let remaining = self.fails_before_success.load(std::sync::atomic::Ordering::SeqCst);
            if remaining > 0 {
                self.fails_before_success.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                return Err(AgentlangError::ResolverUnavailable("provider unreachable".into()));
            }
            Ok(AgentInvocationResult {
                output: request.trigger.to_plain_data(),
                generated_statements: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn noop_hook_echoes_the_trigger_as_output() {
        let hook = NoopAgentHook;
        let agent_def = agent(1);
        let trigger = trigger();
        let result = invoke_with_retry(
            &hook,
            AgentInvocationRequest {
                agent: &agent_def,
                trigger: &trigger,
                input: serde_json::json!({}),
            },
            echo_executor(),
        )
        .await
        .unwrap();
        assert_eq!(result.output, trigger.to_plain_data());
        assert!(result.generated_statements.is_empty());
    }

    #[tokio::test]
    async fn retries_until_the_configured_attempt_budget_is_exhausted() {
        let hook = FlakyHook {
            fails_before_success: std::sync::atomic::AtomicU32::new(2),
        };
        let agent_def = agent(3);
        let trigger = trigger();
        let result = invoke_with_retry(
            &hook,
            AgentInvocationRequest {
                agent: &agent_def,
                trigger: &trigger,
                input: serde_json::json!({}),
            },
            echo_executor(),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn exhausting_the_retry_budget_surfaces_resolver_unavailable() {
        let hook = FlakyHook {
            fails_before_success: std::sync::atomic::AtomicU32::new(5),
        };
        let agent_def = agent(2);
        let trigger = trigger();
        let result = invoke_with_retry(
            &hook,
            AgentInvocationRequest {
                agent: &agent_def,
                trigger: &trigger,
                input: serde_json::json!({}),
            },
            echo_executor(),
        )
        .await;
        assert!(matches!(result, Err(AgentlangError::ResolverUnavailable(_))));
    }
}
