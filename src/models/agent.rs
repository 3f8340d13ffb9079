// Agent declarations (spec.md §4.10 "Agent Invocation Hook").
//
// Kept close to the teacher's `models::agent` (`LLMProvider`,
// `LLMConfig`, `AgentRetryConfig`, `AgentExecution`): the shape of "what
// an LLM-backed handler is configured with" barely changes between a
// workflow-activity agent and an Agentlang agent. `AgentDefinition`
// itself is reshaped to the spec's `(name, role, instruction, llm,
// tools, flows?, scenarios?, directives?, glossary?)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for an agent definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AgentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<super::ids::LocalName> for AgentId {
    fn from(name: super::ids::LocalName) -> Self {
        Self(name.as_str().to_string())
    }
}

/// LLM provider configuration. The wire protocol for each variant is
/// an external collaborator (spec.md §1); only the shape the core
/// hands to the invocation hook lives here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LLMProvider {
    OpenAI {
        api_key: String,
        model: String,
        base_url: Option<String>,
    },
    Anthropic {
        api_key: String,
        model: String,
        base_url: Option<String>,
    },
    Google {
        api_key: String,
        model: String,
    },
    Ollama {
        base_url: String,
        model: String,
    },
    Custom {
        endpoint: String,
        headers: HashMap<String, String>,
        model: String,
    },
}

/// LLM generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub stop_sequences: Vec<String>,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: Some(1000),
            top_p: Some(0.9),
            frequency_penalty: Some(0.0),
            presence_penalty: Some(0.0),
            stop_sequences: vec![],
        }
    }
}

/// A usage scenario the agent should recognize, named the way the
/// spec's `scenarios?` field is: free-form guidance text keyed by a
/// short label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentScenario {
    pub label: String,
    pub description: String,
}

/// An agent definition: `(name, role, instruction, llm, tools, flows?,
/// scenarios?, directives?, glossary?)` (spec.md §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    pub role: String,
    pub instruction: String,
    pub llm_provider: LLMProvider,
    pub llm_config: LLMConfig,
    /// Names of plug-in functions (or nested workflows) the agent is
    /// permitted to invoke.
    pub tools: Vec<String>,
    /// Named sub-workflows the agent can delegate to.
    pub flows: Vec<String>,
    pub scenarios: Vec<AgentScenario>,
    /// Free-form behavioral constraints folded into the system prompt.
    pub directives: Vec<String>,
    /// Domain terms the agent should interpret consistently.
    pub glossary: HashMap<String, String>,
    pub retry_config: AgentRetryConfig,
}

/// Retry configuration for agent execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRetryConfig {
    pub max_attempts: u32,
    pub backoff_seconds: u64,
    pub retry_on_errors: Vec<String>,
}

impl Default for AgentRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_seconds: 10,
            retry_on_errors: vec![
                "timeout".to_string(),
                "rate_limit".to_string(),
                "network_error".to_string(),
            ],
        }
    }
}

/// Agent execution status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AgentExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

/// One invocation of an agent, bound to the event instance that
/// triggered it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecution {
    pub id: Uuid,
    pub agent_id: AgentId,
    pub status: AgentExecutionStatus,
    pub input_data: serde_json::Value,
    pub output_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub retry_count: u32,
}

impl AgentExecution {
    pub fn new(agent_id: AgentId, input_data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            status: AgentExecutionStatus::Pending,
            input_data,
            output_data: None,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            retry_count: 0,
        }
    }

    pub fn start(&mut self) {
        self.status = AgentExecutionStatus::Running;
        self.started_at = Utc::now();
    }

    pub fn complete(&mut self, output: serde_json::Value) {
        self.status = AgentExecutionStatus::Completed;
        self.output_data = Some(output);
        let now = Utc::now();
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds() as u64);
    }

    pub fn fail(&mut self, error: String) {
        self.status = AgentExecutionStatus::Failed;
        self.error_message = Some(error);
        let now = Utc::now();
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_lifecycle_tracks_duration() {
        let mut exec = AgentExecution::new(AgentId::from("summarizer"), serde_json::json!({"x": 1}));
        exec.start();
        assert_eq!(exec.status, AgentExecutionStatus::Running);
        exec.complete(serde_json::json!({"y": 2}));
        assert_eq!(exec.status, AgentExecutionStatus::Completed);
        assert!(exec.duration_ms.is_some());
    }

    #[test]
    fn failed_execution_records_error_message() {
        let mut exec = AgentExecution::new(AgentId::from("summarizer"), serde_json::json!({}));
        exec.fail("timeout".into());
        assert_eq!(exec.status, AgentExecutionStatus::Failed);
        assert_eq!(exec.error_message.as_deref(), Some("timeout"));
    }
}
