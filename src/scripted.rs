//! Deterministic scripted backend
//!
//! Responses are chosen from the request alone (agent name, turn, attempt),
//! never from call order, so replaying a task against the same script yields
//! the same stream of events no matter how sibling agents interleave.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use serde_json::Value;

use crate::backend::{BackendChunk, ChunkStream, GenerateRequest, ModelBackend, RequestPurpose};
use crate::error::BackendError;

/// Pre-programmed response for one turn.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    /// Stream these chunks
    Reply(Vec<BackendChunk>),
    /// Fail every attempt of this turn
    Fail(BackendError),
    /// Fail the first `attempts` attempts, then behave like `then`
    FailAttempts {
        attempts: u32,
        error: BackendError,
        then: Box<ScriptStep>,
    },
    /// Stream some chunks, then break the stream with an error
    Truncated(Vec<BackendChunk>, BackendError),
    /// Wait before answering
    Delay(Duration, Box<ScriptStep>),
}

impl ScriptStep {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Reply(vec![BackendChunk::Text(text.into())])
    }

    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self::Reply(vec![BackendChunk::ToolCall {
            name: name.into(),
            arguments,
        }])
    }

    pub fn delayed(delay: Duration, step: ScriptStep) -> Self {
        Self::Delay(delay, Box::new(step))
    }

    pub fn flaky(attempts: u32, error: BackendError, then: ScriptStep) -> Self {
        Self::FailAttempts {
            attempts,
            error,
            then: Box::new(then),
        }
    }
}

/// Record of one `generate` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptedCall {
    pub agent_name: String,
    pub turn: u32,
    pub attempt: u32,
    pub routing: bool,
}

/// Backend answering from per-agent scripts.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: HashMap<String, Vec<ScriptStep>>,
    routes: HashMap<String, ScriptStep>,
    calls: Mutex<Vec<ScriptedCall>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps for the agent called `agent_name`, one per reasoning turn.
    pub fn script(mut self, agent_name: impl Into<String>, steps: Vec<ScriptStep>) -> Self {
        self.scripts.insert(agent_name.into(), steps);
        self
    }

    /// Label answered when the coordinator `agent_name` asks for a route.
    pub fn route(self, agent_name: impl Into<String>, label: impl Into<String>) -> Self {
        self.route_step(agent_name, ScriptStep::text(label))
    }

    /// Full step played when the coordinator `agent_name` asks for a route.
    pub fn route_step(mut self, agent_name: impl Into<String>, step: ScriptStep) -> Self {
        self.routes.insert(agent_name.into(), step);
        self
    }

    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn step_for(&self, request: &GenerateRequest) -> Result<ScriptStep, BackendError> {
        if let RequestPurpose::Route { .. } = request.purpose {
            let step = self.routes.get(&request.agent_name).cloned();
            return Ok(step.unwrap_or_else(|| ScriptStep::Reply(Vec::new())));
        }
        self.scripts
            .get(&request.agent_name)
            .and_then(|steps| steps.get(request.turn as usize))
            .cloned()
            .ok_or_else(|| {
                BackendError::Malformed(format!(
                    "no scripted step for `{}` turn {}",
                    request.agent_name, request.turn
                ))
            })
    }
}

async fn play(mut step: ScriptStep, attempt: u32) -> Result<ChunkStream, BackendError> {
    loop {
        match step {
            ScriptStep::Reply(chunks) => {
                let items = chunks.into_iter().map(Ok::<_, BackendError>);
                return Ok(Box::pin(stream::iter(items)));
            }
            ScriptStep::Fail(error) => return Err(error),
            ScriptStep::FailAttempts {
                attempts,
                error,
                then,
            } => {
                if attempt < attempts {
                    return Err(error);
                }
                step = *then;
            }
            ScriptStep::Truncated(chunks, error) => {
                let items = chunks
                    .into_iter()
                    .map(Ok::<_, BackendError>)
                    .chain(std::iter::once(Err(error)));
                return Ok(Box::pin(stream::iter(items)));
            }
            ScriptStep::Delay(delay, then) => {
                tokio::time::sleep(delay).await;
                step = *then;
            }
        }
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<ChunkStream, BackendError> {
        self.calls.lock().push(ScriptedCall {
            agent_name: request.agent_name.clone(),
            turn: request.turn,
            attempt: request.attempt,
            routing: matches!(request.purpose, RequestPurpose::Route { .. }),
        });
        let step = self.step_for(request)?;
        play(step, request.attempt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AgentPath;
    use futures::StreamExt;
    use serde_json::json;

    fn request(agent: &str, turn: u32, attempt: u32) -> GenerateRequest {
        GenerateRequest {
            agent_path: AgentPath::root(),
            agent_name: agent.into(),
            instructions: None,
            messages: Vec::new(),
            tools: Vec::new(),
            purpose: RequestPurpose::Turn,
            turn,
            attempt,
        }
    }

    async fn drain(stream: ChunkStream) -> Vec<Result<BackendChunk, BackendError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_steps_follow_turns() {
        let backend = ScriptedBackend::new().script(
            "assistant",
            vec![
                ScriptStep::tool_call("echo", json!({"text": "hi"})),
                ScriptStep::text("hi"),
            ],
        );

        let first = drain(backend.generate(&request("assistant", 0, 0)).await.unwrap()).await;
        assert!(matches!(first[0], Ok(BackendChunk::ToolCall { .. })));

        let second = drain(backend.generate(&request("assistant", 1, 0)).await.unwrap()).await;
        assert_eq!(second, vec![Ok(BackendChunk::Text("hi".into()))]);

        // replaying the first turn gives the same answer
        let again = drain(backend.generate(&request("assistant", 0, 0)).await.unwrap()).await;
        assert_eq!(again, first);
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_missing_step_is_malformed() {
        let backend = ScriptedBackend::new();
        let result = backend.generate(&request("assistant", 0, 0)).await;
        assert!(matches!(result, Err(BackendError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_flaky_step_depends_on_attempt() {
        let backend = ScriptedBackend::new().script(
            "assistant",
            vec![ScriptStep::flaky(
                1,
                BackendError::Unavailable("overloaded".into()),
                ScriptStep::text("ok"),
            )],
        );
        assert!(backend.generate(&request("assistant", 0, 0)).await.is_err());
        assert!(backend.generate(&request("assistant", 0, 1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_truncated_stream() {
        let backend = ScriptedBackend::new().script(
            "assistant",
            vec![ScriptStep::Truncated(
                vec![BackendChunk::Text("par".into())],
                BackendError::Malformed("cut".into()),
            )],
        );
        let items = drain(backend.generate(&request("assistant", 0, 0)).await.unwrap()).await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn test_route_answers_label() {
        let backend = ScriptedBackend::new().route("concierge", "billing");
        let mut req = request("concierge", 0, 0);
        req.purpose = RequestPurpose::Route {
            labels: vec!["billing".into()],
        };
        let items = drain(backend.generate(&req).await.unwrap()).await;
        assert_eq!(items, vec![Ok(BackendChunk::Text("billing".into()))]);
        assert!(backend.calls()[0].routing);
    }
}
