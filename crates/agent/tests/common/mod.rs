//! Shared helpers for the request-loop tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use statehive_core::tool::{ATTEMPT_COMPLETION, EXECUTE_SCRIPT};
use statehive_core::{ModelClient, ModelError, ModelRequest, ModelResponse, TokenUsage, ToolCallWire};
use statehive_workspace::{
    Component, ComponentRegistration, Permission, Schema, State, StatefulComponent, Workspace,
};

/// What the scripted client does on one call.
pub enum Step {
    Reply(ModelResponse),
    Fail(ModelError),
    /// Never answer, so the orchestrator's timeout fires.
    Hang,
}

/// A model client that plays back a fixed list of steps and records every
/// request it receives. Once the steps run out it returns empty replies.
pub struct ScriptedClient {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedClient {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn make_request(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        self.requests.lock().unwrap().push(request);
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(response)) => Ok(response),
            Some(Step::Fail(error)) => Err(error),
            Some(Step::Hang) => std::future::pending().await,
            None => Ok(ModelResponse::default()),
        }
    }
}

pub fn tool_reply(name: &str, arguments: Value) -> Step {
    Step::Reply(ModelResponse {
        tool_calls: vec![ToolCallWire::new(name, &arguments)],
        text_response: None,
        request_time_ms: 5,
        token_usage: TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        },
    })
}

pub fn script(source: &str) -> Step {
    tool_reply(EXECUTE_SCRIPT, json!({ "script": source }))
}

pub fn complete(result: &str) -> Step {
    tool_reply(ATTEMPT_COMPLETION, json!({ "result": result }))
}

pub fn text(reply: &str) -> Step {
    Step::Reply(ModelResponse {
        text_response: Some(reply.to_string()),
        ..ModelResponse::default()
    })
}

pub fn int_state(name: &str, value: i64) -> Arc<State> {
    Arc::new(State::new(name, Permission::ReadAndWrite, Schema::Integer, json!(value)).unwrap())
}

pub fn component(name: &str, states: &[Arc<State>]) -> Arc<dyn Component> {
    let mut builder = StatefulComponent::builder(name);
    for state in states {
        builder = builder.shared_state(state.clone());
    }
    Arc::new(builder.build().unwrap())
}

pub fn workspace(components: Vec<(&str, Arc<dyn Component>)>) -> Arc<Workspace> {
    let ws = Workspace::new("test", "Request loop tests");
    for (key, component) in components {
        ws.register_component(ComponentRegistration::new(key, component))
            .unwrap();
    }
    Arc::new(ws)
}
