//! Default peer handler installed when an agent joins a team
//!
//! Serves three envelope types:
//!
//! - `task_request`: stage the task description and delegator into the input
//!   state, execute the agent, reply with a [`ResultPayload`];
//! - `question`: execute with `{_question, _asked_by, message}` and reply
//!   with `{answer: state.response ?? state.answer}`;
//! - `broadcast`: merge the decoded body into the team's shared context,
//!   no reply.
//!
//! Handlers run detached on the bus with a background cancellation scope, so
//! a delegation keeps executing even if the requester abandons its wait.

use drover_bus::{
    AnswerPayload, Envelope, EnvelopeType, QuestionPayload, ResultPayload, TaskPayload,
};
use drover_core::Agent;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tooling::CancelToken;
use tracing::debug;

type HandlerResult = std::result::Result<Option<Envelope>, String>;

pub(crate) fn default_peer_handler(
    agent: Arc<Agent>,
    shared: Arc<Mutex<Map<String, Value>>>,
) -> impl Fn(Envelope) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static {
    move |envelope: Envelope| {
        let agent = agent.clone();
        let shared = shared.clone();
        let fut: BoxFuture<'static, HandlerResult> = Box::pin(async move {
            match envelope.envelope_type {
                EnvelopeType::TaskRequest => handle_task(agent, envelope).await,
                EnvelopeType::Question => handle_question(agent, envelope).await,
                EnvelopeType::Broadcast => {
                    if let Value::Object(update) = &envelope.body {
                        let mut shared = shared.lock();
                        for (key, value) in update {
                            shared.insert(key.clone(), value.clone());
                        }
                    }
                    Ok(None)
                }
                _ => {
                    debug!(peer = agent.id(), kind = ?envelope.envelope_type, "ignoring envelope");
                    Ok(None)
                }
            }
        });
        fut
    }
}

async fn handle_task(agent: Arc<Agent>, envelope: Envelope) -> HandlerResult {
    let payload: TaskPayload =
        serde_json::from_value(envelope.body.clone()).map_err(|e| e.to_string())?;

    let mut state = payload.input;
    state.insert("_task_description".to_string(), json!(payload.description));
    state.insert("_delegated_by".to_string(), json!(envelope.from));

    let result = agent
        .execute(&CancelToken::new(), state)
        .await
        .map_err(|e| e.to_string())?;

    let reply = Envelope::new(EnvelopeType::TaskResult, agent.id(), envelope.from.as_str())
        .with_subject(envelope.subject.clone())
        .with_body(serde_json::to_value(ResultPayload::ok(result)).map_err(|e| e.to_string())?);
    Ok(Some(reply))
}

async fn handle_question(agent: Arc<Agent>, envelope: Envelope) -> HandlerResult {
    let payload: QuestionPayload =
        serde_json::from_value(envelope.body.clone()).map_err(|e| e.to_string())?;

    let mut state = Map::new();
    state.insert("_question".to_string(), json!(payload.question));
    state.insert("_asked_by".to_string(), json!(envelope.from));
    state.insert("message".to_string(), json!(payload.question));

    let result = agent
        .execute(&CancelToken::new(), state)
        .await
        .map_err(|e| e.to_string())?;

    let answer = result
        .get("response")
        .or_else(|| result.get("answer"))
        .cloned()
        .unwrap_or(Value::Null);

    let reply = Envelope::new(EnvelopeType::Answer, agent.id(), envelope.from.as_str())
        .with_subject(envelope.subject.clone())
        .with_body(serde_json::to_value(AnswerPayload { answer }).map_err(|e| e.to_string())?);
    Ok(Some(reply))
}
