//! Shared fixtures for unit tests: a seeded in-memory store and a scripted model.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::database::{SqliteStore, Store};
use crate::error::{AgentError, Result};
use crate::llm::{ChatMessage, CompletionService, FunctionCall, Role, ToolCall, ToolSpec};
use crate::models::{Account, Facility};

pub const SEEDED_ACCOUNT_ID: &str = "A-011977763";
pub const OTHER_ACCOUNT_ID: &str = "A-022334455";

/// In-memory SQLite store with two accounts and one facility each.
pub async fn seeded_store() -> Arc<dyn Store> {
    let store = SqliteStore::open_in_memory().unwrap();
    store.provision_schema().await.unwrap();

    store
        .upsert_account(&Account {
            account_id: SEEDED_ACCOUNT_ID.to_string(),
            account_name: "Dimod Account".to_string(),
            status: "active".to_string(),
            pricing_model: Some("tiered".to_string()),
            address_line1: Some("100 Congress Ave".to_string()),
            address_city: Some("Austin".to_string()),
            address_state: Some("TX".to_string()),
            address_postal_code: Some("78701".to_string()),
            address_country: Some("US".to_string()),
            current_balance: Some(1250.0),
            current_tier: Some("Gold".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .upsert_account(&Account {
            account_id: OTHER_ACCOUNT_ID.to_string(),
            account_name: "Northwind Account".to_string(),
            status: "inactive".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    store
        .upsert_facility(&Facility {
            facility_id: "F-123456".to_string(),
            facility_name: "Dimod North Clinic".to_string(),
            status: "active".to_string(),
            account_id: SEEDED_ACCOUNT_ID.to_string(),
            medical_license_number: Some("ML-7781".to_string()),
            medical_license_state: Some("TX".to_string()),
            shipping_address_line1: Some("200 Lamar Blvd".to_string()),
            shipping_address_city: Some("Austin".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .upsert_facility(&Facility {
            facility_id: "F-654321".to_string(),
            facility_name: "Northwind Spa".to_string(),
            status: "pending".to_string(),
            account_id: OTHER_ACCOUNT_ID.to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    Arc::new(store)
}

/// Completion service that answers from a closure over the request messages,
/// recording every request it receives.
pub struct ScriptedModel<F> {
    respond: F,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl<F> ScriptedModel<F>
where
    F: Fn(&[ChatMessage]) -> Result<ChatMessage> + Send + Sync,
{
    pub fn new(respond: F) -> Self {
        Self {
            respond,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl<F> CompletionService for ScriptedModel<F>
where
    F: Fn(&[ChatMessage]) -> Result<ChatMessage> + Send + Sync,
{
    async fn complete(&self, messages: &[ChatMessage], _tools: &[ToolSpec]) -> Result<ChatMessage> {
        self.requests.lock().unwrap().push(messages.to_vec());
        (self.respond)(messages)
    }
}

/// Completion service replaying a fixed queue of responses.
pub struct QueuedModel {
    responses: Mutex<VecDeque<Result<ChatMessage>>>,
}

impl QueuedModel {
    pub fn new(responses: Vec<Result<ChatMessage>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait::async_trait]
impl CompletionService for QueuedModel {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> Result<ChatMessage> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AgentError::Completion("script exhausted".to_string())))
    }
}

pub fn tool_request(name: &str, arguments: serde_json::Value) -> ChatMessage {
    ChatMessage {
        role: Role::Assistant,
        content: None,
        tool_calls: Some(vec![ToolCall {
            id: format!("call_{}", name),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }]),
        tool_call_id: None,
    }
}

/// A model that relays the last tool output verbatim, or asks for
/// `fetch_account_details` when the user mentions an account id or name.
pub fn relaying_model(messages: &[ChatMessage]) -> Result<ChatMessage> {
    let last = messages.last().expect("request without messages");
    if last.role == Role::Tool {
        let output = last.content.clone().unwrap_or_default();
        return Ok(ChatMessage::assistant(format!("Here is what I found:\n{}", output)));
    }

    let text = last.content.clone().unwrap_or_default();
    if let Some(id) = text
        .split_whitespace()
        .find(|word| word.starts_with("A-"))
        .map(|word| word.trim_end_matches(|c: char| !c.is_alphanumeric()))
    {
        return Ok(tool_request(
            "fetch_account_details",
            serde_json::json!({ "account_id": id }),
        ));
    }
    const NAME_PROMPT: &str = "Find account named ";
    if let Some(pos) = text.find(NAME_PROMPT) {
        let name = text[pos + NAME_PROMPT.len()..].trim();
        return Ok(tool_request(
            "fetch_account_details",
            serde_json::json!({ "account_name": name }),
        ));
    }
    Ok(ChatMessage::assistant("Hello! How can I help with your accounts today?"))
}
