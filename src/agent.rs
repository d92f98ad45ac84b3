use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::AgentConfig;
use crate::database::Store;
use crate::error::{AgentError, Result};
use crate::llm::{ChatMessage, CompletionService, Role, ToolSpec};
use crate::tools::{ToolRecord, Toolbox};

const SYSTEM_PROMPT: &str = "You are a helpful database assistant for the Evolyn system. You can help users:
1. Fetch account details by account ID or name
2. Fetch facility details by facility ID, name, or account ID
3. Save notes for accounts (use save_note; the account and user come from context when not given)
4. Retrieve notes for accounts (use get_notes; the account comes from context when not given)

Cross-references:
- When only a facility ID is known, fetch_account_details resolves its owning account.
- When only an account ID is known, fetch_facility_details lists that account's facilities.

Facility IDs:
- When the user names a specific facility ID, use exactly that ID.
- If that facility does not exist, answer: \"Sorry, I don't have information for the Facility ID provided by user\"
- Never answer with a different facility just because it is in the context.

Notes:
- For \"Save this note: <content>\", pass only <content> as note_content.
- For ordinal requests (\"last note\", \"second last note\"), fetch notes with limit 10 and pick the right one.

Only fetch the information the user asks for. Return tool output values exactly as received; do not drop or alter any value.
If a message is offensive, answer: \"Apologies, but I wasn't able to locate the information requested.\"";

/// Identifiers supplied by the caller alongside an utterance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatContext {
    pub account_id: Option<String>,
    pub facility_id: Option<String>,
    pub user_id: Option<String>,
}

impl ChatContext {
    /// "Account ID: X. Facility ID: Y. User ID: Z. " for the known parts.
    pub fn prefix(&self) -> String {
        let mut prefix = String::new();
        let parts = [
            ("Account ID", &self.account_id),
            ("Facility ID", &self.facility_id),
            ("User ID", &self.user_id),
        ];
        for (label, value) in parts {
            if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                prefix.push_str(&format!("{}: {}. ", label, value));
            }
        }
        prefix
    }
}

/// Words that mark a request for a full record rather than a single fact.
const OVERVIEW_WORDS: [&str; 4] = ["overview", "detail", "summary", "complete"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    AwaitingUserInput,
    AwaitingModelResponse,
}

/// One conversation: user and assistant turns plus where the exchange stands.
#[derive(Debug, Clone)]
pub struct Conversation {
    history: Vec<ChatMessage>,
    state: ConversationState,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            state: ConversationState::AwaitingUserInput,
        }
    }

    /// Resume from client-held history. Only user and assistant text turns are kept.
    pub fn from_history(messages: Vec<ChatMessage>) -> Self {
        let history = messages
            .into_iter()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant))
            .filter(|m| m.content.as_deref().is_some_and(|c| !c.trim().is_empty()))
            .map(|m| ChatMessage {
                tool_calls: None,
                tool_call_id: None,
                ..m
            })
            .collect();
        Self {
            history,
            state: ConversationState::AwaitingUserInput,
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    fn transition(&mut self, next: ConversationState) {
        log::debug!("Conversation: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// Kind of answer, telling clients which structured payload comes with it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    AccountOverview,
    FacilityOverview,
    NotesOverview,
    #[default]
    Conversational,
}

impl ResponseType {
    /// Pick the response type from the user's words and the records the tools returned.
    ///
    /// Notes always count as a notes overview. Account and facility records only
    /// count when the user asked for an overview, details or a summary; single
    /// facts ("is my account active?") stay conversational.
    pub fn classify(
        utterance: &str,
        records: Vec<ToolRecord>,
    ) -> (ResponseType, Option<ToolRecord>) {
        let lowered = utterance.to_lowercase();
        let wants_overview = OVERVIEW_WORDS.iter().any(|word| lowered.contains(word));

        // The latest record answers the question.
        for record in records.into_iter().rev() {
            let kind = match &record {
                ToolRecord::Notes(_) => ResponseType::NotesOverview,
                ToolRecord::Account(_) if wants_overview => ResponseType::AccountOverview,
                ToolRecord::Facility(_) if wants_overview => ResponseType::FacilityOverview,
                _ => continue,
            };
            return (kind, Some(record));
        }
        (ResponseType::Conversational, None)
    }
}

/// Final answer to one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentReply {
    pub text: String,
    /// Tool names dispatched while producing the answer, in order.
    pub tools_used: Vec<String>,
    pub response_type: ResponseType,
    /// Structured record behind the answer; set for every type but `Conversational`.
    pub details: Option<ToolRecord>,
}

impl AgentReply {
    fn conversational(text: impl Into<String>, tools_used: Vec<String>) -> Self {
        Self {
            text: text.into(),
            tools_used,
            response_type: ResponseType::Conversational,
            details: None,
        }
    }
}

/// Turns utterances into answers by letting the model call database tools.
pub struct Agent {
    model: Arc<dyn CompletionService>,
    toolbox: Toolbox,
    specs: Vec<ToolSpec>,
    max_tool_rounds: usize,
}

impl Agent {
    pub fn new(
        model: Arc<dyn CompletionService>,
        store: Arc<dyn Store>,
        settings: &AgentConfig,
    ) -> Self {
        let toolbox = Toolbox::new(store, settings);
        let specs = toolbox.specs();
        Self {
            model,
            toolbox,
            specs,
            max_tool_rounds: settings.max_tool_rounds.max(1),
        }
    }

    /// Answer one utterance. Never fails: errors become an apology reply and
    /// leave the conversation history untouched.
    pub async fn reply(
        &self,
        conversation: &mut Conversation,
        utterance: &str,
        ctx: &ChatContext,
    ) -> AgentReply {
        conversation.transition(ConversationState::AwaitingModelResponse);
        let outcome = self.run_turn(conversation.history(), utterance, ctx).await;
        conversation.transition(ConversationState::AwaitingUserInput);

        match outcome {
            Ok(reply) => {
                conversation.history.push(ChatMessage::user(utterance));
                conversation.history.push(ChatMessage::assistant(reply.text.clone()));
                reply
            }
            Err(e) => {
                log::error!("Agent: turn failed: {}", e);
                AgentReply::conversational(
                    format!("Sorry, I encountered an error: {}", e),
                    Vec::new(),
                )
            }
        }
    }

    async fn run_turn(
        &self,
        history: &[ChatMessage],
        utterance: &str,
        ctx: &ChatContext,
    ) -> Result<AgentReply> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(SYSTEM_PROMPT));
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(format!("{}{}", ctx.prefix(), utterance)));

        let mut tools_used = Vec::new();
        let mut records = Vec::new();

        for round in 1..=self.max_tool_rounds + 1 {
            log::info!("Agent: model round {} ({} messages)", round, messages.len());
            let response = self.model.complete(&messages, &self.specs).await?;

            let calls = response.requested_tools().to_vec();
            if calls.is_empty() {
                let text = response.content.unwrap_or_default();
                if text.trim().is_empty() {
                    return Err(AgentError::Completion("empty response from model".to_string()));
                }
                let (response_type, details) = ResponseType::classify(utterance, records);
                log::info!("Agent: answered as {:?}", response_type);
                return Ok(AgentReply {
                    text,
                    tools_used,
                    response_type,
                    details,
                });
            }

            if round > self.max_tool_rounds {
                log::warn!("Agent: still requesting tools after {} rounds", self.max_tool_rounds);
                break;
            }

            messages.push(response);
            for call in calls {
                log::info!("Agent: dispatching {}", call.function.name);
                let outcome = self
                    .toolbox
                    .execute(&call.function.name, &call.function.arguments, ctx)
                    .await;
                tools_used.push(call.function.name.clone());
                records.extend(outcome.record);
                messages.push(ChatMessage::tool_result(call.id, outcome.text));
            }
        }

        Ok(AgentReply::conversational(
            "Sorry, I couldn't complete that request. Please try rephrasing it.",
            tools_used,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        relaying_model, seeded_store, tool_request, QueuedModel, ScriptedModel, SEEDED_ACCOUNT_ID,
    };

    fn agent_with(model: Arc<dyn CompletionService>, store: Arc<dyn Store>) -> Agent {
        Agent::new(model, store, &AgentConfig::default())
    }

    #[tokio::test]
    async fn test_account_details_request_reaches_the_answer() {
        let model = Arc::new(ScriptedModel::new(relaying_model));
        let agent = agent_with(model.clone(), seeded_store().await);
        let mut conversation = Conversation::new();

        let reply = agent
            .reply(
                &mut conversation,
                &format!("Show me account details for account_id {}", SEEDED_ACCOUNT_ID),
                &ChatContext::default(),
            )
            .await;

        assert_eq!(reply.tools_used, vec!["fetch_account_details".to_string()]);
        assert!(reply.text.contains("Dimod Account"));
        assert!(reply.text.contains("- Status: active"));
        assert_eq!(model.request_count(), 2);
        assert_eq!(reply.response_type, ResponseType::AccountOverview);
        match reply.details {
            Some(ToolRecord::Account(overview)) => {
                assert_eq!(overview.account.account_id, SEEDED_ACCOUNT_ID);
                assert_eq!(overview.facilities[0].id, "F-123456");
            }
            other => panic!("unexpected details {:?}", other),
        }
        assert_eq!(conversation.history().len(), 2);
        assert_eq!(conversation.state, ConversationState::AwaitingUserInput);
    }

    #[tokio::test]
    async fn test_unknown_account_name_reports_no_match() {
        let model = Arc::new(ScriptedModel::new(relaying_model));
        let agent = agent_with(model, seeded_store().await);
        let mut conversation = Conversation::new();

        let reply = agent
            .reply(&mut conversation, "Find account named Zebra Holdings", &ChatContext::default())
            .await;
        assert!(reply.text.contains("No account found with the provided criteria."));
        assert_eq!(reply.response_type, ResponseType::Conversational);
        assert!(reply.details.is_none());
    }

    #[tokio::test]
    async fn test_single_fact_question_stays_conversational() {
        let model = Arc::new(ScriptedModel::new(relaying_model));
        let agent = agent_with(model, seeded_store().await);
        let mut conversation = Conversation::new();

        let reply = agent
            .reply(
                &mut conversation,
                &format!("Is {} active?", SEEDED_ACCOUNT_ID),
                &ChatContext::default(),
            )
            .await;
        assert_eq!(reply.tools_used, vec!["fetch_account_details".to_string()]);
        assert_eq!(reply.response_type, ResponseType::Conversational);
        assert!(reply.details.is_none());
    }

    #[tokio::test]
    async fn test_facility_details_request_carries_the_facility() {
        let model = Arc::new(QueuedModel::new(vec![
            Ok(tool_request(
                "fetch_facility_details",
                serde_json::json!({ "facility_id": "F-123456" }),
            )),
            Ok(ChatMessage::assistant("Dimod North Clinic is active.")),
        ]));
        let agent = agent_with(model, seeded_store().await);
        let mut conversation = Conversation::new();

        let reply = agent
            .reply(
                &mut conversation,
                "Show me facility details for F-123456",
                &ChatContext::default(),
            )
            .await;
        assert_eq!(reply.response_type, ResponseType::FacilityOverview);
        match reply.details {
            Some(ToolRecord::Facility(facility)) => {
                assert_eq!(facility.facility_id, "F-123456");
                assert_eq!(facility.account_name.as_deref(), Some("Dimod Account"));
            }
            other => panic!("unexpected details {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_notes_request_carries_the_notes() {
        let model = Arc::new(QueuedModel::new(vec![
            Ok(tool_request("get_notes", serde_json::json!({ "limit": 10 }))),
            Ok(ChatMessage::assistant("There are no notes yet.")),
        ]));
        let agent = agent_with(model, seeded_store().await);
        let mut conversation = Conversation::new();
        let ctx = ChatContext {
            account_id: Some(SEEDED_ACCOUNT_ID.to_string()),
            ..Default::default()
        };

        let reply = agent
            .reply(&mut conversation, "Show me the last note", &ctx)
            .await;
        assert_eq!(reply.response_type, ResponseType::NotesOverview);
        match reply.details {
            Some(ToolRecord::Notes(list)) => {
                assert_eq!(list.account_id, SEEDED_ACCOUNT_ID);
                assert_eq!(list.total_count, 0);
            }
            other => panic!("unexpected details {:?}", other),
        }
    }

    #[test]
    fn test_response_type_serializes_snake_case() {
        let json = serde_json::to_value(ResponseType::AccountOverview).unwrap();
        assert_eq!(json, "account_overview");
        assert_eq!(ResponseType::default(), ResponseType::Conversational);
    }

    #[tokio::test]
    async fn test_completion_failure_becomes_apology() {
        let model = Arc::new(QueuedModel::new(vec![Err(AgentError::Completion(
            "API error (500): boom".to_string(),
        ))]));
        let agent = agent_with(model, seeded_store().await);
        let mut conversation = Conversation::new();

        let reply = agent.reply(&mut conversation, "hello", &ChatContext::default()).await;
        assert!(reply.text.starts_with("Sorry, I encountered an error:"));
        assert!(reply.text.contains("boom"));
        assert_eq!(reply.response_type, ResponseType::Conversational);
        assert!(conversation.history().is_empty());
        assert_eq!(conversation.state, ConversationState::AwaitingUserInput);
    }

    #[tokio::test]
    async fn test_tool_rounds_are_bounded() {
        let model = Arc::new(ScriptedModel::new(|_: &[ChatMessage]| {
            Ok(tool_request("get_notes", serde_json::json!({ "account_id": SEEDED_ACCOUNT_ID })))
        }));
        let agent = agent_with(model.clone(), seeded_store().await);
        let mut conversation = Conversation::new();

        let reply = agent.reply(&mut conversation, "notes please", &ChatContext::default()).await;
        let rounds = AgentConfig::default().max_tool_rounds;
        assert_eq!(model.request_count(), rounds + 1);
        assert_eq!(reply.tools_used.len(), rounds);
        assert!(reply.text.starts_with("Sorry, I couldn't complete that request."));
    }

    #[tokio::test]
    async fn test_context_prefixes_utterance_and_fills_tool_arguments() {
        let model = Arc::new(QueuedModel::new(vec![
            Ok(tool_request(
                "save_note",
                serde_json::json!({ "note_content": "call back Friday" }),
            )),
            Ok(ChatMessage::assistant("Saved.")),
        ]));
        let store = seeded_store().await;
        let agent = agent_with(model, Arc::clone(&store));
        let mut conversation = Conversation::new();
        let ctx = ChatContext {
            account_id: Some(SEEDED_ACCOUNT_ID.to_string()),
            facility_id: None,
            user_id: Some("rep@example.com".to_string()),
        };

        let reply = agent
            .reply(&mut conversation, "Save this note: call back Friday", &ctx)
            .await;
        assert_eq!(reply.text, "Saved.");

        let notes = store.notes_for_account(SEEDED_ACCOUNT_ID, 10).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].created_by, "rep@example.com");
        assert_eq!(
            ctx.prefix(),
            format!("Account ID: {}. User ID: rep@example.com. ", SEEDED_ACCOUNT_ID)
        );
        assert_eq!(
            conversation.history()[0].content.as_deref(),
            Some("Save this note: call back Friday")
        );
    }

    #[test]
    fn test_from_history_keeps_text_turns_only() {
        let conversation = Conversation::from_history(vec![
            ChatMessage::system("ignored"),
            ChatMessage::user("hi"),
            ChatMessage::tool_result("call_1", "ignored"),
            ChatMessage::assistant("hello"),
            ChatMessage::assistant("   "),
        ]);
        let roles: Vec<Role> = conversation.history().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
    }
}
