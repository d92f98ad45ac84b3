pub mod account_lookup;
pub mod facility_lookup;
pub mod note_writer;
pub mod notes_reader;

pub use account_lookup::{AccountLookup, AccountQuery};
pub use facility_lookup::FacilityLookup;
pub use note_writer::{NoteDraft, NoteWriter};
pub use notes_reader::{NotesQuery, NotesReader};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt::Display;
use std::sync::Arc;

use crate::agent::ChatContext;
use crate::config::AgentConfig;
use crate::database::{FacilityFilter, Store};
use crate::error::{AgentError, Result};
use crate::llm::{FunctionSpec, ToolSpec};
use crate::models::{AccountOverview, Facility, NotesList};

/// Tool trait for model-requested database operations.
///
/// Not object-safe (associated input type). Dispatch goes through the
/// closed [`DatabaseTool`] enum, never `dyn Tool`.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    type Input: Send;
    /// Typed result; its `Display` form is what the model reads.
    type Output: Display + Send;

    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON Schema of the arguments the model may send.
    fn parameters(&self) -> serde_json::Value;

    async fn run(&self, input: Self::Input) -> Result<Self::Output>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            tool_type: "function",
            function: FunctionSpec {
                name: self.name(),
                description: self.description(),
                parameters: self.parameters(),
            },
        }
    }
}

/// Every tool the model can request, with its parsed arguments.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "name", content = "arguments", rename_all = "snake_case")]
pub enum DatabaseTool {
    FetchAccountDetails(AccountQuery),
    FetchFacilityDetails(FacilityFilter),
    SaveNote(NoteDraft),
    GetNotes(NotesQuery),
}

impl DatabaseTool {
    /// Parse a model tool call (`name` plus JSON-encoded arguments).
    pub fn parse(name: &str, arguments: &str) -> Result<Self> {
        let arguments: serde_json::Value = if arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(arguments).map_err(|e| {
                AgentError::Validation(format!("Invalid arguments for tool '{}': {}", name, e))
            })?
        };

        serde_json::from_value(serde_json::json!({ "name": name, "arguments": arguments }))
            .map_err(|e| {
                if KNOWN_TOOLS.contains(&name) {
                    AgentError::Validation(format!("Invalid arguments for tool '{}': {}", name, e))
                } else {
                    AgentError::Validation(format!("Unknown tool: {}", name))
                }
            })
    }

    pub fn name(&self) -> &'static str {
        match self {
            DatabaseTool::FetchAccountDetails(_) => "fetch_account_details",
            DatabaseTool::FetchFacilityDetails(_) => "fetch_facility_details",
            DatabaseTool::SaveNote(_) => "save_note",
            DatabaseTool::GetNotes(_) => "get_notes",
        }
    }

    /// Fill parameters the model left out from the conversation context.
    pub fn with_context(self, ctx: &ChatContext) -> Self {
        match self {
            DatabaseTool::FetchAccountDetails(mut query) => {
                if query.is_empty() {
                    query.account_id = ctx.account_id.clone();
                    query.facility_id = ctx.facility_id.clone();
                }
                DatabaseTool::FetchAccountDetails(query)
            }
            DatabaseTool::FetchFacilityDetails(mut filter) => {
                if filter.is_empty() {
                    if ctx.facility_id.is_some() {
                        filter.facility_id = ctx.facility_id.clone();
                    } else {
                        filter.account_id = ctx.account_id.clone();
                    }
                }
                DatabaseTool::FetchFacilityDetails(filter)
            }
            DatabaseTool::SaveNote(mut draft) => {
                if non_blank(&draft.account_id).is_none() {
                    draft.account_id = ctx.account_id.clone();
                    draft.facility_id = ctx.facility_id.clone();
                }
                draft.author = ctx.user_id.clone();
                DatabaseTool::SaveNote(draft)
            }
            DatabaseTool::GetNotes(mut query) => {
                if non_blank(&query.account_id).is_none() {
                    query.account_id = ctx.account_id.clone();
                    query.facility_id = ctx.facility_id.clone();
                }
                DatabaseTool::GetNotes(query)
            }
        }
    }
}

const KNOWN_TOOLS: &[&str] = &[
    "fetch_account_details",
    "fetch_facility_details",
    "save_note",
    "get_notes",
];

/// Structured record a tool call produced, kept for the caller's response payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRecord {
    Account(AccountOverview),
    Facility(Facility),
    Notes(NotesList),
}

/// Result of one dispatched tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    /// Text handed back to the model.
    pub text: String,
    pub record: Option<ToolRecord>,
}

impl ToolOutcome {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            record: None,
        }
    }
}

/// The four database tools and their dispatch table.
pub struct Toolbox {
    account_lookup: AccountLookup,
    facility_lookup: FacilityLookup,
    note_writer: NoteWriter,
    notes_reader: NotesReader,
}

impl Toolbox {
    pub fn new(store: Arc<dyn Store>, settings: &AgentConfig) -> Self {
        Self {
            account_lookup: AccountLookup::new(Arc::clone(&store)),
            facility_lookup: FacilityLookup::new(Arc::clone(&store)),
            note_writer: NoteWriter::new(Arc::clone(&store), settings.note_author.clone()),
            notes_reader: NotesReader::new(store, settings.notes_limit),
        }
    }

    /// Declarations sent to the model with every completion request.
    pub fn specs(&self) -> Vec<ToolSpec> {
        vec![
            self.account_lookup.spec(),
            self.facility_lookup.spec(),
            self.note_writer.spec(),
            self.notes_reader.spec(),
        ]
    }

    /// Parse and run one model tool call. Always yields text for the model.
    pub async fn execute(&self, name: &str, arguments: &str, ctx: &ChatContext) -> ToolOutcome {
        match DatabaseTool::parse(name, arguments) {
            Ok(tool) => self.dispatch(tool.with_context(ctx)).await,
            Err(e) => {
                log::warn!("Toolbox: rejected tool call {}: {}", name, e);
                ToolOutcome::plain(e.to_string())
            }
        }
    }

    /// Run a parsed tool. Failures are rendered, never propagated.
    pub async fn dispatch(&self, tool: DatabaseTool) -> ToolOutcome {
        let name = tool.name();
        let result = match tool {
            DatabaseTool::FetchAccountDetails(query) => {
                self.account_lookup.run(query).await.map(|report| ToolOutcome {
                    text: report.to_string(),
                    record: report.into_overview().map(ToolRecord::Account),
                })
            }
            DatabaseTool::FetchFacilityDetails(filter) => {
                self.facility_lookup.run(filter).await.map(|report| ToolOutcome {
                    text: report.to_string(),
                    record: report.into_single().map(ToolRecord::Facility),
                })
            }
            DatabaseTool::SaveNote(draft) => self
                .note_writer
                .run(draft)
                .await
                .map(|saved| ToolOutcome::plain(saved.to_string())),
            DatabaseTool::GetNotes(query) => {
                self.notes_reader.run(query).await.map(|list| ToolOutcome {
                    text: list.to_string(),
                    record: Some(ToolRecord::Notes(list)),
                })
            }
        };

        match result {
            Ok(outcome) => outcome,
            Err(AgentError::Validation(message)) => ToolOutcome::plain(message),
            Err(e) => {
                log::error!("Toolbox: {} failed: {}", name, e);
                ToolOutcome::plain(format!("{}: {}", failure_prefix(name), e))
            }
        }
    }
}

fn failure_prefix(name: &str) -> &'static str {
    match name {
        "fetch_account_details" => "Could not retrieve account details",
        "fetch_facility_details" => "Could not retrieve facility details",
        "save_note" => "Could not save note",
        _ => "Could not retrieve notes",
    }
}

pub(crate) fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Owning account of a facility, used when only a facility id is known.
pub(crate) async fn account_of_facility(store: &dyn Store, facility_id: &str) -> Result<String> {
    let filter = FacilityFilter {
        facility_id: Some(facility_id.to_string()),
        ..Default::default()
    };
    store
        .facilities(&filter)
        .await?
        .into_iter()
        .next()
        .map(|facility| facility.account_id)
        .ok_or_else(|| AgentError::NotFound(format!("facility '{}'", facility_id)))
}

pub(crate) fn or_na<T: Display>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "N/A".to_string())
}

pub(crate) fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

pub(crate) fn money(value: Option<f64>) -> String {
    or_na(value.map(|v| format!("${:.2}", v)))
}

pub(crate) fn timestamp(value: Option<DateTime<Utc>>) -> String {
    or_na(value.map(|v| v.format("%Y-%m-%d %H:%M:%S UTC")))
}
