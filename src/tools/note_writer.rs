use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

use super::{account_of_facility, non_blank, timestamp, Tool};
use crate::database::Store;
use crate::error::{AgentError, Result};
use crate::models::NewNote;

/// Arguments of `save_note`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NoteDraft {
    pub note_content: Option<String>,
    pub account_id: Option<String>,
    /// Facility from the conversation context; the note goes to its owning account.
    #[serde(skip)]
    pub facility_id: Option<String>,
    /// Caller identity from the conversation context.
    #[serde(skip)]
    pub author: Option<String>,
}

/// Confirmation of a stored note.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedNote {
    pub note_id: i64,
    pub account_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl fmt::Display for SavedNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "✅ Note saved successfully!\n\
             - Note ID: {}\n\
             - Account ID: {}\n\
             - Content: {}\n\
             - Created: {}\n\
             - Created by: {}",
            self.note_id,
            self.account_id,
            self.content,
            timestamp(Some(self.created_at)),
            self.created_by
        )
    }
}

/// Appends notes to an account.
pub struct NoteWriter {
    store: Arc<dyn Store>,
    default_author: String,
}

impl NoteWriter {
    pub fn new(store: Arc<dyn Store>, default_author: String) -> Self {
        Self {
            store,
            default_author,
        }
    }

    async fn target_account(&self, draft: &NoteDraft) -> Result<String> {
        let account_id = match (non_blank(&draft.account_id), non_blank(&draft.facility_id)) {
            (Some(id), _) => id.to_string(),
            (None, Some(facility_id)) => {
                account_of_facility(self.store.as_ref(), facility_id).await?
            }
            (None, None) => {
                return Err(AgentError::Validation(
                    "Account ID is required to save a note.".to_string(),
                ))
            }
        };

        if !self.store.account_exists(&account_id).await? {
            return Err(AgentError::NotFound(format!("account '{}'", account_id)));
        }
        Ok(account_id)
    }
}

#[async_trait::async_trait]
impl Tool for NoteWriter {
    type Input = NoteDraft;
    type Output = SavedNote;

    fn name(&self) -> &'static str {
        "save_note"
    }

    fn description(&self) -> &'static str {
        "Save a note for an account. Use when the user asks to record, remember or note something. \
         Without an account_id, the account from the conversation context is used."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "note_content": {
                    "type": "string",
                    "description": "Text of the note"
                },
                "account_id": {
                    "type": "string",
                    "description": "Account the note belongs to"
                }
            },
            "required": ["note_content"]
        })
    }

    async fn run(&self, draft: NoteDraft) -> Result<SavedNote> {
        let content = non_blank(&draft.note_content)
            .ok_or_else(|| AgentError::Validation("Note content cannot be empty.".to_string()))?
            .to_string();
        let account_id = self.target_account(&draft).await?;
        let author = non_blank(&draft.author)
            .unwrap_or(&self.default_author)
            .to_string();

        let note = NewNote {
            account_id,
            content,
            author,
        };
        let receipt = self.store.insert_note(&note).await?;
        log::info!(
            "NoteWriter: saved note {} for account {}",
            receipt.note_id,
            note.account_id
        );

        Ok(SavedNote {
            note_id: receipt.note_id,
            account_id: note.account_id,
            content: note.content,
            created_at: receipt.created_at,
            created_by: note.author,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seeded_store, OTHER_ACCOUNT_ID, SEEDED_ACCOUNT_ID};

    fn draft(account_id: &str, content: &str) -> NoteDraft {
        NoteDraft {
            note_content: Some(content.to_string()),
            account_id: Some(account_id.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_saved_note_is_listed_for_account() {
        let store = seeded_store().await;
        let writer = NoteWriter::new(Arc::clone(&store), "conversational_agent".to_string());

        let saved = writer
            .run(draft(SEEDED_ACCOUNT_ID, "  Follow up next week  "))
            .await
            .unwrap();
        assert_eq!(saved.content, "Follow up next week");
        let text = saved.to_string();
        assert!(text.starts_with("✅ Note saved successfully!"));
        assert!(text.contains("- Content: Follow up next week\n"));
        assert!(text.ends_with("- Created by: conversational_agent"));

        let notes = store.notes_for_account(SEEDED_ACCOUNT_ID, 10).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].note_content, "Follow up next week");
    }

    #[tokio::test]
    async fn test_concurrent_saves_do_not_interfere() {
        let store = seeded_store().await;
        let writer = NoteWriter::new(Arc::clone(&store), "conversational_agent".to_string());

        let (first, second) = tokio::join!(
            writer.run(draft(SEEDED_ACCOUNT_ID, "note for dimod")),
            writer.run(draft(OTHER_ACCOUNT_ID, "note for northwind")),
        );
        first.unwrap();
        second.unwrap();

        let dimod = store.notes_for_account(SEEDED_ACCOUNT_ID, 10).await.unwrap();
        let northwind = store.notes_for_account(OTHER_ACCOUNT_ID, 10).await.unwrap();
        assert_eq!(dimod.len(), 1);
        assert_eq!(dimod[0].note_content, "note for dimod");
        assert_eq!(northwind.len(), 1);
        assert_eq!(northwind[0].note_content, "note for northwind");
    }

    #[tokio::test]
    async fn test_facility_context_and_author() {
        let store = seeded_store().await;
        let writer = NoteWriter::new(Arc::clone(&store), "conversational_agent".to_string());

        let text = writer
            .run(NoteDraft {
                note_content: Some("prefers morning deliveries".to_string()),
                facility_id: Some("F-123456".to_string()),
                author: Some("rep@example.com".to_string()),
                ..Default::default()
            })
            .await
            .unwrap()
            .to_string();
        assert!(text.contains(&format!("- Account ID: {}", SEEDED_ACCOUNT_ID)));
        assert!(text.ends_with("- Created by: rep@example.com"));
    }

    #[tokio::test]
    async fn test_rejects_blank_content_and_unknown_account() {
        let writer = NoteWriter::new(seeded_store().await, "conversational_agent".to_string());

        let err = writer.run(draft(SEEDED_ACCOUNT_ID, "   ")).await.unwrap_err();
        assert_eq!(err.to_string(), "Note content cannot be empty.");

        let err = writer
            .run(NoteDraft {
                note_content: Some("orphan".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Account ID is required to save a note.");

        let err = writer.run(draft("A-000000000", "hello")).await.unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }
}
