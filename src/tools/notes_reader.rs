use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

use super::{account_of_facility, non_blank, timestamp, Tool};
use crate::database::Store;
use crate::error::{AgentError, Result};
use crate::models::NotesList;

const MAX_LIMIT: u32 = 50;

/// Arguments of `get_notes`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NotesQuery {
    pub account_id: Option<String>,
    pub limit: Option<u32>,
    #[serde(skip)]
    pub facility_id: Option<String>,
}

impl fmt::Display for NotesList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.notes.is_empty() {
            return write!(f, "No notes found for account '{}'.", self.account_id);
        }

        writeln!(f, "📋 Notes for Account {}:", self.account_id)?;
        for (i, note) in self.notes.iter().enumerate() {
            write!(
                f,
                "\n{}. {}\n   - Note ID: {}\n   - Created: {}\n   - Created by: {}\n",
                i + 1,
                note.note_content,
                note.note_id,
                timestamp(Some(note.created_at)),
                note.created_by
            )?;
        }
        write!(f, "\nTotal notes: {}", self.total_count)
    }
}

/// Lists the newest notes of an account.
pub struct NotesReader {
    store: Arc<dyn Store>,
    default_limit: u32,
}

impl NotesReader {
    pub fn new(store: Arc<dyn Store>, default_limit: u32) -> Self {
        Self {
            store,
            default_limit,
        }
    }

    fn effective_limit(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.default_limit).clamp(1, MAX_LIMIT)
    }
}

#[async_trait::async_trait]
impl Tool for NotesReader {
    type Input = NotesQuery;
    type Output = NotesList;

    fn name(&self) -> &'static str {
        "get_notes"
    }

    fn description(&self) -> &'static str {
        "Retrieve the most recent notes of an account, newest first. \
         Without an account_id, the account from the conversation context is used."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "account_id": {
                    "type": "string",
                    "description": "Account whose notes to list"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of notes to return",
                    "minimum": 1,
                    "maximum": MAX_LIMIT
                }
            }
        })
    }

    async fn run(&self, query: NotesQuery) -> Result<NotesList> {
        let account_id = match (non_blank(&query.account_id), non_blank(&query.facility_id)) {
            (Some(id), _) => id.to_string(),
            (None, Some(facility_id)) => {
                account_of_facility(self.store.as_ref(), facility_id).await?
            }
            (None, None) => {
                return Err(AgentError::Validation(
                    "Account ID is required to retrieve notes.".to_string(),
                ))
            }
        };
        if !self.store.account_exists(&account_id).await? {
            return Err(AgentError::NotFound(format!("account '{}'", account_id)));
        }

        let limit = self.effective_limit(query.limit);
        let notes = self.store.notes_for_account(&account_id, limit).await?;
        log::info!(
            "NotesReader: {} note(s) for account {} (limit {})",
            notes.len(),
            account_id,
            limit
        );

        Ok(NotesList {
            account_id,
            total_count: notes.len(),
            notes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewNote;
    use crate::test_support::{seeded_store, OTHER_ACCOUNT_ID, SEEDED_ACCOUNT_ID};

    async fn add_notes(store: &Arc<dyn Store>, account_id: &str, count: usize) {
        for i in 1..=count {
            store
                .insert_note(&NewNote {
                    account_id: account_id.to_string(),
                    content: format!("note {}", i),
                    author: "tester".to_string(),
                })
                .await
                .unwrap();
        }
    }

    fn for_account(account_id: &str, limit: Option<u32>) -> NotesQuery {
        NotesQuery {
            account_id: Some(account_id.to_string()),
            limit,
            facility_id: None,
        }
    }

    #[tokio::test]
    async fn test_lists_newest_first_with_limit() {
        let store = seeded_store().await;
        add_notes(&store, SEEDED_ACCOUNT_ID, 3).await;
        let reader = NotesReader::new(Arc::clone(&store), 10);

        let list = reader.run(for_account(SEEDED_ACCOUNT_ID, Some(2))).await.unwrap();
        assert_eq!(list.total_count, 2);
        let text = list.to_string();
        assert!(text.starts_with(&format!("📋 Notes for Account {}:", SEEDED_ACCOUNT_ID)));
        assert!(text.contains("1. note 3"));
        assert!(text.contains("2. note 2"));
        assert!(!text.contains("note 1"));
        assert!(text.ends_with("Total notes: 2"));
    }

    #[tokio::test]
    async fn test_empty_account_has_message() {
        let reader = NotesReader::new(seeded_store().await, 10);
        let list = reader.run(for_account(OTHER_ACCOUNT_ID, None)).await.unwrap();
        assert!(list.notes.is_empty());
        assert_eq!(list.to_string(), format!("No notes found for account '{}'.", OTHER_ACCOUNT_ID));
    }

    #[tokio::test]
    async fn test_unknown_account_is_not_found() {
        let reader = NotesReader::new(seeded_store().await, 10);
        let err = reader.run(for_account("A-000000000", None)).await.unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_limit_is_clamped() {
        let reader = NotesReader::new(seeded_store().await, 10);
        assert_eq!(reader.effective_limit(None), 10);
        assert_eq!(reader.effective_limit(Some(0)), 1);
        assert_eq!(reader.effective_limit(Some(500)), MAX_LIMIT);
    }
}
