//! Database access layer.
//!
//! Row-fetch and row-insert primitives keyed by account id, facility id or
//! account name. Two backends share the [`Store`] trait: PostgreSQL for
//! deployments and SQLite for local runs and tests.

pub mod postgres;
pub mod sqlite;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use serde::Deserialize;
use std::sync::Arc;

use crate::config::{DatabaseBackend, DatabaseConfig};
use crate::error::Result;
use crate::models::{Account, Facility, NewNote, Note, NoteReceipt};

/// Columns of the `accounts` table, in bind order for upserts.
pub(crate) const ACCOUNT_COLUMNS: &[&str] = &[
    "account_id",
    "account_name",
    "status",
    "is_tna",
    "pricing_model",
    "created_at",
    "updated_at",
    "address_line1",
    "address_line2",
    "address_city",
    "address_state",
    "address_postal_code",
    "address_country",
    "total_amount_due",
    "total_amount_due_this_week",
    "current_balance",
    "pending_balance",
    "invoice_id",
    "invoice_amount",
    "invoice_due_date",
    "current_tier",
    "next_tier",
    "points_earned_this_quarter",
    "points_to_next_tier",
    "quarter_end_date",
    "free_vials_available",
    "rewards_required_for_next_free_vial",
    "rewards_redeemed_towards_next_free_vial",
    "rewards_status",
    "rewards_updated_at",
    "evolux_level",
    "description",
];

/// Columns of the `facilities` table, in bind order for upserts.
pub(crate) const FACILITY_COLUMNS: &[&str] = &[
    "facility_id",
    "facility_name",
    "status",
    "account_id",
    "has_signed_medical_liability_agreement",
    "medical_license_id",
    "medical_license_number",
    "medical_license_state",
    "medical_license_status",
    "medical_license_involvement",
    "medical_license_expiration_date",
    "medical_license_is_expired",
    "medical_license_owner_first_name",
    "medical_license_owner_last_name",
    "account_has_signed_financial_agreement",
    "account_has_accepted_jet_terms",
    "agreement_status",
    "agreement_type",
    "agreement_signed_at",
    "shipping_address_line1",
    "shipping_address_line2",
    "shipping_address_city",
    "shipping_address_state",
    "shipping_address_zip",
    "shipping_address_commercial",
    "sponsored",
    "created_at",
    "updated_at",
    "description",
];

/// Money columns, stored as DECIMAL in PostgreSQL.
pub(crate) const MONEY_COLUMNS: &[&str] = &[
    "total_amount_due",
    "total_amount_due_this_week",
    "current_balance",
    "pending_balance",
    "invoice_amount",
];

/// Criteria for a facility lookup. Present criteria are AND-ed together.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FacilityFilter {
    pub facility_id: Option<String>,
    /// Case-insensitive substring of the facility name.
    pub facility_name: Option<String>,
    pub account_id: Option<String>,
}

/// A single WHERE criterion: column, bound value, and whether it is a substring match.
pub(crate) struct Criterion {
    pub column: &'static str,
    pub value: String,
    pub fuzzy: bool,
}

impl FacilityFilter {
    pub fn is_empty(&self) -> bool {
        self.criteria().is_empty()
    }

    pub(crate) fn criteria(&self) -> Vec<Criterion> {
        let mut criteria = Vec::new();
        if let Some(id) = non_blank(&self.facility_id) {
            criteria.push(Criterion {
                column: "f.facility_id",
                value: id.to_string(),
                fuzzy: false,
            });
        }
        if let Some(name) = non_blank(&self.facility_name) {
            criteria.push(Criterion {
                column: "f.facility_name",
                value: like_pattern(name),
                fuzzy: true,
            });
        }
        if let Some(account) = non_blank(&self.account_id) {
            criteria.push(Criterion {
                column: "f.account_id",
                value: account.to_string(),
                fuzzy: false,
            });
        }
        criteria
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// `%needle%` pattern for substring matches.
pub(crate) fn like_pattern(needle: &str) -> String {
    format!("%{}%", needle.trim())
}

/// `INSERT ... ON CONFLICT (key) DO UPDATE` over `columns`, with
/// `placeholder(index, column)` rendering each bind parameter.
pub(crate) fn upsert_sql<F>(table: &str, columns: &[&str], placeholder: F) -> String
where
    F: Fn(usize, &str) -> String,
{
    let values: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, column)| placeholder(i + 1, *column))
        .collect();
    let updates: Vec<String> = columns
        .iter()
        .skip(1)
        .map(|column| format!("{column} = excluded.{column}"))
        .collect();

    format!(
        "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
        columns.join(", "),
        values.join(", "),
        columns[0],
        updates.join(", ")
    )
}

/// Relational store holding accounts, facilities and notes.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;

    /// Round-trip a trivial query.
    async fn ping(&self) -> Result<()>;

    /// Create the accounts, facilities and notes tables if they are missing.
    async fn provision_schema(&self) -> Result<()>;

    async fn account_by_id(&self, account_id: &str) -> Result<Option<Account>>;

    /// Accounts whose name contains `name`, ignoring case.
    async fn accounts_by_name(&self, name: &str) -> Result<Vec<Account>>;

    async fn account_exists(&self, account_id: &str) -> Result<bool>;

    /// Facilities matching every criterion of `filter`, joined with the owning
    /// account's name and status.
    async fn facilities(&self, filter: &FacilityFilter) -> Result<Vec<Facility>>;

    async fn insert_note(&self, note: &NewNote) -> Result<NoteReceipt>;

    /// Up to `limit` notes for the account, newest first.
    async fn notes_for_account(&self, account_id: &str, limit: u32) -> Result<Vec<Note>>;

    async fn upsert_account(&self, account: &Account) -> Result<()>;

    async fn upsert_facility(&self, facility: &Facility) -> Result<()>;
}

/// Open the configured backend.
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match config.backend {
        DatabaseBackend::Postgres => {
            log::info!(
                "Connecting to PostgreSQL at {}:{}/{}",
                config.host,
                config.port,
                config.name
            );
            Arc::new(PostgresStore::connect(config).await?)
        }
        DatabaseBackend::Sqlite => {
            log::info!("Opening SQLite database {}", config.sqlite_path);
            Arc::new(SqliteStore::open(&config.sqlite_path)?)
        }
    };
    Ok(store)
}
