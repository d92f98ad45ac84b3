use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, ToSql};
use std::sync::{Arc, Mutex};

use super::{upsert_sql, FacilityFilter, Store, ACCOUNT_COLUMNS, FACILITY_COLUMNS};
use crate::error::{AgentError, Result};
use crate::models::{Account, Facility, NewNote, Note, NoteReceipt};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    account_id TEXT PRIMARY KEY,
    account_name TEXT NOT NULL,
    status TEXT NOT NULL,
    is_tna INTEGER NOT NULL DEFAULT 0,
    pricing_model TEXT,
    created_at TEXT,
    updated_at TEXT,
    address_line1 TEXT,
    address_line2 TEXT,
    address_city TEXT,
    address_state TEXT,
    address_postal_code TEXT,
    address_country TEXT,
    total_amount_due REAL,
    total_amount_due_this_week REAL,
    current_balance REAL,
    pending_balance REAL,
    invoice_id TEXT,
    invoice_amount REAL,
    invoice_due_date TEXT,
    current_tier TEXT,
    next_tier TEXT,
    points_earned_this_quarter INTEGER,
    points_to_next_tier INTEGER,
    quarter_end_date TEXT,
    free_vials_available INTEGER,
    rewards_required_for_next_free_vial INTEGER,
    rewards_redeemed_towards_next_free_vial INTEGER,
    rewards_status TEXT,
    rewards_updated_at TEXT,
    evolux_level TEXT,
    description TEXT
);

CREATE TABLE IF NOT EXISTS facilities (
    facility_id TEXT PRIMARY KEY,
    facility_name TEXT NOT NULL,
    status TEXT NOT NULL,
    account_id TEXT NOT NULL REFERENCES accounts(account_id) ON DELETE CASCADE,
    has_signed_medical_liability_agreement INTEGER NOT NULL DEFAULT 0,
    medical_license_id TEXT,
    medical_license_number TEXT,
    medical_license_state TEXT,
    medical_license_status TEXT,
    medical_license_involvement TEXT,
    medical_license_expiration_date TEXT,
    medical_license_is_expired INTEGER NOT NULL DEFAULT 0,
    medical_license_owner_first_name TEXT,
    medical_license_owner_last_name TEXT,
    account_has_signed_financial_agreement INTEGER NOT NULL DEFAULT 0,
    account_has_accepted_jet_terms INTEGER NOT NULL DEFAULT 0,
    agreement_status TEXT,
    agreement_type TEXT,
    agreement_signed_at TEXT,
    shipping_address_line1 TEXT,
    shipping_address_line2 TEXT,
    shipping_address_city TEXT,
    shipping_address_state TEXT,
    shipping_address_zip TEXT,
    shipping_address_commercial INTEGER NOT NULL DEFAULT 0,
    sponsored INTEGER NOT NULL DEFAULT 0,
    created_at TEXT,
    updated_at TEXT,
    description TEXT
);

CREATE TABLE IF NOT EXISTS notes (
    note_id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id TEXT NOT NULL REFERENCES accounts(account_id) ON DELETE CASCADE,
    note_content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    created_by TEXT NOT NULL DEFAULT 'system'
);

CREATE INDEX IF NOT EXISTS idx_notes_account_created ON notes (account_id, created_at);
"#;

/// SQLite-backed store. One connection, serialised behind a mutex; every
/// statement runs on the blocking pool.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file. `:memory:` opens a private in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path).map_err(|e| {
                AgentError::Connection(format!("cannot open SQLite database {}: {}", path, e))
            })?
        };
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| AgentError::Database("SQLite connection lock poisoned".to_string()))?;
            f(&*guard).map_err(AgentError::from)
        })
        .await
        .map_err(|e| AgentError::Database(format!("SQLite worker failed: {}", e)))?
    }
}

fn account_select() -> String {
    format!("SELECT {} FROM accounts", ACCOUNT_COLUMNS.join(", "))
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        account_id: row.get("account_id")?,
        account_name: row.get("account_name")?,
        status: row.get("status")?,
        is_tna: flag(row, "is_tna")?,
        pricing_model: row.get("pricing_model")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        address_line1: row.get("address_line1")?,
        address_line2: row.get("address_line2")?,
        address_city: row.get("address_city")?,
        address_state: row.get("address_state")?,
        address_postal_code: row.get("address_postal_code")?,
        address_country: row.get("address_country")?,
        total_amount_due: row.get("total_amount_due")?,
        total_amount_due_this_week: row.get("total_amount_due_this_week")?,
        current_balance: row.get("current_balance")?,
        pending_balance: row.get("pending_balance")?,
        invoice_id: row.get("invoice_id")?,
        invoice_amount: row.get("invoice_amount")?,
        invoice_due_date: row.get("invoice_due_date")?,
        current_tier: row.get("current_tier")?,
        next_tier: row.get("next_tier")?,
        points_earned_this_quarter: row.get("points_earned_this_quarter")?,
        points_to_next_tier: row.get("points_to_next_tier")?,
        quarter_end_date: row.get("quarter_end_date")?,
        free_vials_available: row.get("free_vials_available")?,
        rewards_required_for_next_free_vial: row.get("rewards_required_for_next_free_vial")?,
        rewards_redeemed_towards_next_free_vial: row
            .get("rewards_redeemed_towards_next_free_vial")?,
        rewards_status: row.get("rewards_status")?,
        rewards_updated_at: row.get("rewards_updated_at")?,
        evolux_level: row.get("evolux_level")?,
        description: row.get("description")?,
    })
}

fn flag(row: &Row<'_>, column: &str) -> rusqlite::Result<bool> {
    Ok(row.get::<_, Option<bool>>(column)?.unwrap_or(false))
}

fn facility_from_row(row: &Row<'_>) -> rusqlite::Result<Facility> {
    Ok(Facility {
        facility_id: row.get("facility_id")?,
        facility_name: row.get("facility_name")?,
        status: row.get("status")?,
        account_id: row.get("account_id")?,
        account_name: row.get("account_name")?,
        account_status: row.get("account_status")?,
        has_signed_medical_liability_agreement: flag(
            row,
            "has_signed_medical_liability_agreement",
        )?,
        medical_license_id: row.get("medical_license_id")?,
        medical_license_number: row.get("medical_license_number")?,
        medical_license_state: row.get("medical_license_state")?,
        medical_license_status: row.get("medical_license_status")?,
        medical_license_involvement: row.get("medical_license_involvement")?,
        medical_license_expiration_date: row.get("medical_license_expiration_date")?,
        medical_license_is_expired: flag(row, "medical_license_is_expired")?,
        medical_license_owner_first_name: row.get("medical_license_owner_first_name")?,
        medical_license_owner_last_name: row.get("medical_license_owner_last_name")?,
        account_has_signed_financial_agreement: flag(
            row,
            "account_has_signed_financial_agreement",
        )?,
        account_has_accepted_jet_terms: flag(row, "account_has_accepted_jet_terms")?,
        agreement_status: row.get("agreement_status")?,
        agreement_type: row.get("agreement_type")?,
        agreement_signed_at: row.get("agreement_signed_at")?,
        shipping_address_line1: row.get("shipping_address_line1")?,
        shipping_address_line2: row.get("shipping_address_line2")?,
        shipping_address_city: row.get("shipping_address_city")?,
        shipping_address_state: row.get("shipping_address_state")?,
        shipping_address_zip: row.get("shipping_address_zip")?,
        shipping_address_commercial: flag(row, "shipping_address_commercial")?,
        sponsored: flag(row, "sponsored")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        description: row.get("description")?,
    })
}

fn note_from_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        note_id: row.get("note_id")?,
        account_id: row.get("account_id")?,
        note_content: row.get("note_content")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        created_by: row.get("created_by")?,
    })
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn ping(&self) -> Result<()> {
        let one: i64 = self
            .call(|conn| conn.query_row("SELECT 1", [], |row| row.get(0)))
            .await?;
        if one == 1 {
            Ok(())
        } else {
            Err(AgentError::Connection("unexpected ping result".to_string()))
        }
    }

    async fn provision_schema(&self) -> Result<()> {
        self.call(|conn| conn.execute_batch(SCHEMA)).await
    }

    async fn account_by_id(&self, account_id: &str) -> Result<Option<Account>> {
        let account_id = account_id.to_string();
        self.call(move |conn| {
            let sql = format!("{} WHERE account_id = ?1", account_select());
            conn.query_row(&sql, [&account_id], account_from_row)
                .optional()
        })
        .await
    }

    async fn accounts_by_name(&self, name: &str) -> Result<Vec<Account>> {
        let pattern = super::like_pattern(name);
        self.call(move |conn| {
            let sql = format!(
                "{} WHERE account_name LIKE ?1 ORDER BY account_name",
                account_select()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([&pattern], account_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn account_exists(&self, account_id: &str) -> Result<bool> {
        let account_id = account_id.to_string();
        let count: i64 = self
            .call(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM accounts WHERE account_id = ?1",
                    [&account_id],
                    |row| row.get(0),
                )
            })
            .await?;
        Ok(count > 0)
    }

    async fn facilities(&self, filter: &FacilityFilter) -> Result<Vec<Facility>> {
        let criteria = filter.criteria();
        if criteria.is_empty() {
            return Err(AgentError::Validation(
                "facility lookup needs at least one criterion".to_string(),
            ));
        }

        let clauses: Vec<String> = criteria
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let op = if c.fuzzy { "LIKE" } else { "=" };
                format!("{} {} ?{}", c.column, op, i + 1)
            })
            .collect();
        let values: Vec<String> = criteria.into_iter().map(|c| c.value).collect();

        let columns: Vec<String> = FACILITY_COLUMNS.iter().map(|c| format!("f.{c}")).collect();
        let sql = format!(
            "SELECT {}, a.account_name, a.status AS account_status FROM facilities f \
             LEFT JOIN accounts a ON f.account_id = a.account_id \
             WHERE {} ORDER BY f.facility_name",
            columns.join(", "),
            clauses.join(" AND ")
        );

        self.call(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows =
                stmt.query_map(rusqlite::params_from_iter(values.iter()), facility_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn insert_note(&self, note: &NewNote) -> Result<NoteReceipt> {
        let note = note.clone();
        let created_at = Utc::now();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO notes (account_id, note_content, created_at, updated_at, created_by) \
                 VALUES (?1, ?2, ?3, ?3, ?4)",
                rusqlite::params![note.account_id, note.content, created_at, note.author],
            )?;
            Ok(NoteReceipt {
                note_id: conn.last_insert_rowid(),
                created_at,
            })
        })
        .await
    }

    async fn notes_for_account(&self, account_id: &str, limit: u32) -> Result<Vec<Note>> {
        let account_id = account_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT note_id, account_id, note_content, created_at, updated_at, created_by \
                 FROM notes WHERE account_id = ?1 \
                 ORDER BY created_at DESC, note_id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![account_id, limit], note_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn upsert_account(&self, account: &Account) -> Result<()> {
        let a = account.clone();
        self.call(move |conn| {
            let sql = upsert_sql("accounts", ACCOUNT_COLUMNS, |i, _| format!("?{i}"));
            let values: [&dyn ToSql; 32] = [
                &a.account_id,
                &a.account_name,
                &a.status,
                &a.is_tna,
                &a.pricing_model,
                &a.created_at,
                &a.updated_at,
                &a.address_line1,
                &a.address_line2,
                &a.address_city,
                &a.address_state,
                &a.address_postal_code,
                &a.address_country,
                &a.total_amount_due,
                &a.total_amount_due_this_week,
                &a.current_balance,
                &a.pending_balance,
                &a.invoice_id,
                &a.invoice_amount,
                &a.invoice_due_date,
                &a.current_tier,
                &a.next_tier,
                &a.points_earned_this_quarter,
                &a.points_to_next_tier,
                &a.quarter_end_date,
                &a.free_vials_available,
                &a.rewards_required_for_next_free_vial,
                &a.rewards_redeemed_towards_next_free_vial,
                &a.rewards_status,
                &a.rewards_updated_at,
                &a.evolux_level,
                &a.description,
            ];
            conn.execute(&sql, &values[..]).map(|_| ())
        })
        .await
    }

    async fn upsert_facility(&self, facility: &Facility) -> Result<()> {
        let f = facility.clone();
        self.call(move |conn| {
            let sql = upsert_sql("facilities", FACILITY_COLUMNS, |i, _| format!("?{i}"));
            let values: [&dyn ToSql; 29] = [
                &f.facility_id,
                &f.facility_name,
                &f.status,
                &f.account_id,
                &f.has_signed_medical_liability_agreement,
                &f.medical_license_id,
                &f.medical_license_number,
                &f.medical_license_state,
                &f.medical_license_status,
                &f.medical_license_involvement,
                &f.medical_license_expiration_date,
                &f.medical_license_is_expired,
                &f.medical_license_owner_first_name,
                &f.medical_license_owner_last_name,
                &f.account_has_signed_financial_agreement,
                &f.account_has_accepted_jet_terms,
                &f.agreement_status,
                &f.agreement_type,
                &f.agreement_signed_at,
                &f.shipping_address_line1,
                &f.shipping_address_line2,
                &f.shipping_address_city,
                &f.shipping_address_state,
                &f.shipping_address_zip,
                &f.shipping_address_commercial,
                &f.sponsored,
                &f.created_at,
                &f.updated_at,
                &f.description,
            ];
            conn.execute(&sql, &values[..]).map(|_| ())
        })
        .await
    }
}
