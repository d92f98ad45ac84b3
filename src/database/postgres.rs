use chrono::Utc;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};

use super::{
    upsert_sql, FacilityFilter, Store, ACCOUNT_COLUMNS, FACILITY_COLUMNS, MONEY_COLUMNS,
};
use crate::config::DatabaseConfig;
use crate::error::{AgentError, Result};
use crate::models::{Account, Facility, NewNote, Note, NoteReceipt};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    account_id VARCHAR(50) PRIMARY KEY,
    account_name VARCHAR(255) NOT NULL,
    status VARCHAR(20) NOT NULL,
    is_tna BOOLEAN DEFAULT FALSE,
    pricing_model VARCHAR(50),
    created_at TIMESTAMP WITH TIME ZONE,
    updated_at TIMESTAMP WITH TIME ZONE DEFAULT CURRENT_TIMESTAMP,
    address_line1 VARCHAR(255),
    address_line2 VARCHAR(255),
    address_city VARCHAR(100),
    address_state VARCHAR(10),
    address_postal_code VARCHAR(20),
    address_country VARCHAR(100),
    total_amount_due DECIMAL(10,2) DEFAULT 0,
    total_amount_due_this_week DECIMAL(10,2) DEFAULT 0,
    current_balance DECIMAL(10,2) DEFAULT 0,
    pending_balance DECIMAL(10,2) DEFAULT 0,
    invoice_id VARCHAR(100),
    invoice_amount DECIMAL(10,2) DEFAULT 0,
    invoice_due_date VARCHAR(50),
    current_tier VARCHAR(50),
    next_tier VARCHAR(50),
    points_earned_this_quarter INTEGER DEFAULT 0,
    points_to_next_tier INTEGER DEFAULT 0,
    quarter_end_date TIMESTAMP WITH TIME ZONE,
    free_vials_available INTEGER DEFAULT 0,
    rewards_required_for_next_free_vial INTEGER DEFAULT 0,
    rewards_redeemed_towards_next_free_vial INTEGER DEFAULT 0,
    rewards_status VARCHAR(50),
    rewards_updated_at TIMESTAMP WITH TIME ZONE,
    evolux_level VARCHAR(50),
    description TEXT
);

CREATE TABLE IF NOT EXISTS facilities (
    facility_id VARCHAR(50) PRIMARY KEY,
    facility_name VARCHAR(255) NOT NULL,
    status VARCHAR(20) NOT NULL,
    account_id VARCHAR(50) NOT NULL REFERENCES accounts(account_id) ON DELETE CASCADE,
    has_signed_medical_liability_agreement BOOLEAN DEFAULT FALSE,
    medical_license_id VARCHAR(100),
    medical_license_number VARCHAR(50),
    medical_license_state VARCHAR(10),
    medical_license_status VARCHAR(100),
    medical_license_involvement VARCHAR(50),
    medical_license_expiration_date TIMESTAMP WITH TIME ZONE,
    medical_license_is_expired BOOLEAN DEFAULT FALSE,
    medical_license_owner_first_name VARCHAR(100),
    medical_license_owner_last_name VARCHAR(100),
    account_has_signed_financial_agreement BOOLEAN DEFAULT FALSE,
    account_has_accepted_jet_terms BOOLEAN DEFAULT FALSE,
    agreement_status VARCHAR(50),
    agreement_type VARCHAR(50),
    agreement_signed_at TIMESTAMP WITH TIME ZONE,
    shipping_address_line1 VARCHAR(255),
    shipping_address_line2 VARCHAR(255),
    shipping_address_city VARCHAR(100),
    shipping_address_state VARCHAR(10),
    shipping_address_zip VARCHAR(20),
    shipping_address_commercial BOOLEAN DEFAULT FALSE,
    sponsored BOOLEAN DEFAULT FALSE,
    created_at TIMESTAMP WITH TIME ZONE DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP WITH TIME ZONE DEFAULT CURRENT_TIMESTAMP,
    description TEXT
);

CREATE TABLE IF NOT EXISTS notes (
    note_id SERIAL PRIMARY KEY,
    account_id VARCHAR(50) NOT NULL REFERENCES accounts(account_id) ON DELETE CASCADE,
    note_content TEXT NOT NULL,
    created_at TIMESTAMP WITH TIME ZONE DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP WITH TIME ZONE DEFAULT CURRENT_TIMESTAMP,
    created_by VARCHAR(100) DEFAULT 'system'
);

CREATE INDEX IF NOT EXISTS idx_notes_account_created ON notes (account_id, created_at);
"#;

/// PostgreSQL-backed store. A single client is shared by every caller;
/// tokio-postgres pipelines concurrent queries over it.
pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&config.host)
            .port(config.port)
            .dbname(&config.name)
            .user(&config.user)
            .password(&config.password)
            .application_name("evolyn-agent");

        let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| {
            AgentError::Connection(format!(
                "cannot connect to PostgreSQL at {}:{}: {}",
                config.host, config.port, e
            ))
        })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                log::error!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(Self { client })
    }
}

/// Select list with money columns cast to float8 so they map onto `f64`.
fn select_list(columns: &[&str], prefix: &str) -> String {
    columns
        .iter()
        .map(|column| {
            if MONEY_COLUMNS.contains(column) {
                format!("{prefix}{column}::float8 AS {column}")
            } else {
                format!("{prefix}{column}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn placeholder(index: usize, column: &str) -> String {
    if MONEY_COLUMNS.contains(&column) {
        format!("${index}::float8")
    } else {
        format!("${index}")
    }
}

fn account_from_row(row: &Row) -> Result<Account> {
    Ok(Account {
        account_id: row.try_get("account_id")?,
        account_name: row.try_get("account_name")?,
        status: row.try_get("status")?,
        is_tna: flag(row, "is_tna")?,
        pricing_model: row.try_get("pricing_model")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        address_line1: row.try_get("address_line1")?,
        address_line2: row.try_get("address_line2")?,
        address_city: row.try_get("address_city")?,
        address_state: row.try_get("address_state")?,
        address_postal_code: row.try_get("address_postal_code")?,
        address_country: row.try_get("address_country")?,
        total_amount_due: row.try_get("total_amount_due")?,
        total_amount_due_this_week: row.try_get("total_amount_due_this_week")?,
        current_balance: row.try_get("current_balance")?,
        pending_balance: row.try_get("pending_balance")?,
        invoice_id: row.try_get("invoice_id")?,
        invoice_amount: row.try_get("invoice_amount")?,
        invoice_due_date: row.try_get("invoice_due_date")?,
        current_tier: row.try_get("current_tier")?,
        next_tier: row.try_get("next_tier")?,
        points_earned_this_quarter: row.try_get("points_earned_this_quarter")?,
        points_to_next_tier: row.try_get("points_to_next_tier")?,
        quarter_end_date: row.try_get("quarter_end_date")?,
        free_vials_available: row.try_get("free_vials_available")?,
        rewards_required_for_next_free_vial: row.try_get("rewards_required_for_next_free_vial")?,
        rewards_redeemed_towards_next_free_vial: row
            .try_get("rewards_redeemed_towards_next_free_vial")?,
        rewards_status: row.try_get("rewards_status")?,
        rewards_updated_at: row.try_get("rewards_updated_at")?,
        evolux_level: row.try_get("evolux_level")?,
        description: row.try_get("description")?,
    })
}

fn flag(row: &Row, column: &str) -> Result<bool> {
    Ok(row.try_get::<_, Option<bool>>(column)?.unwrap_or(false))
}

fn facility_from_row(row: &Row) -> Result<Facility> {
    Ok(Facility {
        facility_id: row.try_get("facility_id")?,
        facility_name: row.try_get("facility_name")?,
        status: row.try_get("status")?,
        account_id: row.try_get("account_id")?,
        account_name: row.try_get("account_name")?,
        account_status: row.try_get("account_status")?,
        has_signed_medical_liability_agreement: flag(
            row,
            "has_signed_medical_liability_agreement",
        )?,
        medical_license_id: row.try_get("medical_license_id")?,
        medical_license_number: row.try_get("medical_license_number")?,
        medical_license_state: row.try_get("medical_license_state")?,
        medical_license_status: row.try_get("medical_license_status")?,
        medical_license_involvement: row.try_get("medical_license_involvement")?,
        medical_license_expiration_date: row.try_get("medical_license_expiration_date")?,
        medical_license_is_expired: flag(row, "medical_license_is_expired")?,
        medical_license_owner_first_name: row.try_get("medical_license_owner_first_name")?,
        medical_license_owner_last_name: row.try_get("medical_license_owner_last_name")?,
        account_has_signed_financial_agreement: flag(
            row,
            "account_has_signed_financial_agreement",
        )?,
        account_has_accepted_jet_terms: flag(row, "account_has_accepted_jet_terms")?,
        agreement_status: row.try_get("agreement_status")?,
        agreement_type: row.try_get("agreement_type")?,
        agreement_signed_at: row.try_get("agreement_signed_at")?,
        shipping_address_line1: row.try_get("shipping_address_line1")?,
        shipping_address_line2: row.try_get("shipping_address_line2")?,
        shipping_address_city: row.try_get("shipping_address_city")?,
        shipping_address_state: row.try_get("shipping_address_state")?,
        shipping_address_zip: row.try_get("shipping_address_zip")?,
        shipping_address_commercial: flag(row, "shipping_address_commercial")?,
        sponsored: flag(row, "sponsored")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        description: row.try_get("description")?,
    })
}

fn note_from_row(row: &Row) -> Result<Note> {
    let created_at = row.try_get::<_, Option<_>>("created_at")?.unwrap_or_else(Utc::now);
    Ok(Note {
        note_id: row.try_get("note_id")?,
        account_id: row.try_get("account_id")?,
        note_content: row.try_get("note_content")?,
        created_at,
        updated_at: row
            .try_get::<_, Option<_>>("updated_at")?
            .unwrap_or(created_at),
        created_by: row
            .try_get::<_, Option<String>>("created_by")?
            .unwrap_or_else(|| "system".to_string()),
    })
}

#[async_trait::async_trait]
impl Store for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<()> {
        let row = self.client.query_one("SELECT 1", &[]).await?;
        let one: i32 = row.try_get(0)?;
        if one == 1 {
            Ok(())
        } else {
            Err(AgentError::Connection("unexpected ping result".to_string()))
        }
    }

    async fn provision_schema(&self) -> Result<()> {
        self.client.batch_execute(SCHEMA).await?;
        Ok(())
    }

    async fn account_by_id(&self, account_id: &str) -> Result<Option<Account>> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE account_id = $1",
            select_list(ACCOUNT_COLUMNS, "")
        );
        let row = self.client.query_opt(&sql, &[&account_id]).await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn accounts_by_name(&self, name: &str) -> Result<Vec<Account>> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE account_name ILIKE $1 ORDER BY account_name",
            select_list(ACCOUNT_COLUMNS, "")
        );
        let pattern = super::like_pattern(name);
        let rows = self.client.query(&sql, &[&pattern]).await?;
        rows.iter().map(account_from_row).collect()
    }

    async fn account_exists(&self, account_id: &str) -> Result<bool> {
        let row = self
            .client
            .query_one(
                "SELECT COUNT(*) FROM accounts WHERE account_id = $1",
                &[&account_id],
            )
            .await?;
        let count: i64 = row.try_get(0)?;
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
                let op = if c.fuzzy { "ILIKE" } else { "=" };
                format!("{} {} ${}", c.column, op, i + 1)
            })
            .collect();
        let sql = format!(
            "SELECT {}, a.account_name, a.status AS account_status FROM facilities f \
             LEFT JOIN accounts a ON f.account_id = a.account_id \
             WHERE {} ORDER BY f.facility_name",
            select_list(FACILITY_COLUMNS, "f."),
            clauses.join(" AND ")
        );

        let params: Vec<&(dyn ToSql + Sync)> = criteria
            .iter()
            .map(|c| &c.value as &(dyn ToSql + Sync))
            .collect();
        let rows = self.client.query(&sql, &params).await?;
        rows.iter().map(facility_from_row).collect()
    }

    async fn insert_note(&self, note: &NewNote) -> Result<NoteReceipt> {
        let now = Utc::now();
        let row = self
            .client
            .query_one(
                "INSERT INTO notes (account_id, note_content, created_at, updated_at, created_by) \
                 VALUES ($1, $2, $3, $3, $4) \
                 RETURNING note_id::int8 AS note_id, created_at",
                &[&note.account_id, &note.content, &now, &note.author],
            )
            .await?;

        Ok(NoteReceipt {
            note_id: row.try_get("note_id")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn notes_for_account(&self, account_id: &str, limit: u32) -> Result<Vec<Note>> {
        let limit = i64::from(limit);
        let rows = self
            .client
            .query(
                "SELECT note_id::int8 AS note_id, account_id, note_content, created_at, updated_at, created_by \
                 FROM notes WHERE account_id = $1 \
                 ORDER BY created_at DESC, note_id DESC LIMIT $2",
                &[&account_id, &limit],
            )
            .await?;
        rows.iter().map(note_from_row).collect()
    }

    async fn upsert_account(&self, account: &Account) -> Result<()> {
        let a = account;
        let sql = upsert_sql("accounts", ACCOUNT_COLUMNS, placeholder);
        let values: [&(dyn ToSql + Sync); 32] = [
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
        self.client.execute(&sql, &values).await?;
        Ok(())
    }

    async fn upsert_facility(&self, facility: &Facility) -> Result<()> {
        let f = facility;
        let sql = upsert_sql("facilities", FACILITY_COLUMNS, placeholder);
        let values: [&(dyn ToSql + Sync); 29] = [
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
        self.client.execute(&sql, &values).await?;
        Ok(())
    }
}
