use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top-level billing/owner entity. Read-only from the agent's side.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Account {
    pub account_id: String,
    pub account_name: String,
    pub status: String,
    pub is_tna: bool,
    pub pricing_model: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,

    // Address
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub address_city: Option<String>,
    pub address_state: Option<String>,
    pub address_postal_code: Option<String>,
    pub address_country: Option<String>,

    // Balances
    pub total_amount_due: Option<f64>,
    pub total_amount_due_this_week: Option<f64>,
    pub current_balance: Option<f64>,
    pub pending_balance: Option<f64>,
    pub invoice_id: Option<String>,
    pub invoice_amount: Option<f64>,
    pub invoice_due_date: Option<String>,

    // Rewards
    pub current_tier: Option<String>,
    pub next_tier: Option<String>,
    pub points_earned_this_quarter: Option<i32>,
    pub points_to_next_tier: Option<i32>,
    pub quarter_end_date: Option<DateTime<Utc>>,
    pub free_vials_available: Option<i32>,
    pub rewards_required_for_next_free_vial: Option<i32>,
    pub rewards_redeemed_towards_next_free_vial: Option<i32>,
    pub rewards_status: Option<String>,
    pub rewards_updated_at: Option<DateTime<Utc>>,
    pub evolux_level: Option<String>,

    pub description: Option<String>,
}

impl Account {
    /// Single-line postal address, `None` when no address field is set.
    pub fn address(&self) -> Option<String> {
        let parts: Vec<&str> = [
            &self.address_line1,
            &self.address_line2,
            &self.address_city,
            &self.address_state,
            &self.address_postal_code,
            &self.address_country,
        ]
        .into_iter()
        .filter_map(|p| p.as_deref())
        .filter(|p| !p.trim().is_empty())
        .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

/// A location or service site belonging to an account.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Facility {
    pub facility_id: String,
    pub facility_name: String,
    pub status: String,
    pub account_id: String,
    /// Joined from the owning account; not a facilities column.
    #[serde(skip_deserializing)]
    pub account_name: Option<String>,
    #[serde(skip_deserializing)]
    pub account_status: Option<String>,

    pub has_signed_medical_liability_agreement: bool,
    pub medical_license_id: Option<String>,
    pub medical_license_number: Option<String>,
    pub medical_license_state: Option<String>,
    pub medical_license_status: Option<String>,
    pub medical_license_involvement: Option<String>,
    pub medical_license_expiration_date: Option<DateTime<Utc>>,
    pub medical_license_is_expired: bool,
    pub medical_license_owner_first_name: Option<String>,
    pub medical_license_owner_last_name: Option<String>,

    pub account_has_signed_financial_agreement: bool,
    pub account_has_accepted_jet_terms: bool,

    pub agreement_status: Option<String>,
    pub agreement_type: Option<String>,
    pub agreement_signed_at: Option<DateTime<Utc>>,

    pub shipping_address_line1: Option<String>,
    pub shipping_address_line2: Option<String>,
    pub shipping_address_city: Option<String>,
    pub shipping_address_state: Option<String>,
    pub shipping_address_zip: Option<String>,
    pub shipping_address_commercial: bool,
    pub sponsored: bool,

    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
}

impl Facility {
    pub fn shipping_address(&self) -> Option<String> {
        let parts: Vec<&str> = [
            &self.shipping_address_line1,
            &self.shipping_address_line2,
            &self.shipping_address_city,
            &self.shipping_address_state,
            &self.shipping_address_zip,
        ]
        .into_iter()
        .filter_map(|p| p.as_deref())
        .filter(|p| !p.trim().is_empty())
        .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }

    /// License owner's full name, `None` when neither part is set.
    pub fn license_owner(&self) -> Option<String> {
        let name = [
            &self.medical_license_owner_first_name,
            &self.medical_license_owner_last_name,
        ]
        .into_iter()
        .filter_map(|p| p.as_deref())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}

/// Free-text annotation attached to an account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub note_id: i64,
    pub account_id: String,
    pub note_content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
}

/// Row to insert through `save_note`.
#[derive(Debug, Clone)]
pub struct NewNote {
    pub account_id: String,
    pub content: String,
    pub author: String,
}

/// Generated identity of a freshly inserted note.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteReceipt {
    pub note_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Short facility entry listed under an account.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FacilitySummary {
    pub id: String,
    pub name: String,
    pub status: String,
}

impl From<&Facility> for FacilitySummary {
    fn from(facility: &Facility) -> Self {
        Self {
            id: facility.facility_id.clone(),
            name: facility.facility_name.clone(),
            status: facility.status.clone(),
        }
    }
}

/// One account with the facilities it owns.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AccountOverview {
    #[serde(flatten)]
    pub account: Account,
    pub facilities: Vec<FacilitySummary>,
}

/// Newest notes of one account.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NotesList {
    pub account_id: String,
    pub notes: Vec<Note>,
    pub total_count: usize,
}

/// Contents of an `init-db --seed` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SeedData {
    pub accounts: Vec<Account>,
    pub facilities: Vec<Facility>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_address_skips_blank_parts() {
        let account = Account {
            address_line1: Some("12 Main St".to_string()),
            address_line2: Some("  ".to_string()),
            address_city: Some("Austin".to_string()),
            address_state: Some("TX".to_string()),
            ..Default::default()
        };
        assert_eq!(account.address().unwrap(), "12 Main St, Austin, TX");
        assert!(Account::default().address().is_none());
    }

    #[test]
    fn test_seed_data_parses_partial_rows() {
        let json = r#"{
            "accounts": [
                { "account_id": "A-1", "account_name": "Dimod", "status": "active",
                  "created_at": "2024-03-01T10:00:00Z", "current_balance": 12.5 }
            ],
            "facilities": [
                { "facility_id": "F-1", "facility_name": "Clinic", "status": "active",
                  "account_id": "A-1", "sponsored": true }
            ]
        }"#;
        let seed: SeedData = serde_json::from_str(json).unwrap();
        assert_eq!(seed.accounts[0].account_name, "Dimod");
        assert_eq!(seed.accounts[0].current_balance, Some(12.5));
        assert!(seed.accounts[0].created_at.is_some());
        assert!(seed.facilities[0].sponsored);
        assert!(seed.facilities[0].account_name.is_none());
    }

    #[test]
    fn test_account_overview_serializes_flat() {
        let overview = AccountOverview {
            account: Account {
                account_id: "A-1".to_string(),
                account_name: "Dimod".to_string(),
                ..Default::default()
            },
            facilities: vec![FacilitySummary {
                id: "F-1".to_string(),
                name: "Clinic".to_string(),
                status: "active".to_string(),
            }],
        };
        let json = serde_json::to_value(&overview).unwrap();
        assert_eq!(json["account_id"], "A-1");
        assert_eq!(json["facilities"][0]["id"], "F-1");
    }

    #[test]
    fn test_seed_data_keeps_rewards_and_license_columns() {
        let json = r#"{
            "accounts": [
                { "account_id": "A-1", "account_name": "Dimod", "status": "active",
                  "total_amount_due_this_week": 99.0,
                  "quarter_end_date": "2024-09-30T00:00:00Z",
                  "rewards_status": "eligible" }
            ],
            "facilities": [
                { "facility_id": "F-1", "facility_name": "Clinic", "status": "active",
                  "account_id": "A-1", "has_signed_medical_liability_agreement": true,
                  "medical_license_owner_first_name": "Ada",
                  "medical_license_owner_last_name": "Lovelace" }
            ]
        }"#;
        let seed: SeedData = serde_json::from_str(json).unwrap();
        let account = &seed.accounts[0];
        assert_eq!(account.total_amount_due_this_week, Some(99.0));
        assert!(account.quarter_end_date.is_some());
        assert_eq!(account.rewards_status.as_deref(), Some("eligible"));

        let facility = &seed.facilities[0];
        assert!(facility.has_signed_medical_liability_agreement);
        assert_eq!(facility.license_owner().as_deref(), Some("Ada Lovelace"));
    }
}
