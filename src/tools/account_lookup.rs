use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

use super::{account_of_facility, money, non_blank, or_na, timestamp, yes_no, Tool};
use crate::database::{FacilityFilter, Store};
use crate::error::{AgentError, Result};
use crate::models::{Account, AccountOverview, FacilitySummary};

/// Arguments of `fetch_account_details`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AccountQuery {
    pub account_id: Option<String>,
    /// Case-insensitive substring of the account name.
    pub account_name: Option<String>,
    /// Facility from the conversation context; resolves to its owning account.
    #[serde(skip)]
    pub facility_id: Option<String>,
}

impl AccountQuery {
    pub fn is_empty(&self) -> bool {
        non_blank(&self.account_id).is_none()
            && non_blank(&self.account_name).is_none()
            && non_blank(&self.facility_id).is_none()
    }
}

/// Result of `fetch_account_details`.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountReport {
    NoMatch,
    /// Exactly one account, with the facilities it owns.
    Single(AccountOverview),
    Several(Vec<Account>),
}

impl AccountReport {
    pub fn into_overview(self) -> Option<AccountOverview> {
        match self {
            AccountReport::Single(overview) => Some(overview),
            _ => None,
        }
    }
}

impl fmt::Display for AccountReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountReport::NoMatch => write!(f, "No account found with the provided criteria."),
            AccountReport::Single(overview) => write_details(f, overview),
            AccountReport::Several(accounts) => {
                write!(f, "Found {} accounts matching your criteria:", accounts.len())?;
                for a in accounts {
                    write!(f, "\n- {} (ID: {}) - {}", a.account_name, a.account_id, a.status)?;
                }
                Ok(())
            }
        }
    }
}

fn write_details(f: &mut fmt::Formatter<'_>, overview: &AccountOverview) -> fmt::Result {
    let a = &overview.account;
    let lines = [
        "Account Details:".to_string(),
        format!("- ID: {}", a.account_id),
        format!("- Name: {}", a.account_name),
        format!("- Status: {}", a.status),
        format!("- TNA: {}", yes_no(a.is_tna)),
        format!("- Pricing Model: {}", or_na(a.pricing_model.as_deref())),
        format!("- Created: {}", timestamp(a.created_at)),
        format!("- Updated: {}", timestamp(a.updated_at)),
        format!("- Address: {}", or_na(a.address())),
        format!("- Total Amount Due: {}", money(a.total_amount_due)),
        format!(
            "- Total Amount Due This Week: {}",
            money(a.total_amount_due_this_week)
        ),
        format!("- Current Balance: {}", money(a.current_balance)),
        format!("- Pending Balance: {}", money(a.pending_balance)),
        format!("- Invoice ID: {}", or_na(a.invoice_id.as_deref())),
        format!("- Invoice Amount: {}", money(a.invoice_amount)),
        format!("- Invoice Due Date: {}", or_na(a.invoice_due_date.as_deref())),
        format!("- Current Tier: {}", or_na(a.current_tier.as_deref())),
        format!("- Next Tier: {}", or_na(a.next_tier.as_deref())),
        format!(
            "- Points Earned This Quarter: {}",
            or_na(a.points_earned_this_quarter)
        ),
        format!("- Points To Next Tier: {}", or_na(a.points_to_next_tier)),
        format!("- Quarter End Date: {}", timestamp(a.quarter_end_date)),
        format!("- Free Vials Available: {}", or_na(a.free_vials_available)),
        format!(
            "- Rewards Required For Next Free Vial: {}",
            or_na(a.rewards_required_for_next_free_vial)
        ),
        format!(
            "- Rewards Redeemed Towards Next Free Vial: {}",
            or_na(a.rewards_redeemed_towards_next_free_vial)
        ),
        format!("- Rewards Status: {}", or_na(a.rewards_status.as_deref())),
        format!("- Rewards Updated: {}", timestamp(a.rewards_updated_at)),
        format!("- Evolux Level: {}", or_na(a.evolux_level.as_deref())),
        format!("- Additional Info: {}", or_na(a.description.as_deref())),
    ];
    write!(f, "{}", lines.join("\n"))?;

    if overview.facilities.is_empty() {
        return write!(f, "\nFacilities: none");
    }
    write!(f, "\nFacilities:")?;
    for facility in &overview.facilities {
        write!(
            f,
            "\n- {} (ID: {}) - {}",
            facility.name, facility.id, facility.status
        )?;
    }
    Ok(())
}

/// Looks accounts up by id or name.
pub struct AccountLookup {
    store: Arc<dyn Store>,
}

impl AccountLookup {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn report(&self, mut accounts: Vec<Account>) -> Result<AccountReport> {
        if accounts.len() != 1 {
            return Ok(if accounts.is_empty() {
                AccountReport::NoMatch
            } else {
                AccountReport::Several(accounts)
            });
        }

        let account = accounts.remove(0);
        let filter = FacilityFilter {
            account_id: Some(account.account_id.clone()),
            ..Default::default()
        };
        let facilities = self.store.facilities(&filter).await?;
        Ok(AccountReport::Single(AccountOverview {
            account,
            facilities: facilities.iter().map(FacilitySummary::from).collect(),
        }))
    }
}

#[async_trait::async_trait]
impl Tool for AccountLookup {
    type Input = AccountQuery;
    type Output = AccountReport;

    fn name(&self) -> &'static str {
        "fetch_account_details"
    }

    fn description(&self) -> &'static str {
        "Fetch account details by account ID (exact) or account name (partial, case-insensitive). \
         Without arguments, the account from the conversation context is used."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "account_id": {
                    "type": "string",
                    "description": "Account identifier, e.g. A-011977763"
                },
                "account_name": {
                    "type": "string",
                    "description": "Full or partial account name"
                }
            }
        })
    }

    async fn run(&self, query: AccountQuery) -> Result<AccountReport> {
        let accounts: Vec<Account> = if let Some(id) = non_blank(&query.account_id) {
            log::info!("AccountLookup: fetching account {}", id);
            self.store.account_by_id(id).await?.into_iter().collect()
        } else if let Some(name) = non_blank(&query.account_name) {
            log::info!("AccountLookup: searching accounts named like '{}'", name);
            self.store.accounts_by_name(name).await?
        } else if let Some(facility_id) = non_blank(&query.facility_id) {
            log::info!("AccountLookup: resolving account of facility {}", facility_id);
            let account_id = account_of_facility(self.store.as_ref(), facility_id).await?;
            self.store.account_by_id(&account_id).await?.into_iter().collect()
        } else {
            return Err(AgentError::Validation(
                "Please provide either account_id or account_name to search for account details."
                    .to_string(),
            ));
        };

        log::info!("AccountLookup: {} match(es)", accounts.len());
        self.report(accounts).await
    }
}
