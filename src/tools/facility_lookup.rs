use std::fmt;
use std::sync::Arc;

use super::{or_na, timestamp, yes_no, Tool};
use crate::database::{FacilityFilter, Store};
use crate::error::{AgentError, Result};
use crate::models::Facility;

/// Result of `fetch_facility_details`: every facility matching the criteria.
#[derive(Debug, Clone, PartialEq)]
pub struct FacilityReport {
    pub facilities: Vec<Facility>,
}

impl FacilityReport {
    /// The facility when exactly one matched.
    pub fn into_single(mut self) -> Option<Facility> {
        if self.facilities.len() == 1 {
            self.facilities.pop()
        } else {
            None
        }
    }
}

impl fmt::Display for FacilityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.facilities.as_slice() {
            [] => write!(f, "No facilities found with the provided criteria."),
            [facility] => write!(f, "{}", details(facility)),
            many => {
                write!(f, "Found {} facilities matching your criteria:", many.len())?;
                for facility in many {
                    write!(
                        f,
                        "\n- {} (ID: {}) - Account: {} - Status: {}",
                        facility.facility_name,
                        facility.facility_id,
                        or_na(facility.account_name.as_deref()),
                        facility.status
                    )?;
                }
                Ok(())
            }
        }
    }
}

fn details(f: &Facility) -> String {
    let lines = [
        "Facility Details:".to_string(),
        format!("- ID: {}", f.facility_id),
        format!("- Name: {}", f.facility_name),
        format!(
            "- Account: {} (ID: {})",
            or_na(f.account_name.as_deref()),
            f.account_id
        ),
        format!("- Account Status: {}", or_na(f.account_status.as_deref())),
        format!("- Status: {}", f.status),
        format!(
            "- Signed Medical Liability Agreement: {}",
            yes_no(f.has_signed_medical_liability_agreement)
        ),
        format!("- Medical License ID: {}", or_na(f.medical_license_id.as_deref())),
        format!(
            "- Medical License: {} ({})",
            or_na(f.medical_license_number.as_deref()),
            or_na(f.medical_license_state.as_deref())
        ),
        format!(
            "- License Status: {}",
            or_na(f.medical_license_status.as_deref())
        ),
        format!(
            "- License Involvement: {}",
            or_na(f.medical_license_involvement.as_deref())
        ),
        format!(
            "- License Expires: {}",
            timestamp(f.medical_license_expiration_date)
        ),
        format!("- License Expired: {}", yes_no(f.medical_license_is_expired)),
        format!("- License Owner: {}", or_na(f.license_owner())),
        format!(
            "- Signed Financial Agreement: {}",
            yes_no(f.account_has_signed_financial_agreement)
        ),
        format!(
            "- Accepted Jet Terms: {}",
            yes_no(f.account_has_accepted_jet_terms)
        ),
        format!(
            "- Agreement: {} ({})",
            or_na(f.agreement_status.as_deref()),
            or_na(f.agreement_type.as_deref())
        ),
        format!("- Agreement Signed: {}", timestamp(f.agreement_signed_at)),
        format!("- Shipping Address: {}", or_na(f.shipping_address())),
        format!(
            "- Commercial Shipping Address: {}",
            yes_no(f.shipping_address_commercial)
        ),
        format!("- Sponsored: {}", yes_no(f.sponsored)),
        format!("- Created: {}", timestamp(f.created_at)),
        format!("- Updated: {}", timestamp(f.updated_at)),
        format!("- Additional Info: {}", or_na(f.description.as_deref())),
    ];
    lines.join("\n")
}

/// Looks facilities up by id, name or owning account.
pub struct FacilityLookup {
    store: Arc<dyn Store>,
}

impl FacilityLookup {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Tool for FacilityLookup {
    type Input = FacilityFilter;
    type Output = FacilityReport;

    fn name(&self) -> &'static str {
        "fetch_facility_details"
    }

    fn description(&self) -> &'static str {
        "Fetch facility details by facility ID, facility name, or owning account ID. \
         Criteria that are given are combined. Without arguments, the facility (or account) \
         from the conversation context is used."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "facility_id": {
                    "type": "string",
                    "description": "Facility identifier, e.g. F-123456"
                },
                "facility_name": {
                    "type": "string",
                    "description": "Full or partial facility name"
                },
                "account_id": {
                    "type": "string",
                    "description": "Return the facilities of this account"
                }
            }
        })
    }

    async fn run(&self, filter: FacilityFilter) -> Result<FacilityReport> {
        if filter.is_empty() {
            return Err(AgentError::Validation(
                "Please provide facility_id, facility_name, or account_id to search for facility details."
                    .to_string(),
            ));
        }

        log::info!("FacilityLookup: searching with {:?}", filter);
        let facilities = self.store.facilities(&filter).await?;
        log::info!("FacilityLookup: {} match(es)", facilities.len());

        Ok(FacilityReport { facilities })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seeded_store, SEEDED_ACCOUNT_ID};

    fn by_id(id: &str) -> FacilityFilter {
        FacilityFilter {
            facility_id: Some(id.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_by_id_includes_owner() {
        let tool = FacilityLookup::new(seeded_store().await);
        let report = tool.run(by_id("F-123456")).await.unwrap();
        let text = report.to_string();
        assert!(text.starts_with("Facility Details:"));
        assert!(text.contains("- Name: Dimod North Clinic"));
        assert!(text.contains(&format!("- Account: Dimod Account (ID: {})", SEEDED_ACCOUNT_ID)));
        assert!(text.contains("- Account Status: active"));
        assert!(text.contains("- Medical License: ML-7781 (TX)"));
        assert!(text.contains("- Shipping Address: 200 Lamar Blvd, Austin"));

        let facility = report.into_single().unwrap();
        assert_eq!(facility.facility_id, "F-123456");
    }

    #[tokio::test]
    async fn test_details_list_license_and_agreement_columns() {
        let store = seeded_store().await;
        store
            .upsert_facility(&Facility {
                facility_id: "F-777777".to_string(),
                facility_name: "Dimod South Clinic".to_string(),
                status: "active".to_string(),
                account_id: SEEDED_ACCOUNT_ID.to_string(),
                has_signed_medical_liability_agreement: true,
                medical_license_id: Some("LIC-1".to_string()),
                medical_license_involvement: Some("owner".to_string()),
                medical_license_owner_first_name: Some("Ada".to_string()),
                medical_license_owner_last_name: Some("Lovelace".to_string()),
                account_has_accepted_jet_terms: true,
                shipping_address_line1: Some("1 Main St".to_string()),
                shipping_address_line2: Some("Suite 4".to_string()),
                shipping_address_commercial: true,
                ..Default::default()
            })
            .await
            .unwrap();

        let tool = FacilityLookup::new(store);
        let text = tool.run(by_id("F-777777")).await.unwrap().to_string();
        assert!(text.contains("- Signed Medical Liability Agreement: yes"));
        assert!(text.contains("- Medical License ID: LIC-1"));
        assert!(text.contains("- License Involvement: owner"));
        assert!(text.contains("- License Expired: no"));
        assert!(text.contains("- License Owner: Ada Lovelace"));
        assert!(text.contains("- Signed Financial Agreement: no"));
        assert!(text.contains("- Accepted Jet Terms: yes"));
        assert!(text.contains("- Agreement Signed: N/A"));
        assert!(text.contains("- Shipping Address: 1 Main St, Suite 4"));
        assert!(text.contains("- Commercial Shipping Address: yes"));
    }

    #[tokio::test]
    async fn test_mismatched_criteria_find_nothing() {
        let tool = FacilityLookup::new(seeded_store().await);
        let report = tool
            .run(FacilityFilter {
                facility_id: Some("F-654321".to_string()),
                account_id: Some(SEEDED_ACCOUNT_ID.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(report.to_string(), "No facilities found with the provided criteria.");
        assert!(report.into_single().is_none());
    }

    #[tokio::test]
    async fn test_name_search_lists_matches() {
        let tool = FacilityLookup::new(seeded_store().await);
        let report = tool
            .run(FacilityFilter {
                facility_name: Some("north".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let text = report.to_string();
        assert!(text.starts_with("Found 2 facilities matching your criteria:"));
        assert!(text.contains("- Northwind Spa (ID: F-654321) - Account: Northwind Account"));
        assert!(report.into_single().is_none());
    }

    #[tokio::test]
    async fn test_empty_filter_is_validation_error() {
        let tool = FacilityLookup::new(seeded_store().await);
        let err = tool.run(FacilityFilter::default()).await.unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }
}
