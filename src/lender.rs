//! The seam between this service and any external financing lender.
//!
//! Callers only ever see [`FinancingProvider`]; a concrete lender is picked
//! by id through the [`ProviderRegistry`] so a second lender is a pure
//! addition, never a change at the call sites.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{FinanceError, Result};
use crate::pricing::PricingEstimate;

/// Documents the lender accepts against a financing account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    BluetoothHvacTool,
    ProofOfLoadHvac,
    HvacInstallationPhotos,
    Other,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::BluetoothHvacTool => "bluetooth_hvac_tool",
            DocumentKind::ProofOfLoadHvac => "proof_of_load_hvac",
            DocumentKind::HvacInstallationPhotos => "hvac_installation_photos",
            DocumentKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Vendor {
    pub manufacturer: String,
    pub model: String,
    pub equipment_type: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EquipmentCheck {
    pub approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<Vendor>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Disclosure {
    pub id: String,
    pub disclosure_type: String,
    pub language: String,
    pub version: String,
    pub text: String,
}

/// Equipment details submitted before funding. Saving is repeatable;
/// submission is one-way.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InstallPackage {
    #[serde(default)]
    pub equipment: Vec<InstalledEquipment>,
    #[serde(default)]
    pub install_date: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstalledEquipment {
    pub manufacturer: String,
    pub model: String,
    pub equipment_type: String,
    #[serde(default)]
    pub serial_number: Option<String>,
}

/// A validation flag the lender raises against an install package; all
/// flags must clear before submission is accepted.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstallFlag {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Sent,
    Signed,
    Voided,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Contract {
    pub contract_id: String,
    pub status: ContractStatus,
    #[serde(default)]
    pub signed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A condition attached to a conditional approval.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Stipulation {
    pub id: String,
    pub description: String,
    pub satisfied: bool,
}

/// The realized schedule for an approved or conditionally approved account.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentSchedule {
    pub product_id: String,
    pub escalation_rate_percent: f64,
    pub term_years: u32,
    pub payments: Vec<crate::pricing::YearPayment>,
    pub total_amount_paid: f64,
}

/// Raw status vocabulary as the lender reports it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountStatus {
    pub external_id: String,
    pub status: String,
}

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Everything this service can ask of a lender. No operation is assumed
/// idempotent unless its docs say so.
#[async_trait]
pub trait FinancingProvider: Send + Sync {
    /// Live provider-priced products for one state and amount, as an
    /// alternative to the local calculator.
    async fn get_estimated_pricing(
        &self,
        state_code: &str,
        financed_amount: f64,
        system_design: Option<&serde_json::Value>,
        org_alias: Option<&str>,
    ) -> Result<Vec<PricingEstimate>>;

    async fn get_approved_vendors(&self, equipment_type: &str) -> Result<Vec<Vendor>>;

    /// A negative result is not fatal; callers may proceed with manual
    /// justification.
    async fn validate_equipment(
        &self,
        manufacturer: &str,
        model: &str,
        equipment_type: &str,
    ) -> Result<EquipmentCheck>;

    async fn get_disclosures(
        &self,
        disclosure_type: Option<&str>,
        language: &str,
    ) -> Result<Vec<Disclosure>>;

    async fn upload_document(
        &self,
        account_id: &str,
        kind: DocumentKind,
        file_bytes: Vec<u8>,
        filename: &str,
    ) -> Result<String>;

    /// Overwrite-in-place; safe to repeat.
    async fn save_install_package(&self, account_id: &str, package: &InstallPackage) -> Result<()>;

    /// One-way transition. On an ambiguous failure (timeout) the caller must
    /// check current state before retrying.
    async fn submit_install_package(&self, account_id: &str) -> Result<()>;

    async fn get_install_package_flags(&self, account_id: &str) -> Result<Vec<InstallFlag>>;

    async fn send_contract(&self, account_id: &str) -> Result<String>;

    async fn void_contract(&self, account_id: &str, contract_id: &str) -> Result<()>;

    async fn get_current_contract(&self, account_id: &str) -> Result<Contract>;

    /// Only meaningful for a non-synthetic account.
    async fn get_signing_link(&self, account_id: &str) -> Result<String>;

    async fn get_stipulations(&self, account_id: &str) -> Result<Vec<Stipulation>>;

    async fn get_payment_schedule(&self, account_id: &str) -> Result<PaymentSchedule>;

    async fn get_account_status(&self, account_id: &str) -> Result<AccountStatus>;
}

impl std::fmt::Debug for dyn FinancingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn FinancingProvider")
    }
}

/// Local validation shared by every provider implementation.
pub fn validate_pricing_request(state_code: &str, financed_amount: f64) -> Result<()> {
    if state_code.len() != 2 || !state_code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(FinanceError::validation(
            "state_code",
            "must be a two-letter state code",
        ));
    }
    if !financed_amount.is_finite() || financed_amount <= 0.0 {
        return Err(FinanceError::validation(
            "financed_amount",
            "must be a positive amount",
        ));
    }
    Ok(())
}

type ProviderConstructor = Box<dyn Fn() -> Arc<dyn FinancingProvider> + Send + Sync>;

/// Registered map of lender constructors keyed by lender id. Resolving an
/// unknown id is a deployment defect, not a user error.
pub struct ProviderRegistry {
    constructors: HashMap<String, ProviderConstructor>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, lender_id: &str, constructor: F)
    where
        F: Fn() -> Arc<dyn FinancingProvider> + Send + Sync + 'static,
    {
        self.constructors
            .insert(lender_id.to_string(), Box::new(constructor));
    }

    pub fn create(&self, lender_id: &str) -> Result<Arc<dyn FinancingProvider>> {
        match self.constructors.get(lender_id) {
            Some(constructor) => Ok(constructor()),
            None => Err(FinanceError::Configuration(format!(
                "no financing provider registered for lender '{lender_id}'"
            ))),
        }
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;

    #[test]
    fn test_pricing_request_validation() {
        assert!(validate_pricing_request("CA", 12_000.0).is_ok());

        for bad_state in ["C", "CAL", "C1", ""] {
            let err = validate_pricing_request(bad_state, 12_000.0).unwrap_err();
            assert!(matches!(err, FinanceError::Validation { ref field, .. } if field == "state_code"));
        }

        let err = validate_pricing_request("CA", 0.0).unwrap_err();
        assert!(
            matches!(err, FinanceError::Validation { ref field, .. } if field == "financed_amount")
        );
    }

    #[test]
    fn test_registry_resolves_known_lender() {
        let mut registry = ProviderRegistry::new();
        registry.register("helios", || Arc::new(MockProvider::new()));
        assert!(registry.create("helios").is_ok());
    }

    #[test]
    fn test_registry_rejects_unknown_lender() {
        let registry = ProviderRegistry::new();
        let err = registry.create("acme-capital").unwrap_err();
        assert!(matches!(err, FinanceError::Configuration(_)));
    }
}
