//! Deterministic stand-in for the Helios API, used when `test_mode` is on
//! (environments without live lender credentials).
//!
//! Responses match the shape and invariants of real lender responses;
//! pricing in particular runs the actual schedule calculator, so this
//! module doubles as the executable reference for its algorithm.

use async_trait::async_trait;

use crate::error::{FinanceError, Result};
use crate::lender::{
    AccountStatus, Contract, ContractStatus, Disclosure, DocumentKind, EquipmentCheck,
    FinancingProvider, InstallFlag, InstallPackage, MAX_UPLOAD_BYTES, PaymentSchedule,
    Stipulation, Vendor, validate_pricing_request,
};
use crate::pricing::{PricingEstimate, compute_schedule, standard_products};

pub struct MockProvider;

impl MockProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FinancingProvider for MockProvider {
    async fn get_estimated_pricing(
        &self,
        state_code: &str,
        financed_amount: f64,
        _system_design: Option<&serde_json::Value>,
        _org_alias: Option<&str>,
    ) -> Result<Vec<PricingEstimate>> {
        validate_pricing_request(state_code, financed_amount)?;
        compute_schedule(financed_amount, &standard_products())
    }

    async fn get_approved_vendors(&self, equipment_type: &str) -> Result<Vec<Vendor>> {
        Ok(vec![
            Vendor {
                manufacturer: "Trane".to_string(),
                model: "XR14".to_string(),
                equipment_type: equipment_type.to_string(),
            },
            Vendor {
                manufacturer: "Carrier".to_string(),
                model: "24ACC6".to_string(),
                equipment_type: equipment_type.to_string(),
            },
        ])
    }

    async fn validate_equipment(
        &self,
        manufacturer: &str,
        model: &str,
        equipment_type: &str,
    ) -> Result<EquipmentCheck> {
        let approved = self
            .get_approved_vendors(equipment_type)
            .await?
            .into_iter()
            .find(|v| {
                v.manufacturer.eq_ignore_ascii_case(manufacturer)
                    && v.model.eq_ignore_ascii_case(model)
            });
        Ok(EquipmentCheck {
            approved: approved.is_some(),
            vendor: approved,
        })
    }

    async fn get_disclosures(
        &self,
        disclosure_type: Option<&str>,
        language: &str,
    ) -> Result<Vec<Disclosure>> {
        let all = vec![
            Disclosure {
                id: "credit-auth".to_string(),
                disclosure_type: "credit".to_string(),
                language: language.to_string(),
                version: "2026-01".to_string(),
                text: "You authorize a credit inquiry.".to_string(),
            },
            Disclosure {
                id: "esign-consent".to_string(),
                disclosure_type: "legal".to_string(),
                language: language.to_string(),
                version: "2026-01".to_string(),
                text: "You consent to electronic signatures.".to_string(),
            },
        ];
        Ok(match disclosure_type {
            Some(dt) => all.into_iter().filter(|d| d.disclosure_type == dt).collect(),
            None => all,
        })
    }

    async fn upload_document(
        &self,
        account_id: &str,
        kind: DocumentKind,
        file_bytes: Vec<u8>,
        _filename: &str,
    ) -> Result<String> {
        if file_bytes.len() > MAX_UPLOAD_BYTES {
            return Err(FinanceError::validation(
                "file",
                "document exceeds the 10MB upload limit",
            ));
        }
        // Stable function of the input so test runs are reproducible.
        Ok(format!("doc-{}-{}", account_id, kind.as_str()))
    }

    async fn save_install_package(
        &self,
        _account_id: &str,
        _package: &InstallPackage,
    ) -> Result<()> {
        Ok(())
    }

    async fn submit_install_package(&self, _account_id: &str) -> Result<()> {
        Ok(())
    }

    async fn get_install_package_flags(&self, _account_id: &str) -> Result<Vec<InstallFlag>> {
        Ok(vec![])
    }

    async fn send_contract(&self, account_id: &str) -> Result<String> {
        Ok(format!("contract-{account_id}"))
    }

    async fn void_contract(&self, _account_id: &str, _contract_id: &str) -> Result<()> {
        Ok(())
    }

    async fn get_current_contract(&self, account_id: &str) -> Result<Contract> {
        Ok(Contract {
            contract_id: format!("contract-{account_id}"),
            status: ContractStatus::Sent,
            signed_at: None,
        })
    }

    async fn get_signing_link(&self, _account_id: &str) -> Result<String> {
        // Synthetic accounts have no signable document behind them.
        Err(FinanceError::validation(
            "account_id",
            "signing links are not available for test-mode accounts",
        ))
    }

    async fn get_stipulations(&self, _account_id: &str) -> Result<Vec<Stipulation>> {
        Ok(vec![Stipulation {
            id: "stip-income".to_string(),
            description: "Provide proof of income.".to_string(),
            satisfied: false,
        }])
    }

    async fn get_payment_schedule(&self, account_id: &str) -> Result<PaymentSchedule> {
        let products = standard_products();
        let estimates = compute_schedule(15_000.0, &products)?;
        let estimate = estimates
            .into_iter()
            .next()
            .ok_or_else(|| FinanceError::NotFound(format!("payment schedule for {account_id}")))?;
        Ok(PaymentSchedule {
            product_id: estimate.id,
            escalation_rate_percent: estimate.escalation_rate_percent,
            term_years: estimate.term_years,
            payments: estimate.payments,
            total_amount_paid: estimate.total_amount_paid,
        })
    }

    async fn get_account_status(&self, account_id: &str) -> Result<AccountStatus> {
        Ok(AccountStatus {
            external_id: account_id.to_string(),
            status: "APPROVED".to_string(),
        })
    }
}
