//! Finance-application records and the status state machine.
//!
//! Status never advances speculatively: every transition after creation is
//! driven by a lender poll or a verified webhook event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{FinanceError, Result};
use crate::lender::{Contract, InstallPackage, PaymentSchedule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    Pending,
    Submitted,
    Conditional,
    Approved,
    Denied,
    ContractSigned,
}

impl ApplicationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApplicationStatus::Denied | ApplicationStatus::ContractSigned
        )
    }

    /// Legal transitions. Re-asserting the current status is always allowed
    /// (polling the lender commonly observes no change).
    pub fn allows(&self, next: ApplicationStatus) -> bool {
        use ApplicationStatus::*;
        if *self == next {
            return true;
        }
        match self {
            Pending => matches!(next, Submitted | Conditional | Approved | Denied),
            Submitted => matches!(next, Conditional | Approved | Denied),
            // A conditional approval finalizes or is withdrawn.
            Conditional => matches!(next, Approved | Denied | ContractSigned),
            Approved => matches!(next, ContractSigned),
            Denied | ContractSigned => false,
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApplicationStatus::Pending => "PENDING",
            ApplicationStatus::Submitted => "SUBMITTED",
            ApplicationStatus::Conditional => "CONDITIONAL",
            ApplicationStatus::Approved => "APPROVED",
            ApplicationStatus::Denied => "DENIED",
            ApplicationStatus::ContractSigned => "CONTRACT_SIGNED",
        };
        f.write_str(s)
    }
}

impl FromStr for ApplicationStatus {
    type Err = FinanceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(ApplicationStatus::Pending),
            "SUBMITTED" => Ok(ApplicationStatus::Submitted),
            "CONDITIONAL" => Ok(ApplicationStatus::Conditional),
            "APPROVED" => Ok(ApplicationStatus::Approved),
            "DENIED" => Ok(ApplicationStatus::Denied),
            "CONTRACT_SIGNED" => Ok(ApplicationStatus::ContractSigned),
            other => Err(FinanceError::validation(
                "status",
                format!("unknown application status '{other}'"),
            )),
        }
    }
}

/// Cached lender sub-resources, typed per sub-flow. `merge` is strictly
/// additive: a patch replaces only the slots it carries and never clears
/// anything already present.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResponseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_schedule: Option<PaymentSchedule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract: Option<Contract>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_package: Option<InstallPackage>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, serde_json::Value>,
}

impl ResponseData {
    pub fn merge(&mut self, patch: ResponseData) {
        if patch.payment_schedule.is_some() {
            self.payment_schedule = patch.payment_schedule;
        }
        if patch.contract.is_some() {
            self.contract = patch.contract;
        }
        if patch.install_package.is_some() {
            self.install_package = patch.install_package;
        }
        for (key, value) in patch.extra {
            self.extra.insert(key, value);
        }
    }
}

/// One financing attempt for one proposal with one lender.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FinanceApplication {
    pub id: Uuid,
    pub proposal_id: Uuid,
    pub lender_id: String,
    pub external_id: Option<String>,
    pub status: ApplicationStatus,
    pub response_data: ResponseData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FinanceApplication {
    pub fn new(proposal_id: Uuid, lender_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            proposal_id,
            lender_id: lender_id.to_string(),
            external_id: None,
            status: ApplicationStatus::Pending,
            response_data: ResponseData::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Write-once: the lender's identifier never changes after acceptance.
    pub fn set_external_id(&mut self, external_id: &str) -> Result<()> {
        match &self.external_id {
            Some(existing) if existing == external_id => Ok(()),
            Some(existing) => Err(FinanceError::validation(
                "external_id",
                format!("already set to '{existing}', refusing to overwrite"),
            )),
            None => {
                self.external_id = Some(external_id.to_string());
                self.updated_at = Utc::now();
                Ok(())
            }
        }
    }

    pub fn transition(&mut self, next: ApplicationStatus) -> Result<()> {
        if !self.status.allows(next) {
            return Err(FinanceError::validation(
                "status",
                format!("illegal transition {} -> {next}", self.status),
            ));
        }
        if self.status != next {
            self.status = next;
            self.updated_at = Utc::now();
        }
        Ok(())
    }

    pub fn merge_response_data(&mut self, patch: ResponseData) {
        self.response_data.merge(patch);
        self.updated_at = Utc::now();
    }
}

/// Proposal status values this core touches. The proposal's own lifecycle
/// lives elsewhere; signing a financing contract moves it to `Accepted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Draft,
    Sent,
    Accepted,
    Declined,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lender::ContractStatus;

    fn app() -> FinanceApplication {
        FinanceApplication::new(Uuid::new_v4(), "helios")
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut a = app();
        a.transition(ApplicationStatus::Submitted).unwrap();
        a.transition(ApplicationStatus::Conditional).unwrap();
        a.transition(ApplicationStatus::Approved).unwrap();
        a.transition(ApplicationStatus::ContractSigned).unwrap();
        assert!(a.status.is_terminal());
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let mut a = app();
        a.transition(ApplicationStatus::Denied).unwrap();
        let err = a.transition(ApplicationStatus::Approved).unwrap_err();
        assert!(matches!(err, FinanceError::Validation { .. }));
    }

    #[test]
    fn test_reasserting_current_status_is_a_noop() {
        let mut a = app();
        a.transition(ApplicationStatus::Submitted).unwrap();
        let updated = a.updated_at;
        a.transition(ApplicationStatus::Submitted).unwrap();
        assert_eq!(a.updated_at, updated);
    }

    #[test]
    fn test_approved_cannot_regress() {
        let mut a = app();
        a.transition(ApplicationStatus::Approved).unwrap();
        assert!(a.transition(ApplicationStatus::Pending).is_err());
        assert!(a.transition(ApplicationStatus::Submitted).is_err());
    }

    #[test]
    fn test_external_id_is_write_once() {
        let mut a = app();
        a.set_external_id("acct-123").unwrap();
        // Same value is fine, a different one is refused.
        a.set_external_id("acct-123").unwrap();
        assert!(a.set_external_id("acct-999").is_err());
        assert_eq!(a.external_id.as_deref(), Some("acct-123"));
    }

    #[test]
    fn test_merge_is_additive() {
        let mut a = app();
        a.merge_response_data(ResponseData {
            contract: Some(Contract {
                contract_id: "c-1".to_string(),
                status: ContractStatus::Sent,
                signed_at: None,
            }),
            ..Default::default()
        });

        let mut extra = Map::new();
        extra.insert("signing_url".to_string(), serde_json::json!("https://x"));
        a.merge_response_data(ResponseData {
            extra,
            ..Default::default()
        });

        // The earlier contract slot survives an unrelated patch.
        assert_eq!(
            a.response_data.contract.as_ref().unwrap().contract_id,
            "c-1"
        );
        assert!(a.response_data.extra.contains_key("signing_url"));
    }

    #[test]
    fn test_status_round_trips_through_strings() {
        for status in [
            ApplicationStatus::Pending,
            ApplicationStatus::Submitted,
            ApplicationStatus::Conditional,
            ApplicationStatus::Approved,
            ApplicationStatus::Denied,
            ApplicationStatus::ContractSigned,
        ] {
            assert_eq!(status.to_string().parse::<ApplicationStatus>().unwrap(), status);
        }
    }
}
