//! Live client for the Helios Financial lending API.
//!
//! Holds the single platform credential pair and a cached session token that
//! is reused across calls and refreshed proactively before it expires.
//! Per-dealer attribution goes through the `X-Org-Alias` header, never
//! through per-dealer credentials.

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::{FinanceError, Result};
use crate::lender::{
    AccountStatus, Contract, ContractStatus, Disclosure, DocumentKind, EquipmentCheck,
    FinancingProvider, InstallFlag, InstallPackage, MAX_UPLOAD_BYTES, PaymentSchedule,
    Stipulation, Vendor, validate_pricing_request,
};
use crate::pricing::{PricingEstimate, YearPayment};
use crate::providers::util::with_retry;

/// Refresh the session this long before the lender would reject it.
const SESSION_EXPIRY_SKEW: Duration = Duration::from_secs(60);

const GET_RETRIES: usize = 2;
const GET_RETRY_DELAY_MS: u64 = 300;

#[derive(Debug)]
struct Session {
    token: String,
    expires_at: Instant,
}

impl Session {
    fn usable(&self) -> bool {
        self.expires_at > Instant::now() + SESSION_EXPIRY_SKEW
    }
}

#[derive(Debug)]
pub struct HeliosClient {
    base_url: String,
    email: String,
    password: String,
    http: reqwest::Client,
    session: Mutex<Option<Session>>,
}

impl HeliosClient {
    pub fn new(base_url: &str, email: &str, password: &str) -> Result<Self> {
        if email.is_empty() || password.is_empty() {
            return Err(FinanceError::Configuration(
                "Helios platform credentials are not set".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .user_agent("finbridge/0.2")
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            email: email.to_string(),
            password: password.to_string(),
            http,
            session: Mutex::new(None),
        })
    }

    /// Returns a token that is good for at least [`SESSION_EXPIRY_SKEW`],
    /// logging in again when the cached one is missing or near expiry. The
    /// lock is held across the login so concurrent callers do not stampede
    /// the auth endpoint.
    async fn session_token(&self) -> Result<String> {
        let mut session = self.session.lock().await;
        if let Some(current) = session.as_ref() {
            if current.usable() {
                return Ok(current.token.clone());
            }
            debug!("Helios session near expiry, refreshing");
        }

        let fresh = self.login().await?;
        let token = fresh.token.clone();
        *session = Some(fresh);
        Ok(token)
    }

    async fn login(&self) -> Result<Session> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct LoginWire {
            token: String,
            expires_in: u64,
        }

        let url = format!("{}/auth/login", self.base_url);
        debug!("Logging in to Helios at {}", url);

        let response = self
            .http
            .post(&url)
            .json(&json!({ "email": self.email, "password": self.password }))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let err = FinanceError::from_provider_response(status.as_u16(), &text);
            // A rejected login is always an authentication failure, whatever
            // shape the body takes.
            if matches!(status.as_u16(), 400 | 401 | 403) {
                return Err(FinanceError::Authentication(
                    "Helios rejected the platform credentials".to_string(),
                ));
            }
            return Err(err);
        }

        let wire: LoginWire = serde_json::from_str(&text).map_err(|e| FinanceError::Provider {
            status: status.as_u16(),
            message: format!("unreadable login response: {e}"),
            detail: None,
        })?;

        Ok(Session {
            token: wire.token,
            expires_at: Instant::now() + Duration::from_secs(wire.expires_in),
        })
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(FinanceError::from_provider_response(status.as_u16(), &text));
        }
        serde_json::from_str(&text).map_err(|e| FinanceError::Provider {
            status: status.as_u16(),
            message: format!("unreadable lender response: {e}"),
            detail: None,
        })
    }

    /// Idempotent GET with bounded retry on transport errors.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let token = self.session_token().await?;
        let url = format!("{}{}", self.base_url, path);
        debug!("Requesting {}", url);

        let response = with_retry(
            || async {
                self.http
                    .get(&url)
                    .bearer_auth(&token)
                    .query(query)
                    .send()
                    .await
            },
            GET_RETRIES,
            GET_RETRY_DELAY_MS,
        )
        .await?;

        Self::decode(response).await
    }

    /// Non-idempotent call; sent exactly once, never blind-retried.
    async fn send_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
        org_alias: Option<&str>,
    ) -> Result<T> {
        let token = self.session_token().await?;
        let url = format!("{}{}", self.base_url, path);
        debug!("Sending {} {}", method, url);

        let mut request = self.http.request(method, &url).bearer_auth(&token);
        if let Some(alias) = org_alias {
            request = request.header("X-Org-Alias", alias);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        Self::decode(request.send().await?).await
    }
}

// Wire shapes as Helios returns them (camelCase), translated into the
// domain types at the edge.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferWire {
    id: String,
    name: String,
    product_type: String,
    escalator_rate: f64,
    term_years: u32,
    payments: Vec<YearPaymentWire>,
    total_amount_paid: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YearPaymentWire {
    year: u32,
    monthly_payment: f64,
    yearly_cost: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PricingWire {
    products: Vec<OfferWire>,
}

impl From<OfferWire> for PricingEstimate {
    fn from(wire: OfferWire) -> Self {
        PricingEstimate {
            id: wire.id,
            name: wire.name,
            product_type: wire.product_type,
            escalation_rate_percent: wire.escalator_rate,
            term_years: wire.term_years,
            payments: wire
                .payments
                .into_iter()
                .map(|p| YearPayment {
                    year: p.year,
                    monthly_amount: p.monthly_payment,
                    yearly_amount: p.yearly_cost,
                })
                .collect(),
            total_amount_paid: wire.total_amount_paid,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VendorWire {
    manufacturer: String,
    model: String,
    equipment_type: String,
}

impl From<VendorWire> for Vendor {
    fn from(wire: VendorWire) -> Self {
        Vendor {
            manufacturer: wire.manufacturer,
            model: wire.model,
            equipment_type: wire.equipment_type,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VendorListWire {
    vendors: Vec<VendorWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EquipmentCheckWire {
    approved: bool,
    vendor: Option<VendorWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisclosureWire {
    id: String,
    #[serde(rename = "type")]
    disclosure_type: String,
    language: String,
    version: String,
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisclosureListWire {
    disclosures: Vec<DisclosureWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractWire {
    contract_id: String,
    status: String,
    signed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl TryFrom<ContractWire> for Contract {
    type Error = FinanceError;

    fn try_from(wire: ContractWire) -> Result<Contract> {
        let status = match wire.status.as_str() {
            "SENT" => ContractStatus::Sent,
            "SIGNED" => ContractStatus::Signed,
            "VOIDED" => ContractStatus::Voided,
            other => {
                return Err(FinanceError::Provider {
                    status: 200,
                    message: format!("unknown contract status '{other}'"),
                    detail: None,
                });
            }
        };
        Ok(Contract {
            contract_id: wire.contract_id,
            status,
            signed_at: wire.signed_at,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StipulationWire {
    id: String,
    description: String,
    satisfied: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StipulationListWire {
    stipulations: Vec<StipulationWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlagWire {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlagListWire {
    flags: Vec<FlagWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleWire {
    product_id: String,
    escalator_rate: f64,
    term_years: u32,
    payments: Vec<YearPaymentWire>,
    total_amount_paid: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountStatusWire {
    account_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentWire {
    document_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractIdWire {
    contract_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SigningLinkWire {
    url: String,
}

#[async_trait]
impl FinancingProvider for HeliosClient {
    #[instrument(name = "HeliosPricing", skip(self, system_design), fields(state_code = %state_code))]
    async fn get_estimated_pricing(
        &self,
        state_code: &str,
        financed_amount: f64,
        system_design: Option<&serde_json::Value>,
        org_alias: Option<&str>,
    ) -> Result<Vec<PricingEstimate>> {
        validate_pricing_request(state_code, financed_amount)?;

        let mut body = json!({
            "stateCode": state_code.to_ascii_uppercase(),
            "financedAmount": financed_amount,
        });
        if let Some(design) = system_design {
            body["systemDesign"] = design.clone();
        }

        let wire: PricingWire = self
            .send_json(reqwest::Method::POST, "/pricing/estimate", Some(body), org_alias)
            .await?;
        Ok(wire.products.into_iter().map(Into::into).collect())
    }

    #[instrument(name = "HeliosVendors", skip(self))]
    async fn get_approved_vendors(&self, equipment_type: &str) -> Result<Vec<Vendor>> {
        let wire: VendorListWire = self
            .get_json("/equipment/vendors", &[("type", equipment_type)])
            .await?;
        Ok(wire.vendors.into_iter().map(Into::into).collect())
    }

    async fn validate_equipment(
        &self,
        manufacturer: &str,
        model: &str,
        equipment_type: &str,
    ) -> Result<EquipmentCheck> {
        let wire: EquipmentCheckWire = self
            .get_json(
                "/equipment/validate",
                &[
                    ("manufacturer", manufacturer),
                    ("model", model),
                    ("type", equipment_type),
                ],
            )
            .await?;
        Ok(EquipmentCheck {
            approved: wire.approved,
            vendor: wire.vendor.map(Into::into),
        })
    }

    async fn get_disclosures(
        &self,
        disclosure_type: Option<&str>,
        language: &str,
    ) -> Result<Vec<Disclosure>> {
        let mut query = vec![("language", language)];
        if let Some(dt) = disclosure_type {
            query.push(("type", dt));
        }
        let wire: DisclosureListWire = self.get_json("/disclosures", &query).await?;
        Ok(wire
            .disclosures
            .into_iter()
            .map(|d| Disclosure {
                id: d.id,
                disclosure_type: d.disclosure_type,
                language: d.language,
                version: d.version,
                text: d.text,
            })
            .collect())
    }

    async fn upload_document(
        &self,
        account_id: &str,
        kind: DocumentKind,
        file_bytes: Vec<u8>,
        filename: &str,
    ) -> Result<String> {
        if file_bytes.len() > MAX_UPLOAD_BYTES {
            return Err(FinanceError::validation(
                "file",
                "document exceeds the 10MB upload limit",
            ));
        }

        let token = self.session_token().await?;
        let url = format!("{}/accounts/{}/documents", self.base_url, account_id);
        let form = reqwest::multipart::Form::new()
            .text("documentType", kind.as_str())
            .part(
                "file",
                reqwest::multipart::Part::bytes(file_bytes).file_name(filename.to_string()),
            );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .multipart(form)
            .send()
            .await?;
        let wire: DocumentWire = Self::decode(response).await?;
        Ok(wire.document_id)
    }

    async fn save_install_package(&self, account_id: &str, package: &InstallPackage) -> Result<()> {
        // Overwrite-in-place on the lender side; safe to repeat.
        let body = serde_json::to_value(package).map_err(|e| {
            FinanceError::validation("install_package", format!("not serializable: {e}"))
        })?;
        let _: serde_json::Value = self
            .send_json(
                reqwest::Method::PUT,
                &format!("/accounts/{account_id}/install-package"),
                Some(body),
                None,
            )
            .await?;
        Ok(())
    }

    async fn submit_install_package(&self, account_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .send_json(
                reqwest::Method::POST,
                &format!("/accounts/{account_id}/install-package/submit"),
                None,
                None,
            )
            .await?;
        Ok(())
    }

    async fn get_install_package_flags(&self, account_id: &str) -> Result<Vec<InstallFlag>> {
        let wire: FlagListWire = self
            .get_json(&format!("/accounts/{account_id}/install-package/flags"), &[])
            .await?;
        Ok(wire
            .flags
            .into_iter()
            .map(|f| InstallFlag {
                code: f.code,
                message: f.message,
            })
            .collect())
    }

    async fn send_contract(&self, account_id: &str) -> Result<String> {
        let wire: ContractIdWire = self
            .send_json(
                reqwest::Method::POST,
                &format!("/accounts/{account_id}/contracts"),
                None,
                None,
            )
            .await?;
        Ok(wire.contract_id)
    }

    async fn void_contract(&self, account_id: &str, contract_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .send_json(
                reqwest::Method::POST,
                &format!("/accounts/{account_id}/contracts/{contract_id}/void"),
                None,
                None,
            )
            .await?;
        Ok(())
    }

    async fn get_current_contract(&self, account_id: &str) -> Result<Contract> {
        let wire: ContractWire = self
            .get_json(&format!("/accounts/{account_id}/contracts/current"), &[])
            .await?;
        wire.try_into()
    }

    async fn get_signing_link(&self, account_id: &str) -> Result<String> {
        let wire: SigningLinkWire = self
            .get_json(
                &format!("/accounts/{account_id}/contracts/current/signing-link"),
                &[],
            )
            .await?;
        Ok(wire.url)
    }

    async fn get_stipulations(&self, account_id: &str) -> Result<Vec<Stipulation>> {
        let wire: StipulationListWire = self
            .get_json(&format!("/accounts/{account_id}/stipulations"), &[])
            .await?;
        Ok(wire
            .stipulations
            .into_iter()
            .map(|s| Stipulation {
                id: s.id,
                description: s.description,
                satisfied: s.satisfied,
            })
            .collect())
    }

    async fn get_payment_schedule(&self, account_id: &str) -> Result<PaymentSchedule> {
        let wire: ScheduleWire = self
            .get_json(&format!("/accounts/{account_id}/payment-schedule"), &[])
            .await?;
        Ok(PaymentSchedule {
            product_id: wire.product_id,
            escalation_rate_percent: wire.escalator_rate,
            term_years: wire.term_years,
            payments: wire
                .payments
                .into_iter()
                .map(|p| YearPayment {
                    year: p.year,
                    monthly_amount: p.monthly_payment,
                    yearly_amount: p.yearly_cost,
                })
                .collect(),
            total_amount_paid: wire.total_amount_paid,
        })
    }

    async fn get_account_status(&self, account_id: &str) -> Result<AccountStatus> {
        let wire: AccountStatusWire = self
            .get_json(&format!("/accounts/{account_id}/status"), &[])
            .await?;
        Ok(AccountStatus {
            external_id: wire.account_id,
            status: wire.status,
        })
    }
}
