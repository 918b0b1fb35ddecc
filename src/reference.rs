//! Cached reads of the lender's slow-moving reference data: approved
//! equipment vendors (per category) and legal disclosures.
//!
//! The cache only has a coherent shape for the broadest fetch: vendor lists
//! are cached per equipment category for an hour, disclosures only for the
//! unfiltered all-types lookup and for a day. Type-filtered or forced
//! requests always go to the lender.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheLookup, TtlCache};
use crate::error::Result;
use crate::lender::{Disclosure, FinancingProvider, Vendor};

const VENDOR_TTL: Duration = Duration::from_secs(60 * 60);
const DISCLOSURE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct ReferenceDataService {
    provider: Arc<dyn FinancingProvider>,
    vendors: TtlCache<Vec<Vendor>>,
    disclosures: TtlCache<Vec<Disclosure>>,
}

impl ReferenceDataService {
    pub fn new(provider: Arc<dyn FinancingProvider>) -> Self {
        Self {
            provider,
            vendors: TtlCache::new(),
            disclosures: TtlCache::new(),
        }
    }

    pub async fn approved_vendors(
        &self,
        equipment_type: &str,
        force: bool,
    ) -> Result<CacheLookup<Vec<Vendor>>> {
        let provider = self.provider.clone();
        self.vendors
            .fetch(equipment_type, VENDOR_TTL, force, || async move {
                provider.get_approved_vendors(equipment_type).await
            })
            .await
    }

    /// Disclosures for one language. Only the unfiltered all-types fetch is
    /// cacheable; a type filter or `force` goes straight to the lender.
    pub async fn disclosures(
        &self,
        disclosure_type: Option<&str>,
        language: &str,
        force: bool,
    ) -> Result<CacheLookup<Vec<Disclosure>>> {
        if disclosure_type.is_some() || force {
            let data = self.provider.get_disclosures(disclosure_type, language).await?;
            return Ok(CacheLookup {
                data,
                from_cache: false,
                age_seconds: None,
            });
        }

        let provider = self.provider.clone();
        self.disclosures
            .fetch(language, DISCLOSURE_TTL, false, || async move {
                provider.get_disclosures(None, language).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FinanceError;
    use crate::lender::{
        AccountStatus, Contract, DocumentKind, EquipmentCheck, InstallFlag, InstallPackage,
        PaymentSchedule, Stipulation,
    };
    use crate::pricing::PricingEstimate;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Counts calls and can be flipped into a failing state.
    #[derive(Default)]
    struct FlakyProvider {
        vendor_calls: AtomicUsize,
        disclosure_calls: AtomicUsize,
        down: AtomicBool,
    }

    impl FlakyProvider {
        fn fail(&self) {
            self.down.store(true, Ordering::SeqCst);
        }

        fn check_up(&self) -> Result<()> {
            if self.down.load(Ordering::SeqCst) {
                Err(FinanceError::Provider {
                    status: 503,
                    message: "maintenance".to_string(),
                    detail: None,
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl FinancingProvider for FlakyProvider {
        async fn get_estimated_pricing(
            &self,
            _: &str,
            _: f64,
            _: Option<&serde_json::Value>,
            _: Option<&str>,
        ) -> Result<Vec<PricingEstimate>> {
            unimplemented!("not exercised")
        }

        async fn get_approved_vendors(&self, equipment_type: &str) -> Result<Vec<Vendor>> {
            self.vendor_calls.fetch_add(1, Ordering::SeqCst);
            self.check_up()?;
            Ok(vec![Vendor {
                manufacturer: "Trane".to_string(),
                model: "XR14".to_string(),
                equipment_type: equipment_type.to_string(),
            }])
        }

        async fn validate_equipment(&self, _: &str, _: &str, _: &str) -> Result<EquipmentCheck> {
            unimplemented!("not exercised")
        }

        async fn get_disclosures(
            &self,
            disclosure_type: Option<&str>,
            language: &str,
        ) -> Result<Vec<Disclosure>> {
            self.disclosure_calls.fetch_add(1, Ordering::SeqCst);
            self.check_up()?;
            Ok(vec![Disclosure {
                id: "credit-auth".to_string(),
                disclosure_type: disclosure_type.unwrap_or("credit").to_string(),
                language: language.to_string(),
                version: "2026-01".to_string(),
                text: "text".to_string(),
            }])
        }

        async fn upload_document(
            &self,
            _: &str,
            _: DocumentKind,
            _: Vec<u8>,
            _: &str,
        ) -> Result<String> {
            unimplemented!("not exercised")
        }

        async fn save_install_package(&self, _: &str, _: &InstallPackage) -> Result<()> {
            unimplemented!("not exercised")
        }

        async fn submit_install_package(&self, _: &str) -> Result<()> {
            unimplemented!("not exercised")
        }

        async fn get_install_package_flags(&self, _: &str) -> Result<Vec<InstallFlag>> {
            unimplemented!("not exercised")
        }

        async fn send_contract(&self, _: &str) -> Result<String> {
            unimplemented!("not exercised")
        }

        async fn void_contract(&self, _: &str, _: &str) -> Result<()> {
            unimplemented!("not exercised")
        }

        async fn get_current_contract(&self, _: &str) -> Result<Contract> {
            unimplemented!("not exercised")
        }

        async fn get_signing_link(&self, _: &str) -> Result<String> {
            unimplemented!("not exercised")
        }

        async fn get_stipulations(&self, _: &str) -> Result<Vec<Stipulation>> {
            unimplemented!("not exercised")
        }

        async fn get_payment_schedule(&self, _: &str) -> Result<PaymentSchedule> {
            unimplemented!("not exercised")
        }

        async fn get_account_status(&self, _: &str) -> Result<AccountStatus> {
            unimplemented!("not exercised")
        }
    }

    #[tokio::test]
    async fn test_vendor_lists_are_cached_per_category() {
        let provider = Arc::new(FlakyProvider::default());
        let service = ReferenceDataService::new(provider.clone());

        service.approved_vendors("hvac", false).await.unwrap();
        let hit = service.approved_vendors("hvac", false).await.unwrap();
        assert!(hit.from_cache);
        assert_eq!(provider.vendor_calls.load(Ordering::SeqCst), 1);

        // A different category is its own key.
        service.approved_vendors("water_heater", false).await.unwrap();
        assert_eq!(provider.vendor_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stale_vendors_served_when_lender_is_down() {
        let provider = Arc::new(FlakyProvider::default());
        let service = ReferenceDataService::new(provider.clone());

        service.approved_vendors("hvac", false).await.unwrap();
        provider.fail();

        // Forced refresh fails; the prior entry comes back instead.
        let fallback = service.approved_vendors("hvac", true).await.unwrap();
        assert!(fallback.from_cache);
        assert_eq!(fallback.data[0].manufacturer, "Trane");
    }

    #[tokio::test]
    async fn test_down_lender_with_empty_cache_propagates() {
        let provider = Arc::new(FlakyProvider::default());
        provider.fail();
        let service = ReferenceDataService::new(provider);

        let err = service.approved_vendors("hvac", false).await.unwrap_err();
        assert!(matches!(err, FinanceError::Provider { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_type_filtered_disclosures_bypass_the_cache() {
        let provider = Arc::new(FlakyProvider::default());
        let service = ReferenceDataService::new(provider.clone());

        service.disclosures(None, "en", false).await.unwrap();
        let cached = service.disclosures(None, "en", false).await.unwrap();
        assert!(cached.from_cache);
        assert_eq!(provider.disclosure_calls.load(Ordering::SeqCst), 1);

        // Filtered lookups always reach the lender.
        let filtered = service.disclosures(Some("legal"), "en", false).await.unwrap();
        assert!(!filtered.from_cache);
        assert_eq!(filtered.age_seconds, None);
        assert_eq!(provider.disclosure_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_forced_disclosures_bypass_the_cache() {
        let provider = Arc::new(FlakyProvider::default());
        let service = ReferenceDataService::new(provider.clone());

        service.disclosures(None, "en", false).await.unwrap();
        let forced = service.disclosures(None, "en", true).await.unwrap();
        assert!(!forced.from_cache);
        assert_eq!(provider.disclosure_calls.load(Ordering::SeqCst), 2);
    }
}
