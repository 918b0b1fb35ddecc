//! Escalating payment-schedule calculator.
//!
//! Pure module: given a financed principal and a table of lender product
//! definitions it produces the full year-by-year payment plan for each
//! product. Every monetary value is rounded to two decimals at the point it
//! is computed, which is required to reproduce the lender's reference
//! schedules bit-exactly.

use serde::{Deserialize, Serialize};

use crate::error::{FinanceError, Result};

/// One financing product as configured by the lender: a term, an annual
/// escalation rate, and the factor that turns the principal into the
/// first-year monthly payment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProductDefinition {
    pub id: String,
    pub name: String,
    pub product_type: String,
    pub term_years: u32,
    pub escalation_rate_percent: f64,
    pub first_year_factor: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct YearPayment {
    pub year: u32,
    pub monthly_amount: f64,
    pub yearly_amount: f64,
}

/// One computed offer: the product identity plus its full schedule and the
/// total paid over the term. Ephemeral; callers persist it if they care.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PricingEstimate {
    pub id: String,
    pub name: String,
    pub product_type: String,
    pub escalation_rate_percent: f64,
    pub term_years: u32,
    pub payments: Vec<YearPayment>,
    pub total_amount_paid: f64,
}

/// Rounds to two decimals, half-up.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Computes the schedule for every product against one principal.
///
/// The escalation compounds annually and is applied only when moving to the
/// next year, never before year 1. A zero escalation rate short-circuits to
/// a flat schedule so repeated multiplication cannot introduce float drift.
pub fn compute_schedule(
    principal: f64,
    products: &[ProductDefinition],
) -> Result<Vec<PricingEstimate>> {
    if !principal.is_finite() || principal <= 0.0 {
        return Err(FinanceError::validation(
            "financed_amount",
            "must be a positive amount",
        ));
    }

    products
        .iter()
        .map(|product| schedule_for_product(principal, product))
        .collect()
}

fn schedule_for_product(principal: f64, product: &ProductDefinition) -> Result<PricingEstimate> {
    if product.term_years == 0 {
        return Err(FinanceError::Configuration(format!(
            "product {} has a zero-year term",
            product.id
        )));
    }
    if product.first_year_factor <= 0.0 || !product.first_year_factor.is_finite() {
        return Err(FinanceError::Configuration(format!(
            "product {} has a non-positive first-year factor",
            product.id
        )));
    }
    if product.escalation_rate_percent < 0.0 || !product.escalation_rate_percent.is_finite() {
        return Err(FinanceError::Configuration(format!(
            "product {} has a negative escalation rate",
            product.id
        )));
    }

    let mut monthly = round2(principal * product.first_year_factor);
    let mut payments = Vec::with_capacity(product.term_years as usize);
    let mut total = 0.0;

    if product.escalation_rate_percent == 0.0 {
        // Flat plan: one rounded figure reused for every year.
        let yearly = round2(monthly * 12.0);
        for year in 1..=product.term_years {
            payments.push(YearPayment {
                year,
                monthly_amount: monthly,
                yearly_amount: yearly,
            });
        }
        total = round2(yearly * product.term_years as f64);
    } else {
        let growth = 1.0 + product.escalation_rate_percent / 100.0;
        for year in 1..=product.term_years {
            let yearly = round2(monthly * 12.0);
            payments.push(YearPayment {
                year,
                monthly_amount: monthly,
                yearly_amount: yearly,
            });
            total = round2(total + yearly);
            if year < product.term_years {
                monthly = round2(monthly * growth);
            }
        }
    }

    Ok(PricingEstimate {
        id: product.id.clone(),
        name: product.name.clone(),
        product_type: product.product_type.clone(),
        escalation_rate_percent: product.escalation_rate_percent,
        term_years: product.term_years,
        payments,
        total_amount_paid: total,
    })
}

/// The fixed product table used when no live lender rates are available.
/// The deterministic mock provider prices against exactly this table.
pub fn standard_products() -> Vec<ProductDefinition> {
    vec![
        ProductDefinition {
            id: "flat-10".to_string(),
            name: "ComfortPlan 10 Flat".to_string(),
            product_type: "lease".to_string(),
            term_years: 10,
            escalation_rate_percent: 0.0,
            first_year_factor: 0.01546,
        },
        ProductDefinition {
            id: "esc-10-29".to_string(),
            name: "ComfortPlan 10 Escalator".to_string(),
            product_type: "lease".to_string(),
            term_years: 10,
            escalation_rate_percent: 2.9,
            first_year_factor: 0.01389,
        },
        ProductDefinition {
            id: "esc-12-29".to_string(),
            name: "ComfortPlan 12 Escalator".to_string(),
            product_type: "lease".to_string(),
            term_years: 12,
            escalation_rate_percent: 2.9,
            first_year_factor: 0.01219,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(term_years: u32, escalation: f64, factor: f64) -> ProductDefinition {
        ProductDefinition {
            id: "p1".to_string(),
            name: "Test Plan".to_string(),
            product_type: "lease".to_string(),
            term_years,
            escalation_rate_percent: escalation,
            first_year_factor: factor,
        }
    }

    #[test]
    fn test_reference_flat_schedule() {
        // Lender reference scenario: $15,000 over 10 years, no escalator.
        let estimates = compute_schedule(15_000.0, &[product(10, 0.0, 0.01546)]).unwrap();
        let est = &estimates[0];

        assert_eq!(est.payments.len(), 10);
        assert_eq!(est.payments[0].monthly_amount, 231.90);
        assert_eq!(est.payments[0].yearly_amount, 2_782.80);
        for p in &est.payments {
            assert_eq!(p.monthly_amount, 231.90);
            assert_eq!(p.yearly_amount, 2_782.80);
        }
        assert_eq!(est.total_amount_paid, 27_828.00);
    }

    #[test]
    fn test_escalation_compounds_annually() {
        let estimates = compute_schedule(10_000.0, &[product(3, 2.9, 0.015)]).unwrap();
        let est = &estimates[0];

        // Year 1 starts at the un-escalated factor.
        assert_eq!(est.payments[0].monthly_amount, 150.00);
        assert_eq!(est.payments[0].yearly_amount, 1_800.00);
        // Each subsequent year escalates by 2.9%, rounded as computed.
        assert_eq!(est.payments[1].monthly_amount, round2(150.00 * 1.029));
        assert_eq!(
            est.payments[2].monthly_amount,
            round2(round2(150.00 * 1.029) * 1.029)
        );
    }

    #[test]
    fn test_total_is_rounded_sum_of_yearly_costs() {
        let estimates = compute_schedule(23_417.53, &[product(12, 3.5, 0.01219)]).unwrap();
        let est = &estimates[0];

        let mut running = 0.0;
        for p in &est.payments {
            assert_eq!(p.yearly_amount, round2(p.monthly_amount * 12.0));
            running = round2(running + p.yearly_amount);
        }
        assert_eq!(est.total_amount_paid, running);
    }

    #[test]
    fn test_zero_escalation_has_no_drift() {
        let estimates = compute_schedule(19_999.99, &[product(25, 0.0, 0.011)]).unwrap();
        let est = &estimates[0];
        let first = est.payments[0].monthly_amount;
        assert!(est.payments.iter().all(|p| p.monthly_amount == first));
    }

    #[test]
    fn test_rejects_non_positive_principal() {
        let products = [product(10, 0.0, 0.015)];
        for bad in [0.0, -1.0, f64::NAN] {
            let err = compute_schedule(bad, &products).unwrap_err();
            assert!(matches!(err, FinanceError::Validation { ref field, .. } if field == "financed_amount"));
        }
    }

    #[test]
    fn test_zero_term_is_a_configuration_error() {
        let err = compute_schedule(1_000.0, &[product(0, 0.0, 0.015)]).unwrap_err();
        assert!(matches!(err, FinanceError::Configuration(_)));
    }

    #[test]
    fn test_bad_factor_and_rate_are_configuration_errors() {
        let err = compute_schedule(1_000.0, &[product(10, 0.0, 0.0)]).unwrap_err();
        assert!(matches!(err, FinanceError::Configuration(_)));
        let err = compute_schedule(1_000.0, &[product(10, -1.0, 0.015)]).unwrap_err();
        assert!(matches!(err, FinanceError::Configuration(_)));
    }
}
