use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::batch::DeliveryBatch;
use crate::models::delivery::{DeliveryRequest, PaymentStatus};
use crate::models::payment::DeliveryPayment;

struct OwnerShare {
    owner_id: String,
    percentage: f64,
}

/// Host owner first, then pooled owners in boarding order; repeat owners are merged.
fn owner_shares(host: &DeliveryRequest, batches: &[DeliveryBatch]) -> Vec<OwnerShare> {
    if batches.is_empty() {
        return vec![OwnerShare {
            owner_id: host.owner_id().to_string(),
            percentage: 100.0,
        }];
    }

    let members = std::iter::once((host.owner_id(), host.owner_contribution_percentage)).chain(
        batches
            .iter()
            .map(|batch| (batch.owner_id.as_str(), batch.owner_contribution_percentage)),
    );

    let mut shares: Vec<OwnerShare> = Vec::new();
    for (owner_id, percentage) in members {
        match shares.iter_mut().find(|share| share.owner_id == owner_id) {
            Some(share) => share.percentage += percentage,
            None => shares.push(OwnerShare {
                owner_id: owner_id.to_string(),
                percentage,
            }),
        }
    }
    shares
}

/// Splits `fee` into whole cents by largest remainder so the parts always add up to the fee.
/// Ties on the remainder go to the earlier share.
pub fn apportion_cents(fee: f64, percentages: &[f64]) -> Vec<i64> {
    let fee_cents = (fee * 100.0).round() as i64;
    let exact: Vec<f64> = percentages
        .iter()
        .map(|percentage| fee_cents as f64 * percentage / 100.0)
        .collect();

    let mut cents: Vec<i64> = exact.iter().map(|value| value.floor() as i64).collect();
    let leftover = fee_cents - cents.iter().sum::<i64>();
    if leftover == 0 || cents.is_empty() {
        return cents;
    }

    let mut ranked: Vec<usize> = (0..exact.len()).collect();
    let remainder = |idx: usize| exact[idx] - exact[idx].floor();
    ranked.sort_by(|&a, &b| {
        let by_remainder = remainder(b).partial_cmp(&remainder(a)).unwrap_or(Ordering::Equal);
        by_remainder.then(a.cmp(&b))
    });
    if leftover < 0 {
        ranked.reverse();
    }

    for step in 0..leftover.unsigned_abs() as usize {
        cents[ranked[step % ranked.len()]] += leftover.signum();
    }
    cents
}

pub fn split_payments(
    host: &DeliveryRequest,
    batches: &[DeliveryBatch],
    now: DateTime<Utc>,
) -> Vec<DeliveryPayment> {
    let shares = owner_shares(host, batches);
    let percentages: Vec<f64> = shares.iter().map(|share| share.percentage).collect();
    let cents = apportion_cents(host.delivery_fee, &percentages);

    shares
        .into_iter()
        .zip(cents)
        .map(|(share, amount_cents)| DeliveryPayment {
            id: Uuid::new_v4(),
            delivery_request_id: host.id,
            owner_id: share.owner_id,
            contribution_percentage: share.percentage,
            amount: amount_cents as f64 / 100.0,
            status: PaymentStatus::Pending,
            created_at: now,
        })
        .collect()
}
