//! Treatment allocation: hash-derived for visitors, random for devices.

use rand::Rng;
use serde::Serialize;

use crate::hash::get_bucket;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Walks the cumulative normalised shares and returns the first treatment
/// whose share strictly exceeds `bucket`. Shares are rounded to two decimals
/// before normalising by the raw sum, so a bucket near 1 can fall past the
/// last share; that yields `None`.
pub fn pick_with_weights_bucket<'a, T>(
    allocation_percentages: &[f64],
    treatments: &'a [T],
    bucket: f64,
) -> Option<&'a T> {
    let sum: f64 = allocation_percentages.iter().sum();
    let mut partial = 0.0;
    for (treatment, percentage) in treatments.iter().zip(allocation_percentages) {
        partial += round2(*percentage) / sum;
        if partial > bucket {
            return Some(treatment);
        }
    }
    None
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorAssignment {
    pub treatment_id: Option<String>,
    pub bucket_id: f64,
}

/// Buckets `experiment_id.identity_id` and picks the matching treatment.
pub fn assign_treatment_by_visitor(
    experiment_id: &str,
    identity_id: &str,
    allocation_percentages: &[f64],
    treatments: &[String],
) -> VisitorAssignment {
    let salted_id = format!("{experiment_id}.{identity_id}");
    let bucket_id = get_bucket(&salted_id);
    let treatment_id =
        pick_with_weights_bucket(allocation_percentages, treatments, bucket_id).cloned();
    VisitorAssignment {
        treatment_id,
        bucket_id,
    }
}

/// Draws a value in `[0, 100)` and walks the allocations from the end,
/// subtracting each percentage until the draw is used up.
pub fn assign_treatment<'a, T, R: Rng + ?Sized>(
    allocation_percentages: &[f64],
    treatments: &'a [T],
    rng: &mut R,
) -> Option<&'a T> {
    let mut remaining = rng.gen_range(0.0..100.0);
    let mut index = treatments.len();
    while remaining > 0.0 && index > 0 {
        index -= 1;
        remaining -= allocation_percentages.get(index).copied().unwrap_or(0.0);
    }
    // a zero draw never enters the walk
    treatments.get(index).or_else(|| treatments.last())
}
