//! Nomination scoring. The score only breaks voting ties, so it favours
//! places that are close for everyone and evenly reachable.

use rally_types::models::TravelInfo;

const WEIGHT_MAX_DISTANCE: f64 = 40.0;
const WEIGHT_BALANCE: f64 = 20.0;
const WEIGHT_RATING: f64 = 25.0;
const WEIGHT_COST: f64 = 15.0;

/// Worst-case distance at which the closeness term reaches zero.
const MAX_DISTANCE_M: f64 = 10_000.0;
/// Standard deviation at which the balance term reaches zero.
const BALANCE_SPREAD_M: f64 = 5_000.0;

const DEFAULT_RATING: f64 = 3.0;

fn balance_factor(distances: &[f64]) -> f64 {
    if distances.len() <= 1 {
        return 1.0;
    }
    let n = distances.len() as f64;
    let mean = distances.iter().sum::<f64>() / n;
    let variance = distances.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
    (1.0 - variance.sqrt() / BALANCE_SPREAD_M).max(0.0)
}

fn cost_factor(cost: Option<f64>) -> f64 {
    match cost {
        None => 0.6,
        Some(c) if (30.0..=100.0).contains(&c) => 1.0,
        Some(c) if c < 30.0 => 0.8,
        Some(c) => (1.0 - (c - 100.0) / 200.0).max(0.2),
    }
}

/// Scores a place in `0..=100` from the participants' travel to it, its
/// rating (0 to 5) and its average cost per person.
pub fn score(travel_infos: &[TravelInfo], rating: Option<f64>, cost: Option<f64>) -> u32 {
    let distances: Vec<f64> = travel_infos.iter().map(|t| f64::from(t.distance)).collect();
    let max_distance = distances.iter().copied().reduce(f64::max).unwrap_or(MAX_DISTANCE_M);

    let closeness = (1.0 - max_distance / MAX_DISTANCE_M).max(0.0) * WEIGHT_MAX_DISTANCE;
    let balance = balance_factor(&distances) * WEIGHT_BALANCE;
    let rating = rating.unwrap_or(DEFAULT_RATING).clamp(0.0, 5.0) / 5.0 * WEIGHT_RATING;
    let cost = cost_factor(cost) * WEIGHT_COST;

    (closeness + balance + rating + cost).round().clamp(0.0, 100.0) as u32
}
