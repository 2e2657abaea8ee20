//! Pass-rate banding: the fixed-threshold mapping from the fraction
//! of passed test cases to partial credit. Pure function, knows
//! nothing about execution or storage.

/// Map a pass count to partial credit out of `max_points`.
///
/// Bands on pass_rate = passed/total:
///   >= 0.9 -> 100%, >= 0.7 -> 80%, >= 0.5 -> 60%, >= 0.3 -> 40%,
///   otherwise 0. Rounding truncates toward zero. Zero test cases
/// score zero.
pub fn score(passed: u32, total: u32, max_points: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let pass_rate = passed as f64 / total as f64;
    let fraction = if pass_rate >= 0.9 {
        1.0
    } else if pass_rate >= 0.7 {
        0.8
    } else if pass_rate >= 0.5 {
        0.6
    } else if pass_rate >= 0.3 {
        0.4
    } else {
        0.0
    };
    (max_points as f64 * fraction) as u32
}
