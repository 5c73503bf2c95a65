/// Reputation in `[0, 1]` from cumulative totals.
///
/// Linear in `total_up - total_down` between `-boundary` (0) and `+boundary` (1), 0.5 for an even balance.
pub fn score(total_up: u64, total_down: u64, boundary: u64) -> f64 {
    let boundary = boundary.max(1) as f64;
    let balance = total_up as f64 - total_down as f64;
    ((balance + boundary) / (2.0 * boundary)).clamp(0.0, 1.0)
}
