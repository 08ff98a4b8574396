/// Helper function for evaluating the dot product between two vectors.
/// The slices are expected to have the same length.
///
/// ## Example
///
/// ```
/// let ratings = vec![0.0, 0.5, 1.0];
/// let sensitivities = vec![-2.0, -4.0, 0.0];
///
/// let dot = ess_planner::utils::dot_product(&ratings, &sensitivities);
/// assert_eq!(dot, -2.0);
/// ```
pub fn dot_product(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
