//! Helper functions and data types

/// Floor applied to denominators in ratio and margin computations.
pub const EPSILON: f64 = 1e-12;

/// Arithmetic mean of `values`, or `0.0` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation of `values`, or `0.0` for an empty slice.
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mu = mean(values);
    let var = values.iter().map(|v| (v - mu).powi(2)).sum::<f64>()
        / values.len() as f64;

    var.sqrt()
}

/// Mean of the `Some` values produced by `iter`, or `None` if there are none.
pub fn mean_of_present<I>(iter: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (sum, count) = iter
        .into_iter()
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));

    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn mean_and_std_of_empty_are_zero() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(population_std(&[]), 0.0);
    }

    #[test]
    fn population_std_matches_closed_form() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(population_std(&values), 2.0);
    }

    #[test]
    fn mean_of_present_skips_missing() {
        assert_eq!(mean_of_present([Some(1.0), None, Some(3.0)]), Some(2.0));
        assert_eq!(mean_of_present([None, None]), None);
    }
}
