use statrs::distribution::{DiscreteCDF, NegativeBinomial};

/// Poisson pmf table for k = 0..=max_k, computed iteratively to avoid
/// factorial overflow. Residual mass above max_k is folded into the last
/// bucket so the table always sums to 1.
pub fn poisson_pmf_table(lambda: f64, max_k: u32) -> Vec<f64> {
    let max_k = max_k as usize;
    let lambda = lambda.max(0.0);
    let mut out = vec![0.0; max_k + 1];

    out[0] = (-lambda).exp();
    for k in 1..=max_k {
        out[k] = out[k - 1] * lambda / k as f64;
    }

    let sum: f64 = out.iter().sum();
    if sum < 1.0 {
        out[max_k] += 1.0 - sum;
    }
    out
}

pub fn poisson_pmf(k: u32, lambda: f64) -> f64 {
    let lambda = lambda.max(1e-9);
    let mut p = (-lambda).exp();
    for i in 1..=k {
        p *= lambda / i as f64;
    }
    p
}

/// P(X <= k) for X ~ Poisson(lambda).
pub fn poisson_cdf(lambda: f64, k: u32) -> f64 {
    let lambda = lambda.max(1e-9);
    let mut term = (-lambda).exp();
    let mut acc = term;
    for i in 1..=k {
        term *= lambda / i as f64;
        acc += term;
    }
    acc.min(1.0)
}

/// P(X <= k) for an overdispersed count with the given mean, parameterised
/// by the dispersion alpha: variance = mean * (1 + mean / alpha). With
/// r = alpha and p = alpha / (alpha + mean) this is the standard Negative
/// Binomial, which statrs evaluates directly.
pub fn neg_binomial_cdf(mean: f64, alpha: f64, k: u32) -> f64 {
    let mean = mean.max(1e-6);
    let alpha = alpha.max(1e-6);
    let p = alpha / (alpha + mean);
    match NegativeBinomial::new(alpha, p) {
        Ok(nb) => nb.cdf(k as u64).min(1.0),
        // Degenerate parameters; fall back to the equi-mean Poisson.
        Err(_) => poisson_cdf(mean, k),
    }
}

/// Pearson correlation of two equal-length samples. Returns 0.0 when either
/// side has zero variance (constant vector) or fewer than two points.
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    if xs.len() != ys.len() || xs.len() < 2 {
        return 0.0;
    }
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x <= 0.0 || var_y <= 0.0 {
        return 0.0;
    }
    (cov / (var_x * var_y).sqrt()).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poisson_table_sums_to_one() {
        let t = poisson_pmf_table(2.3, 10);
        let sum: f64 = t.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn poisson_cdf_matches_table_prefix() {
        let t = poisson_pmf_table(1.7, 20);
        let prefix: f64 = t.iter().take(4).sum();
        assert!((poisson_cdf(1.7, 3) - prefix).abs() < 1e-9);
    }

    #[test]
    fn neg_binomial_widens_both_tails_at_equal_mean() {
        let mean = 10.0;
        assert!(neg_binomial_cdf(mean, 2.5, 4) > poisson_cdf(mean, 4));
        assert!(1.0 - neg_binomial_cdf(mean, 2.5, 16) > 1.0 - poisson_cdf(mean, 16));
    }

    #[test]
    fn pearson_recovers_perfect_correlation() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        let ys = [2.0, 4.0, 6.0, 8.0];
        assert!((pearson(&xs, &ys) - 1.0).abs() < 1e-12);
        let inv = [8.0, 6.0, 4.0, 2.0];
        assert!((pearson(&xs, &inv) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn pearson_zero_for_constant_input() {
        let xs = [1.0, 1.0, 1.0];
        let ys = [0.0, 1.0, 0.0];
        assert_eq!(pearson(&xs, &ys), 0.0);
    }
}
