/// Discounted n-step returns, in time order.
///
/// The recursion runs backwards from `bootstrap`: `R_n = r_n + gamma * bootstrap` and
/// `R_i = r_i + gamma * R_{i+1}`.
pub fn discounted_returns(rewards: &[f32], bootstrap: f32, gamma: f32) -> Vec<f32> {
    let mut returns = vec![0.; rewards.len()];
    let mut r = bootstrap;
    for (i, reward) in rewards.iter().enumerate().rev() {
        r = reward + gamma * r;
        returns[i] = r;
    }
    returns
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(lhs: &[f32], rhs: &[f32]) {
        assert_eq!(lhs.len(), rhs.len());
        for (l, r) in lhs.iter().zip(rhs) {
            assert!((l - r).abs() < 1e-5, "{lhs:?} != {rhs:?}");
        }
    }

    #[test]
    fn terminal_segment() {
        let returns = discounted_returns(&[1., 1., 1.], 0., 0.99);
        assert_close(&returns, &[2.9701, 1.99, 1.]);
    }

    #[test]
    fn bootstrapped_segment() {
        let returns = discounted_returns(&[0., 1.], 10., 0.5);
        // R_2 = 1 + 0.5 * 10 = 6, R_1 = 0 + 0.5 * 6 = 3
        assert_close(&returns, &[3., 6.]);
    }

    #[test]
    fn recursion_holds_for_every_step() {
        let rewards = [0.5, -1., 0., 1., 0.25, -0.75];
        let (bootstrap, gamma) = (1.7, 0.9);
        let returns = discounted_returns(&rewards, bootstrap, gamma);
        let n = rewards.len();
        assert!((returns[n - 1] - (rewards[n - 1] + gamma * bootstrap)).abs() < 1e-6);
        for i in 0..n - 1 {
            assert!((returns[i] - (rewards[i] + gamma * returns[i + 1])).abs() < 1e-6);
        }
    }

    #[test]
    fn empty_segment_has_no_returns() {
        assert!(discounted_returns(&[], 3., 0.99).is_empty());
    }
}
