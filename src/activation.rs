pub trait ActivationFunction: Send + Sync + 'static {
    const NAME: &'static str;

    fn apply(x: f64) -> f64;

    /// Derivative at the point whose image is `y`.
    fn deriv_from_output(y: f64) -> f64;

    fn apply_multiple(x: &[f64], y: &mut [f64]) {
        for i in 0..x.len() {
            y[i] = Self::apply(x[i]);
        }
    }
}

pub mod activation_functions {
    use super::ActivationFunction;

    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct Sigmoid;
    impl ActivationFunction for Sigmoid {
        const NAME: &'static str = "sigmoid";

        /// Picks the branch whose exponent is non-positive, so `exp` never overflows.
        fn apply(x: f64) -> f64 {
            if x > 0.0 {
                1.0 / (1.0 + f64::exp(-x))
            } else {
                let e = f64::exp(x);
                e / (e + 1.0)
            }
        }

        fn deriv_from_output(y: f64) -> f64 {
            y * (1.0 - y)
        }
    }

    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct Tanh;
    impl ActivationFunction for Tanh {
        const NAME: &'static str = "tanh";

        /// Same two-branch trick as [`Sigmoid`], on `exp(-2|x|)`.
        fn apply(x: f64) -> f64 {
            if x > 0.0 {
                let e = f64::exp(-2.0 * x);
                (1.0 - e) / (1.0 + e)
            } else {
                let e = f64::exp(2.0 * x);
                (e - 1.0) / (e + 1.0)
            }
        }

        fn deriv_from_output(y: f64) -> f64 {
            1.0 - y * y
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::{ActivationFunction, activation_functions::*};

    #[test]
    fn tanh_matches_std() {
        for x in [-3.0, -0.5, 0.0, 0.25, 2.0] {
            assert_relative_eq!(Tanh::apply(x), f64::tanh(x), epsilon = 1e-12);
        }
    }

    #[test]
    fn saturation_stays_finite() {
        for x in [-1e4, -800.0, 800.0, 1e4] {
            let t = Tanh::apply(x);
            let s = Sigmoid::apply(x);
            assert!(t.is_finite() && s.is_finite());
            assert!((-1.0..=1.0).contains(&t));
            assert!((0.0..=1.0).contains(&s));
        }
        assert_eq!(Tanh::apply(1e4), 1.0);
        assert_eq!(Sigmoid::apply(-1e4), 0.0);
    }

    #[test]
    fn derivatives_from_outputs() {
        let y = Sigmoid::apply(0.3);
        assert_relative_eq!(Sigmoid::deriv_from_output(y), y * (1.0 - y));
        assert_relative_eq!(Tanh::deriv_from_output(Tanh::apply(0.0)), 1.0);
    }

    #[test]
    fn apply_multiple_is_elementwise() {
        let mut y = [0.0; 3];
        Sigmoid::apply_multiple(&[0.0, 100.0, -100.0], &mut y);
        assert_relative_eq!(y[0], 0.5);
        assert_relative_eq!(y[1], 1.0);
        assert_relative_eq!(y[2], 0.0, epsilon = 1e-40);
    }
}
