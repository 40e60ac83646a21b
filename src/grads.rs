use serde::Serialize;

use crate::params::NamedParams;

/// Gradient magnitude statistics for a single step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GradientSummary {
    /// Mean L2 norm over the parameters that hold a gradient, `0.0` if none do.
    pub mean_norm: f32,
    pub max_norm: f32,
    pub params_with_grad: usize,
}

impl GradientSummary {
    /// Scans `params` and aggregates the L2 norm of every present gradient.
    pub fn collect<P: NamedParams + ?Sized>(params: &P) -> Self {
        let mut sum = 0.0;
        let mut max_norm = 0.0f32;
        let mut count = 0;

        for (_, param) in params.named_params() {
            let Some(grad) = &param.grad else {
                continue;
            };

            let norm = l2_norm(grad.iter().copied());
            sum += norm;
            max_norm = max_norm.max(norm);
            count += 1;
        }

        let mean_norm = if count > 0 { sum / count as f32 } else { 0.0 };

        Self {
            mean_norm,
            max_norm,
            params_with_grad: count,
        }
    }
}

fn l2_norm(values: impl Iterator<Item = f32>) -> f32 {
    values.map(|v| v * v).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::*;
    use crate::params::{Param, ParamStore};

    fn with_grad(grad: &[f32]) -> Param {
        let mut p = Param::new(ArrayD::zeros(IxDyn(&[grad.len()])));
        p.grad = Some(ArrayD::from_shape_vec(IxDyn(&[grad.len()]), grad.to_vec()).unwrap());
        p
    }

    #[test]
    fn empty_parameter_set_is_zero() {
        let store = ParamStore::new();
        assert_eq!(GradientSummary::collect(&store), GradientSummary::default());
    }

    #[test]
    fn parameters_without_gradients_are_skipped() {
        let mut store = ParamStore::new();
        store.insert("a", with_grad(&[3.0, 4.0]));
        store.insert("frozen", Param::new(ArrayD::ones(IxDyn(&[4]))));
        store.insert("b", with_grad(&[0.0, 1.0]));

        let summary = GradientSummary::collect(&store);
        assert_eq!(summary.params_with_grad, 2);
        assert_eq!(summary.mean_norm, 3.0);
        assert_eq!(summary.max_norm, 5.0);
    }

    #[test]
    fn no_gradients_means_zero_mean() {
        let mut store = ParamStore::new();
        store.insert("w", Param::new(ArrayD::ones(IxDyn(&[3]))));

        let summary = GradientSummary::collect(&store);
        assert_eq!(summary.params_with_grad, 0);
        assert_eq!(summary.mean_norm, 0.0);
        assert_eq!(summary.max_norm, 0.0);
    }

    #[test]
    fn norm_of_multidimensional_gradient() {
        let mut p = Param::new(ArrayD::zeros(IxDyn(&[2, 2])));
        p.grad = Some(ArrayD::from_elem(IxDyn(&[2, 2]), 1.0));
        let params = vec![("w".to_string(), p)];

        let summary = GradientSummary::collect(&params);
        assert_eq!(summary.mean_norm, 2.0);
        assert_eq!(summary.max_norm, 2.0);
    }
}
