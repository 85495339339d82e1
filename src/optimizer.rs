use ndarray::{ArrayD, Zip};

use crate::layers::Param;

/// Adam with bias correction. Moment buffers are created on the first step
/// and keyed by parameter order, so one optimizer serves one model.
#[derive(Debug, Clone)]
pub struct Optimizer {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    step: i32,
    moments: Vec<(ArrayD<f32>, ArrayD<f32>)>,
}

impl Optimizer {
    pub fn adam(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            step: 0,
            moments: Vec::new(),
        }
    }

    /// Drops the moment buffers, as if the optimizer were new
    pub fn reset(&mut self) {
        self.step = 0;
        self.moments.clear();
    }

    pub fn iterations(&self) -> i32 {
        self.step
    }

    pub fn apply(&mut self, params: Vec<Param<'_>>) {
        if self.moments.len() != params.len() {
            self.moments = params
                .iter()
                .map(|p| (ArrayD::zeros(p.grad.raw_dim()), ArrayD::zeros(p.grad.raw_dim())))
                .collect();
            self.step = 0;
        }
        self.step += 1;

        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);
        let lr_t = self.learning_rate * (1.0 - b2.powi(self.step)).sqrt() / (1.0 - b1.powi(self.step));

        for (param, (m, v)) in params.into_iter().zip(self.moments.iter_mut()) {
            let Param { mut value, grad } = param;
            Zip::from(&mut value)
                .and(&grad)
                .and(m)
                .and(v)
                .for_each(|w, &g, m, v| {
                    *m = b1 * *m + (1.0 - b1) * g;
                    *v = b2 * *v + (1.0 - b2) * g * g;
                    *w -= lr_t * *m / (v.sqrt() + eps);
                });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        let mut opt = Optimizer::adam(0.01);
        let mut w: Array1<f32> = array![1.0, -1.0];
        let g: Array1<f32> = array![0.5, -2.0];
        opt.apply(vec![Param {
            value: w.view_mut().into_dyn(),
            grad: g.view().into_dyn(),
        }]);
        // First bias-corrected Adam step is lr * sign(g)
        assert_abs_diff_eq!(w[0], 0.99, epsilon = 1e-5);
        assert_abs_diff_eq!(w[1], -0.99, epsilon = 1e-5);
        assert_eq!(opt.iterations(), 1);
    }

    #[test]
    fn test_minimizes_quadratic() {
        let mut opt = Optimizer::adam(0.1);
        let mut w: Array1<f32> = array![3.0];
        for _ in 0..500 {
            let g = w.mapv(|x| 2.0 * x);
            opt.apply(vec![Param {
                value: w.view_mut().into_dyn(),
                grad: g.view().into_dyn(),
            }]);
        }
        assert!(w[0].abs() < 0.05);
    }
}
