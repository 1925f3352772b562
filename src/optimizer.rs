use crate::network::Parameters;
use itertools::izip;
use ndarray::Zip;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamConfig {
    pub epsilon: f64,
    pub beta1: f64,
    pub beta2: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        AdamConfig {
            epsilon: 1e-8,
            beta1: 0.9,
            beta2: 0.999,
        }
    }
}

// Adam update rule.
// Keeps running averages of the gradient (first moment) and of its square (second moment) for
// every parameter, and scales each step by their bias-corrected ratio.
#[derive(Debug, Clone)]
pub struct AdamUpdate {
    config: AdamConfig,
    iteration: i32,
    first_moment: Parameters,
    second_moment: Parameters,
}

impl AdamUpdate {
    // Moments start at zero and take the shape of the parameters they will update.
    pub fn new(config: AdamConfig, parameters: &Parameters) -> AdamUpdate {
        AdamUpdate {
            config,
            iteration: 0,
            first_moment: Parameters::zeros_like(parameters),
            second_moment: Parameters::zeros_like(parameters),
        }
    }

    pub fn iteration(&self) -> i32 {
        self.iteration
    }

    pub fn update(&mut self, parameters: &mut Parameters, step_size: f64, gradient: &Parameters) {
        let AdamConfig {
            epsilon,
            beta1,
            beta2,
        } = self.config;

        self.iteration += 1;
        let bias_correction1 = 1.0 - beta1.powi(self.iteration);
        let bias_correction2 = 1.0 - beta2.powi(self.iteration);
        let scaled_step = step_size * bias_correction2.sqrt() / bias_correction1;

        for (parameter, gradient, first, second) in izip!(
            parameters.arrays_mut(),
            gradient.arrays(),
            self.first_moment.arrays_mut(),
            self.second_moment.arrays_mut()
        ) {
            Zip::from(parameter)
                .and(gradient)
                .and(first)
                .and(second)
                .for_each(|parameter, &gradient, first, second| {
                    *first = beta1 * *first + (1.0 - beta1) * gradient;
                    *second = beta2 * *second + (1.0 - beta2) * gradient * gradient;
                    *parameter -= scaled_step * *first / (second.sqrt() + epsilon);
                });
        }
    }
}
