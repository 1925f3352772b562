use ndarray::{Array, Array1, Array2, Axis, Zip};
use ndarray_rand::{RandomExt, rand::Rng, rand_distr::Uniform};

// The topology is fixed: two ReLU hidden layers, dropout in front of the output layer, and a
// log-softmax head over the ten digit classes.
pub const INPUT_NEURONS: usize = 28 * 28;
pub const HIDDEN_NEURONS_1: usize = 200;
pub const HIDDEN_NEURONS_2: usize = 100;
pub const OUTPUT_NEURONS: usize = 10;
pub const DROPOUT_RATE: f64 = 0.2;

// Weights and biases of every linear layer, ordered from input to output.
// Weights are `[fan_out x fan_in]` and biases `[fan_out x 1]`, so a layer computes `w.a + b` for a
// matrix `a` holding one sample per column. The same shape is used for gradients and optimizer
// moments.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    pub weights: Vec<Array2<f64>>,
    pub biases: Vec<Array2<f64>>,
}

impl Parameters {
    pub fn zeros_like(other: &Parameters) -> Parameters {
        Parameters {
            weights: other
                .weights
                .iter()
                .map(|weight| Array::zeros(weight.raw_dim()))
                .collect(),
            biases: other
                .biases
                .iter()
                .map(|bias| Array::zeros(bias.raw_dim()))
                .collect(),
        }
    }

    pub fn arrays(&self) -> impl Iterator<Item = &Array2<f64>> {
        self.weights.iter().chain(self.biases.iter())
    }

    pub fn arrays_mut(&mut self) -> impl Iterator<Item = &mut Array2<f64>> {
        self.weights.iter_mut().chain(self.biases.iter_mut())
    }
}

// Everything the backward pass needs from a forward pass. inputs[l] is the matrix fed into linear
// layer l (after dropout for the output layer), pre_activations[l] is w.a + b of hidden layer l.
struct ForwardPass {
    inputs: Vec<Array2<f64>>,
    pre_activations: Vec<Array2<f64>>,
    log_probabilities: Array2<f64>,
}

pub struct Network {
    sizes: Vec<usize>,
    dropout_rate: f64,
    parameters: Parameters,
}

impl Network {
    // Builds the digit classifier for samples with `input_neurons` features.
    pub fn new<R: Rng + ?Sized>(input_neurons: usize, rng: &mut R) -> Network {
        Network::with_sizes(
            vec![
                input_neurons,
                HIDDEN_NEURONS_1,
                HIDDEN_NEURONS_2,
                OUTPUT_NEURONS,
            ],
            DROPOUT_RATE,
            rng,
        )
    }

    // Every layer but the last uses ReLU, and dropout is applied to the output of the last hidden
    // layer. Smaller instances of the same shape are handy in tests.
    pub(crate) fn with_sizes<R: Rng + ?Sized>(
        sizes: Vec<usize>,
        dropout_rate: f64,
        rng: &mut R,
    ) -> Network {
        assert!(sizes.len() >= 3, "need at least one hidden layer");

        Network {
            parameters: Parameters {
                // Glorot uniform: draw from U(-a, a) with a = sqrt(6 / (fan_in + fan_out)).
                weights: sizes
                    .iter()
                    .zip(sizes.iter().skip(1))
                    .map(|(&fan_in, &fan_out)| {
                        let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
                        Array::random_using(
                            (fan_out, fan_in),
                            Uniform::new_inclusive(-bound, bound),
                            rng,
                        )
                    })
                    .collect(),
                biases: sizes
                    .iter()
                    .skip(1)
                    .map(|&size| Array::zeros((size, 1)))
                    .collect(),
            },
            sizes,
            dropout_rate,
        }
    }

    pub fn input_neurons(&self) -> usize {
        self.sizes[0]
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.parameters
    }

    pub fn set_parameters(&mut self, parameters: Parameters) {
        self.parameters = parameters;
    }

    // Log-probabilities of every class for every column of `input`, with dropout disabled.
    // The result has shape `[10 x samples]`.
    pub fn predict(&self, input: &Array2<f64>) -> Array2<f64> {
        self.forward(input, None).log_probabilities
    }

    // Mean negative log-likelihood of `labels` (1-indexed classes) in inference mode.
    pub fn loss(&self, input: &Array2<f64>, labels: &Array1<usize>) -> f64 {
        negative_log_likelihood(&self.predict(input), labels)
    }

    // Runs a training-mode forward pass over a mini-batch and returns its mean loss together with
    // the gradient of that loss for every parameter.
    pub fn backpropagate<R: Rng + ?Sized>(
        &self,
        input: &Array2<f64>,
        labels: &Array1<usize>,
        rng: &mut R,
    ) -> (f64, Parameters) {
        let mask = self.dropout_mask(input.ncols(), rng);
        let pass = self.forward(input, Some(&mask));
        let loss = negative_log_likelihood(&pass.log_probabilities, labels);

        // For log-softmax followed by NLL, the gradient with respect to the output layer's
        // pre-activation is softmax(z) - one_hot(label), averaged over the batch.
        let mut delta = pass.log_probabilities.mapv(f64::exp);
        for (column, &label) in labels.iter().enumerate() {
            delta[[label - 1, column]] -= 1.0;
        }
        delta /= input.ncols() as f64;

        let mut gradient = Parameters::zeros_like(&self.parameters);
        let last = self.parameters.weights.len() - 1;

        for layer in (0..=last).rev() {
            gradient.biases[layer] = delta.sum_axis(Axis(1)).insert_axis(Axis(1));
            gradient.weights[layer] = delta.dot(&pass.inputs[layer].t());

            if layer == 0 {
                break;
            }

            let mut upstream = self.parameters.weights[layer].t().dot(&delta);
            if layer == last {
                upstream *= &mask;
            }
            Zip::from(&mut upstream)
                .and(&pass.pre_activations[layer - 1])
                .for_each(|gradient, &z| {
                    if z <= 0.0 {
                        *gradient = 0.0;
                    }
                });
            delta = upstream;
        }

        (loss, gradient)
    }

    // Inverted dropout: each activation is kept with probability 1 - rate and scaled by
    // 1 / (1 - rate), so inference needs no rescaling.
    fn dropout_mask<R: Rng + ?Sized>(&self, samples: usize, rng: &mut R) -> Array2<f64> {
        let rate = self.dropout_rate;
        let neurons = self.sizes[self.sizes.len() - 2];

        Array::random_using((neurons, samples), Uniform::new(0.0_f64, 1.0), rng)
            .mapv(|draw: f64| if draw < rate { 0.0 } else { 1.0 / (1.0 - rate) })
    }

    fn forward(&self, input: &Array2<f64>, dropout_mask: Option<&Array2<f64>>) -> ForwardPass {
        let last = self.parameters.weights.len() - 1;
        let mut inputs = Vec::with_capacity(last + 1);
        let mut pre_activations = Vec::with_capacity(last);
        let mut activation = input.clone();

        for (weight, bias) in self
            .parameters
            .weights
            .iter()
            .zip(self.parameters.biases.iter())
            .take(last)
        {
            let z = weight.dot(&activation) + bias;
            inputs.push(activation);
            activation = z.mapv(relu);
            pre_activations.push(z);
        }

        if let Some(mask) = dropout_mask {
            activation *= mask;
        }

        let z = self.parameters.weights[last].dot(&activation) + &self.parameters.biases[last];
        inputs.push(activation);

        ForwardPass {
            inputs,
            pre_activations,
            log_probabilities: log_softmax(z),
        }
    }
}

fn relu(z: f64) -> f64 {
    z.max(0.0)
}

// Column-wise log-softmax, shifted by the column maximum to keep exp() finite.
fn log_softmax(mut z: Array2<f64>) -> Array2<f64> {
    for mut column in z.columns_mut() {
        let max = column.fold(f64::NEG_INFINITY, |max, &value| max.max(value));
        let log_sum = column
            .fold(0.0, |sum, &value| sum + (value - max).exp())
            .ln();
        column.mapv_inplace(|value| value - max - log_sum);
    }
    z
}

fn negative_log_likelihood(log_probabilities: &Array2<f64>, labels: &Array1<usize>) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }

    let total = labels
        .iter()
        .enumerate()
        .map(|(column, &label)| -log_probabilities[[label - 1, column]])
        .sum::<f64>();
    total / labels.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use ndarray_rand::rand::{SeedableRng, rngs::StdRng};

    fn small_network(dropout_rate: f64) -> Network {
        Network::with_sizes(vec![5, 4, 3, 3], dropout_rate, &mut StdRng::seed_from_u64(3))
    }

    #[test]
    fn digit_network_has_fixed_topology() {
        let network = Network::new(INPUT_NEURONS, &mut StdRng::seed_from_u64(0));
        let shapes = network
            .parameters()
            .weights
            .iter()
            .map(|weight| weight.dim())
            .collect::<Vec<_>>();

        assert_eq!(shapes, vec![(200, 784), (100, 200), (10, 100)]);
        assert_eq!(network.input_neurons(), 784);
    }

    #[test]
    fn glorot_initialization_respects_bounds_and_zero_biases() {
        let network = Network::new(INPUT_NEURONS, &mut StdRng::seed_from_u64(1));

        for weight in &network.parameters().weights {
            let (fan_out, fan_in) = weight.dim();
            let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
            assert!(weight.iter().all(|value| value.abs() <= bound));
            assert!(weight.iter().any(|value| *value != 0.0));
        }
        for bias in &network.parameters().biases {
            assert!(bias.iter().all(|value| *value == 0.0));
        }
    }

    #[test]
    fn predictions_are_log_probabilities() {
        let network = small_network(DROPOUT_RATE);
        let input = Array2::from_shape_fn((5, 7), |(row, column)| (row as f64 - column as f64) / 3.0);

        let output = network.predict(&input);

        assert_eq!(output.dim(), (3, 7));
        for column in output.columns() {
            let total = column.iter().map(|value| value.exp()).sum::<f64>();
            assert!((total - 1.0).abs() < 1e-12);
            assert!(column.iter().all(|value| *value <= 0.0));
        }
    }

    #[test]
    fn inference_ignores_dropout() {
        // Both networks draw the same weights; only the dropout rate differs.
        let input = Array2::from_elem((5, 4), 0.5);
        assert_eq!(small_network(0.9).predict(&input), small_network(0.0).predict(&input));
    }

    #[test]
    fn log_softmax_handles_large_values() {
        let output = log_softmax(array![[1000.0], [1000.0]]);
        assert!((output[[0, 0]] - (0.5_f64).ln()).abs() < 1e-12);
    }

    #[test]
    fn dropout_mask_zeroes_the_configured_fraction() {
        let network = small_network(DROPOUT_RATE);
        let mask = network.dropout_mask(10_000, &mut StdRng::seed_from_u64(9));

        let dropped = mask.iter().filter(|value| **value == 0.0).count() as f64 / mask.len() as f64;
        assert!((dropped - DROPOUT_RATE).abs() < 0.02);
        assert!(mask.iter().all(|value| *value == 0.0 || (*value - 1.25).abs() < 1e-12));
    }

    fn gradient_input() -> (Array2<f64>, Array1<usize>) {
        let input = Array2::from_shape_fn((5, 6), |(row, column)| {
            ((row * 7 + column * 3) % 11) as f64 / 11.0 - 0.3
        });
        (input, array![1, 2, 3, 1, 2, 3])
    }

    // Compares every entry of `gradient` with central differences of `loss`, which is evaluated
    // on the network with one parameter nudged at a time.
    fn assert_gradient_matches(
        network: &mut Network,
        gradient: &Parameters,
        loss: impl Fn(&Network) -> f64,
    ) {
        let epsilon = 1e-6;
        let analytic = gradient.arrays().cloned().collect::<Vec<_>>();

        for (index, array) in analytic.iter().enumerate() {
            for (position, &expected) in array.indexed_iter() {
                let original = network.parameters_mut().arrays_mut().nth(index).unwrap()[position];

                network.parameters_mut().arrays_mut().nth(index).unwrap()[position] = original + epsilon;
                let plus = loss(network);
                network.parameters_mut().arrays_mut().nth(index).unwrap()[position] = original - epsilon;
                let minus = loss(network);
                network.parameters_mut().arrays_mut().nth(index).unwrap()[position] = original;

                let numerical = (plus - minus) / (2.0 * epsilon);
                assert!(
                    (numerical - expected).abs() < 1e-5,
                    "array {index} at {position:?}: {numerical} vs {expected}"
                );
            }
        }
    }

    #[test]
    fn backpropagation_matches_numerical_gradient() {
        let mut network = small_network(0.0);
        let (input, labels) = gradient_input();

        let (loss, gradient) = network.backpropagate(&input, &labels, &mut StdRng::seed_from_u64(4));
        assert!((loss - network.loss(&input, &labels)).abs() < 1e-12);

        assert_gradient_matches(&mut network, &gradient, |network| network.loss(&input, &labels));
    }

    #[test]
    fn training_pass_applies_dropout_and_differentiates_through_it() {
        let mut network = small_network(0.5);
        let (input, labels) = gradient_input();

        let (loss, gradient) = network.backpropagate(&input, &labels, &mut StdRng::seed_from_u64(4));

        // The same seed draws the same mask the training pass used.
        let mask = network.dropout_mask(input.ncols(), &mut StdRng::seed_from_u64(4));
        assert!(mask.iter().any(|value| *value == 0.0));
        let masked_loss = |network: &Network| {
            let pass = network.forward(&input, Some(&mask));
            negative_log_likelihood(&pass.log_probabilities, &labels)
        };

        assert!((loss - masked_loss(&network)).abs() < 1e-12);
        assert!((loss - network.loss(&input, &labels)).abs() > 1e-9);

        assert_gradient_matches(&mut network, &gradient, masked_loss);
    }

    #[test]
    fn nll_of_confident_correct_prediction_is_small() {
        let log_probabilities = array![[0.0, -20.0], [-20.0, 0.0]];
        let labels = array![1, 2];
        assert!(negative_log_likelihood(&log_probabilities, &labels) < 1e-6);
    }
}
