use crate::callbacks::{Callback, EpochSummary};
use crate::dataset::LabeledSet;
use crate::network::Network;
use crate::optimizer::{AdamConfig, AdamUpdate};
use log::info;
use ndarray::Axis;
use ndarray_rand::rand::{Rng, seq::SliceRandom};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SgdConfig {
    pub step_size: f64,
    pub batch_size: usize,
    // Zero means no limit: only a callback can end the optimization.
    pub max_epochs: usize,
    pub shuffle: bool,
    // Whether the Adam moments are discarded at the start of every optimize() call.
    pub reset_policy: bool,
    pub adam: AdamConfig,
}

impl Default for SgdConfig {
    fn default() -> Self {
        SgdConfig {
            step_size: 5e-3,
            batch_size: 64,
            max_epochs: 0,
            shuffle: true,
            reset_policy: false,
            adam: AdamConfig::default(),
        }
    }
}

// Mini-batch stochastic gradient descent driving an AdamUpdate.
pub struct Sgd {
    config: SgdConfig,
    update: Option<AdamUpdate>,
}

impl Sgd {
    pub fn new(config: SgdConfig) -> Sgd {
        Sgd {
            config,
            update: None,
        }
    }

    // Using stochastic gradient descent, trains the network. The training samples are (optionally)
    // shuffled, then divided into batches of size batch_size. For each batch the gradient of the
    // mean loss is calculated through backpropagation and handed to the Adam update. After every
    // epoch the callbacks see the mean training loss (and the validation loss when a validation set
    // is given) and may stop the loop.
    pub fn optimize<R: Rng + ?Sized>(
        &mut self,
        network: &mut Network,
        training: &LabeledSet,
        validation: Option<&LabeledSet>,
        callbacks: &mut [&mut dyn Callback],
        rng: &mut R,
    ) {
        let SgdConfig {
            step_size,
            batch_size,
            max_epochs,
            shuffle,
            reset_policy,
            adam,
        } = self.config;

        if reset_policy {
            self.update = None;
        }
        let update = self
            .update
            .get_or_insert_with(|| AdamUpdate::new(adam, network.parameters()));

        let mut order = (0..training.len()).collect::<Vec<_>>();
        let mut objective = f64::INFINITY;
        let mut epoch = 0;

        while max_epochs == 0 || epoch < max_epochs {
            epoch += 1;
            if shuffle {
                order.shuffle(rng);
            }

            let mut total_loss = 0.0;
            for (batch_index, batch) in order.chunks(batch_size).enumerate() {
                let input = training.features.select(Axis(1), batch);
                let labels = training.labels.select(Axis(0), batch);

                let (loss, gradient) = network.backpropagate(&input, &labels, rng);
                update.update(network.parameters_mut(), step_size, &gradient);
                total_loss += loss * batch.len() as f64;

                for callback in callbacks.iter_mut() {
                    callback.end_batch(epoch, batch_index, loss);
                }
            }
            objective = total_loss / training.len() as f64;

            let summary = EpochSummary {
                epoch,
                training_loss: objective,
                validation_loss: validation
                    .filter(|set| !set.is_empty())
                    .map(|set| network.loss(&set.features, &set.labels)),
            };

            // Every callback sees the epoch, even when an earlier one already asked to stop.
            let mut halt = false;
            for callback in callbacks.iter_mut() {
                halt |= callback.end_epoch(&summary, network).is_break();
            }
            if halt {
                break;
            }
        }

        for callback in callbacks.iter_mut() {
            callback.end_optimization(network);
        }

        info!(
            "Optimization finished after {epoch} epochs ({} Adam steps so far), final training loss {objective:.6}",
            update.iteration()
        );
    }
}
