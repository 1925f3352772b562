use crate::callbacks::{EarlyStopAtMinLoss, Monitor, PrintLoss, StoreBestCoordinates};
use crate::cli::Config;
use crate::dataset::{self, LabeledSet};
use crate::error::{Error, Result};
use crate::metrics::{accuracy, predicted_labels};
use crate::network::{INPUT_NEURONS, Network};
use crate::submission::write_predictions;
use crate::trainer::Sgd;
use log::{info, warn};
use ndarray::Array1;
use ndarray_rand::rand::{self, Rng, SeedableRng, rngs::StdRng};

// What a run produced besides the submission file.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub seed: u64,
    pub training_samples: usize,
    pub validation_samples: usize,
    pub train_accuracy: f64,
    pub validation_accuracy: f64,
    pub predictions: Array1<usize>,
}

// Load, split, train, evaluate, predict and save, in that order.
pub fn run(config: &Config) -> Result<Report> {
    let seed = config.seed.unwrap_or_else(rand::random);
    info!("Using random seed {seed}");
    let mut rng = StdRng::seed_from_u64(seed);

    info!("Reading dataset from {:?}", config.training_dataset);
    let table = dataset::load_table(&config.training_dataset)?;
    let (training, validation) = dataset::split(&table, config.ratio, &mut rng);
    let training = LabeledSet::from_table(&training)?;
    let validation = LabeledSet::from_table(&validation)?;
    info!(
        "Split {} samples into {} for training and {} for validation",
        table.ncols(),
        training.len(),
        validation.len()
    );

    if training.is_empty() {
        return Err(Error::Shape(String::from(
            "the training partition is empty, lower the ratio or provide more samples",
        )));
    }
    if validation.is_empty() {
        warn!("The validation partition is empty, its accuracy will be reported as 0");
    }

    if training.features.nrows() != INPUT_NEURONS {
        warn!(
            "Expected {INPUT_NEURONS} pixel columns, found {}; the input layer follows the file",
            training.features.nrows()
        );
    }
    let mut network = Network::new(training.features.nrows(), &mut rng);
    info!("Training ...");
    train(&mut network, &training, &validation, config, &mut rng);

    let train_accuracy = evaluate(&network, &training);
    let validation_accuracy = evaluate(&network, &validation);
    info!("Accuracy: train = {train_accuracy:.2}%, valid = {validation_accuracy:.2}%");

    info!("Predicting ...");
    let predictions = predict(&network, config)?;

    info!("Saving predicted labels to {:?} ...", config.prediction_result);
    write_predictions(&config.prediction_result, &predictions, config.digit_labels)?;
    info!("Finished");

    Ok(Report {
        seed,
        training_samples: training.len(),
        validation_samples: validation.len(),
        train_accuracy,
        validation_accuracy,
        predictions,
    })
}

// Each cycle continues from the parameters the previous one restored. Observers are fresh per
// cycle, while the optimizer (and, unless reset, its moments) carries over.
fn train<R: Rng + ?Sized>(
    network: &mut Network,
    training: &LabeledSet,
    validation: &LabeledSet,
    config: &Config,
    rng: &mut R,
) {
    let mut sgd = Sgd::new(config.sgd);
    let validation = (config.monitor == Monitor::Validation).then_some(validation);

    for cycle in 1..=config.cycles {
        if config.cycles > 1 {
            info!("Training cycle {cycle} of {}", config.cycles);
        }

        let mut print_loss = PrintLoss;
        let mut early_stop = EarlyStopAtMinLoss::new(config.monitor, config.patience);
        let mut best_coordinates = StoreBestCoordinates::new(config.monitor);

        sgd.optimize(
            network,
            training,
            validation,
            &mut [&mut print_loss, &mut early_stop, &mut best_coordinates],
            rng,
        );
        info!(
            "Best {:?} loss of cycle {cycle}: {:.6}",
            config.monitor,
            best_coordinates.best_loss()
        );
    }
}

fn evaluate(network: &Network, set: &LabeledSet) -> f64 {
    let predicted = predicted_labels(&network.predict(&set.features));
    accuracy(&predicted, &set.labels)
}

fn predict(network: &Network, config: &Config) -> Result<Array1<usize>> {
    let table = dataset::load_table(&config.testing_dataset)?;
    if table.nrows() != network.input_neurons() {
        return Err(Error::Shape(format!(
            "{:?} has {} pixel columns, the network was trained on {}",
            config.testing_dataset,
            table.nrows(),
            network.input_neurons()
        )));
    }

    if config.raw_test_pixels {
        warn!("Predicting on raw test pixels, the network was trained on inputs scaled to [0, 1]");
    }
    let features = dataset::unlabeled(table, config.raw_test_pixels);
    Ok(predicted_labels(&network.predict(&features)))
}
