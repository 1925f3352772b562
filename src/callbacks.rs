// Observers invoked by the training loop.
// Each observer is an independent strategy: one can halt the loop, another can remember the best
// parameters seen so far, another only reports progress. The optimizer knows nothing about them
// beyond the Callback trait.

use crate::network::{Network, Parameters};
use clap::ValueEnum;
use log::{debug, info, trace};
use std::ops::ControlFlow;

// Which loss an observer watches.
#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
pub enum Monitor {
    /// Mean loss over the mini-batches of the epoch, dropout included.
    Training,
    /// Loss over the held-out validation set, dropout disabled.
    Validation,
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct EpochSummary {
    pub epoch: usize,
    pub training_loss: f64,
    pub validation_loss: Option<f64>,
}

impl EpochSummary {
    // Falls back to the training loss when no validation loss was computed for this epoch.
    pub fn monitored(&self, monitor: Monitor) -> f64 {
        match monitor {
            Monitor::Training => self.training_loss,
            Monitor::Validation => self.validation_loss.unwrap_or(self.training_loss),
        }
    }
}

pub trait Callback {
    fn end_batch(&mut self, _epoch: usize, _batch: usize, _loss: f64) {}

    // Called after every epoch. Returning ControlFlow::Break stops the optimization.
    fn end_epoch(&mut self, _summary: &EpochSummary, _network: &Network) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn end_optimization(&mut self, _network: &mut Network) {}
}

// Stops the optimization once the monitored loss has not improved for `patience` epochs.
#[derive(Debug)]
pub struct EarlyStopAtMinLoss {
    monitor: Monitor,
    patience: usize,
    best_loss: f64,
    epochs_without_improvement: usize,
}

impl EarlyStopAtMinLoss {
    pub fn new(monitor: Monitor, patience: usize) -> EarlyStopAtMinLoss {
        EarlyStopAtMinLoss {
            monitor,
            patience,
            best_loss: f64::INFINITY,
            epochs_without_improvement: 0,
        }
    }
}

impl Callback for EarlyStopAtMinLoss {
    fn end_epoch(&mut self, summary: &EpochSummary, _network: &Network) -> ControlFlow<()> {
        let loss = summary.monitored(self.monitor);
        if loss < self.best_loss {
            self.best_loss = loss;
            self.epochs_without_improvement = 0;
            return ControlFlow::Continue(());
        }

        self.epochs_without_improvement += 1;
        trace!(
            "no improvement over {:.6} for {} epoch(s)",
            self.best_loss, self.epochs_without_improvement
        );
        if self.epochs_without_improvement >= self.patience {
            info!(
                "Stopping early at epoch {}: best {:?} loss was {:.6}",
                summary.epoch, self.monitor, self.best_loss
            );
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }
}

// Remembers the parameters at the lowest monitored loss and puts them back into the network when
// the optimization ends.
#[derive(Debug)]
pub struct StoreBestCoordinates {
    monitor: Monitor,
    best_loss: f64,
    best_parameters: Option<Parameters>,
}

impl StoreBestCoordinates {
    pub fn new(monitor: Monitor) -> StoreBestCoordinates {
        StoreBestCoordinates {
            monitor,
            best_loss: f64::INFINITY,
            best_parameters: None,
        }
    }

    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }
}

impl Callback for StoreBestCoordinates {
    fn end_epoch(&mut self, summary: &EpochSummary, network: &Network) -> ControlFlow<()> {
        let loss = summary.monitored(self.monitor);
        if loss < self.best_loss {
            trace!("storing parameters of epoch {} (loss {loss:.6})", summary.epoch);
            self.best_loss = loss;
            self.best_parameters = Some(network.parameters().clone());
        }
        ControlFlow::Continue(())
    }

    fn end_optimization(&mut self, network: &mut Network) {
        if let Some(parameters) = self.best_parameters.take() {
            debug!("restoring best parameters (loss {:.6})", self.best_loss);
            network.set_parameters(parameters);
        }
    }
}

// Reports progress: every mini-batch loss at debug level and every epoch summary at info level.
#[derive(Debug, Default)]
pub struct PrintLoss;

impl Callback for PrintLoss {
    fn end_batch(&mut self, epoch: usize, batch: usize, loss: f64) {
        debug!("epoch {epoch}, batch {batch}: loss {loss:.6}");
    }

    fn end_epoch(&mut self, summary: &EpochSummary, _network: &Network) -> ControlFlow<()> {
        match summary.validation_loss {
            Some(validation_loss) => info!(
                "Epoch {}: training loss {:.6}, validation loss {validation_loss:.6}",
                summary.epoch, summary.training_loss
            ),
            None => info!(
                "Epoch {}: training loss {:.6}",
                summary.epoch, summary.training_loss
            ),
        }
        ControlFlow::Continue(())
    }
}
