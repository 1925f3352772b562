use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use env_logger::Env;

use crate::{
    callbacks::Monitor,
    error::{Error, Result},
    trainer::SgdConfig,
};

/// Trains a feed-forward network on the Kaggle Digit Recognizer data set and writes predictions
/// for the test set in the competition's submission format.
#[derive(Parser, Debug)]
#[command(name = "digit-recognizer", version)]
pub struct Cli {
    /// level of logging details (into stderr), RUST_LOG takes precedence when set
    #[arg(short = 'v', long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// full path to the file containing the training set
    #[arg(short = 't', long, default_value = "../Kaggle/data/train.csv")]
    pub training_dataset: PathBuf,

    /// full path to the file containing the test set
    #[arg(short = 'l', long, default_value = "../Kaggle/data/test.csv")]
    pub testing_datatest: PathBuf,

    /// file name in which predictions will be saved
    #[arg(short = 'P', long, default_value = "../Kaggle/results.csv")]
    pub prediction_result: PathBuf,

    /// fraction of the training file held out for validation, must be in (0, 1)
    #[arg(short = 'r', long, default_value_t = 0.1)]
    pub ratio: f64,

    /// number of data points used in each iteration of the optimizer
    #[arg(short = 'b', long, default_value_t = 64)]
    pub batch_size: usize,

    /// step size of the optimizer
    #[arg(long, default_value_t = 5e-3)]
    pub step_size: f64,

    /// epochs without improvement of the monitored loss before training stops
    #[arg(long, default_value_t = 10)]
    pub patience: usize,

    /// upper bound on epochs per cycle, 0 lets early stopping decide alone
    #[arg(long, default_value_t = 0)]
    pub max_epochs: usize,

    /// number of training cycles, each one starting from the previous cycle's parameters
    #[arg(long, default_value_t = 1)]
    pub cycles: usize,

    /// reset the optimizer's moment estimates at the start of every cycle
    #[arg(long)]
    pub reset_optimizer: bool,

    /// loss watched by early stopping and by the best-parameter snapshot
    #[arg(long, value_enum, default_value_t = Monitor::Training)]
    pub monitor: Monitor,

    /// seed for splitting, initialization, shuffling and dropout, random when omitted
    #[arg(long)]
    pub seed: Option<u64>,

    /// write digits 0-9 instead of the 1-indexed classes the network predicts
    #[arg(long)]
    pub digit_labels: bool,

    /// predict on unscaled 0-255 test pixels instead of normalizing them like the training set
    #[arg(long)]
    pub raw_test_pixels: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    Off,
}

// Log target of the message printed before a fatal exit. It stays enabled at every level, `off`
// included.
pub const FATAL_TARGET: &str = "digit_recognizer::fatal";

impl LogLevel {
    fn filter(self) -> &'static str {
        match self {
            LogLevel::Error => "off,digit_recognizer=error",
            LogLevel::Warn => "off,digit_recognizer=warn",
            LogLevel::Info => "off,digit_recognizer=info",
            LogLevel::Debug => "off,digit_recognizer=debug",
            LogLevel::Trace => "off,digit_recognizer=trace",
            LogLevel::Off => "off,digit_recognizer::fatal=error",
        }
    }
}

// Everything a run needs, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub training_dataset: PathBuf,
    pub testing_dataset: PathBuf,
    pub prediction_result: PathBuf,
    pub ratio: f64,
    pub sgd: SgdConfig,
    pub patience: usize,
    pub cycles: usize,
    pub monitor: Monitor,
    pub seed: Option<u64>,
    pub digit_labels: bool,
    pub raw_test_pixels: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            training_dataset: PathBuf::from("../Kaggle/data/train.csv"),
            testing_dataset: PathBuf::from("../Kaggle/data/test.csv"),
            prediction_result: PathBuf::from("../Kaggle/results.csv"),
            ratio: 0.1,
            sgd: SgdConfig::default(),
            patience: 10,
            cycles: 1,
            monitor: Monitor::Training,
            seed: None,
            digit_labels: false,
            raw_test_pixels: false,
        }
    }
}

impl Cli {
    // Checks the parsed values and turns them into a Config.
    pub fn into_config(self) -> Result<Config> {
        if !(self.ratio > 0.0 && self.ratio < 1.0) {
            return Err(Error::Config(format!(
                "ratio must be between 0 and 1 (exclusive), got {}",
                self.ratio
            )));
        }
        if self.batch_size < 1 {
            return Err(Error::Config(String::from("batch size must be at least 1")));
        }
        if !(self.step_size.is_finite() && self.step_size > 0.0) {
            return Err(Error::Config(format!(
                "step size must be a positive number, got {}",
                self.step_size
            )));
        }
        if self.cycles < 1 {
            return Err(Error::Config(String::from("at least one training cycle is needed")));
        }

        Ok(Config {
            training_dataset: self.training_dataset,
            testing_dataset: self.testing_datatest,
            prediction_result: self.prediction_result,
            ratio: self.ratio,
            sgd: SgdConfig {
                step_size: self.step_size,
                batch_size: self.batch_size,
                max_epochs: self.max_epochs,
                reset_policy: self.reset_optimizer,
                ..SgdConfig::default()
            },
            patience: self.patience,
            cycles: self.cycles,
            monitor: self.monitor,
            seed: self.seed,
            digit_labels: self.digit_labels,
            raw_test_pixels: self.raw_test_pixels,
        })
    }
}

// Parses the command line, sets up logging and validates the configuration.
pub fn init() -> Result<Config> {
    let cli = Cli::parse();
    env_logger::init_from_env(Env::default().default_filter_or(cli.log_level.filter()));
    cli.into_config()
}
