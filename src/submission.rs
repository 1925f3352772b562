use crate::dataset::LABEL_SHIFT;
use crate::error::{Error, Result};
use csv::Writer;
use ndarray::Array1;
use std::{fs, path::Path};

pub const HEADER: [&str; 2] = ["ImageId", "Label"];

// Write predictions in the Kaggle submission layout: a header, then one "ImageId,Label" row per
// test sample where ImageId counts from 1.
//
// Predicted classes are 1-indexed. They are written unchanged unless digit_labels is set, in which
// case the shift applied to the training labels is undone and the file holds digits 0-9.
pub fn write_predictions(path: &Path, labels: &Array1<usize>, digit_labels: bool) -> Result<()> {
    let csv_error = |source: csv::Error| Error::Csv {
        path: path.to_path_buf(),
        source,
    };
    let io_error = |source: std::io::Error| Error::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error)?;
    }

    let mut writer = Writer::from_path(path).map_err(csv_error)?;
    writer.write_record(HEADER).map_err(csv_error)?;

    for (index, &label) in labels.iter().enumerate() {
        let label = if digit_labels {
            label - LABEL_SHIFT
        } else {
            label
        };
        writer
            .write_record([(index + 1).to_string(), label.to_string()])
            .map_err(csv_error)?;
    }

    writer.flush().map_err(io_error)
}
