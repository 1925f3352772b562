use crate::error::{Error, Result};
use csv::ReaderBuilder;
use flate2::read::GzDecoder;
use ndarray::{Array1, Array2, ArrayView2, Axis, s};
use ndarray_rand::rand::{Rng, seq::SliceRandom};
use std::{fs::File, io::Read, path::Path};

// Pixel intensities in the Kaggle files are 8-bit grey levels.
pub const PIXEL_MAX: f64 = 255.0;

// Raw labels are digits 0-9. The classification loss works with 1-indexed classes, so every label
// is shifted up by this amount when a training table is turned into a labeled set.
pub const LABEL_SHIFT: usize = 1;

// A set of normalized samples and their 1-indexed class labels. Just like the tables it is built
// from, samples are stored as columns, so features has the shape [784 x n] for MNIST.
#[derive(Debug, Clone)]
pub struct LabeledSet {
    pub features: Array2<f64>,
    pub labels: Array1<usize>,
}

impl LabeledSet {
    // Turn a training table (row 0 holding the raw digit, remaining rows holding pixels) into
    // normalized features and shifted labels.
    pub fn from_table(table: &Array2<f64>) -> Result<LabeledSet> {
        if table.nrows() < 2 {
            return Err(Error::Shape(format!(
                "a labeled table needs a label row and at least one feature row, got {} rows",
                table.nrows()
            )));
        }

        let labels = table
            .row(0)
            .iter()
            .enumerate()
            .map(|(sample, &value)| {
                if value.fract() == 0.0 && (0.0..=9.0).contains(&value) {
                    Ok(value as usize + LABEL_SHIFT)
                } else {
                    Err(Error::Label { sample, value })
                }
            })
            .collect::<Result<Array1<usize>>>()?;

        Ok(LabeledSet {
            features: normalize(table.slice(s![1.., ..])),
            labels,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

// Read a CSV file into a [columns x samples] table. The header record is discarded, and every
// remaining cell must be numeric. Files ending in .gz are decompressed on the fly.
pub fn load_table(path: &Path) -> Result<Array2<f64>> {
    let file = File::open(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|extension| extension == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    // The reader is not flexible, so a record with a different number of fields than the header
    // is reported as a CSV error instead of silently producing a ragged table.
    let mut csv_reader = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let mut values = Vec::new();
    let mut columns = 0;
    let mut samples = 0;

    for (index, record) in csv_reader.records().enumerate() {
        let record = record.map_err(|source| Error::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        columns = record.len();

        for (column, cell) in record.iter().enumerate() {
            let value = cell.trim().parse::<f64>().map_err(|_| Error::Malformed {
                path: path.to_path_buf(),
                record: index + 1,
                message: format!("column {} holds {cell:?}, which is not a number", column + 1),
            })?;
            values.push(value);
        }
        samples += 1;
    }

    if samples == 0 {
        return Err(Error::Malformed {
            path: path.to_path_buf(),
            record: 0,
            message: String::from("the file holds no data records"),
        });
    }

    // Records were read sample by sample, so the flat buffer is [samples x columns]. Reversing the
    // axes gives the column-per-sample layout used everywhere else without copying.
    let table = Array2::from_shape_vec((samples, columns), values)
        .map_err(|error| Error::Shape(error.to_string()))?;
    Ok(table.reversed_axes())
}

// Randomly divide the samples (columns) of a table into a training part and a validation part. The
// validation part receives floor(ratio * samples) columns and the training part everything else.
pub fn split<R: Rng + ?Sized>(
    table: &Array2<f64>,
    ratio: f64,
    rng: &mut R,
) -> (Array2<f64>, Array2<f64>) {
    debug_assert!((0.0..1.0).contains(&ratio));

    let samples = table.ncols();
    let validation_size = (ratio * samples as f64).floor() as usize;

    let mut order = (0..samples).collect::<Vec<_>>();
    order.shuffle(rng);
    let (training, validation) = order.split_at(samples - validation_size);

    (
        table.select(Axis(1), training),
        table.select(Axis(1), validation),
    )
}

// Scale pixel intensities into [0, 1]. Values outside the 8-bit range are not clamped.
pub fn normalize(features: ArrayView2<f64>) -> Array2<f64> {
    features.mapv(|value| value / PIXEL_MAX)
}

// The test file has no label column, so the whole table is features. Raw pixels are passed through
// unscaled, the way the test set was fed to the network before normalization was applied to it.
pub fn unlabeled(table: Array2<f64>, raw_pixels: bool) -> Array2<f64> {
    if raw_pixels {
        table
    } else {
        normalize(table.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compression, write::GzEncoder};
    use ndarray::array;
    use ndarray_rand::rand::{SeedableRng, rngs::StdRng};
    use std::{collections::HashSet, io::Write};
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn load_table_drops_header_and_transposes() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "train.csv", "label,p0,p1\n3,0,255\n7,128,64\n");

        let table = load_table(&path).unwrap();

        assert_eq!(table.dim(), (3, 2));
        assert_eq!(table, array![[3.0, 7.0], [0.0, 128.0], [255.0, 64.0]]);
    }

    #[test]
    fn load_table_reads_gzip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.csv.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(b"p0,p1\n1,2\n3,4\n5,6\n").unwrap();
        encoder.finish().unwrap();

        let table = load_table(&path).unwrap();

        assert_eq!(table, array![[1.0, 3.0, 5.0], [2.0, 4.0, 6.0]]);
    }

    #[test]
    fn load_table_reports_missing_file() {
        let dir = TempDir::new().unwrap();
        let error = load_table(&dir.path().join("nope.csv")).unwrap_err();
        assert!(matches!(error, Error::Io { .. }));
    }

    #[test]
    fn load_table_rejects_non_numeric_cells() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "bad.csv", "label,p0\n1,2\n3,abc\n");

        match load_table(&path).unwrap_err() {
            Error::Malformed { record, .. } => assert_eq!(record, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn load_table_rejects_ragged_records() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "ragged.csv", "label,p0,p1\n1,2,3\n4,5\n");
        assert!(matches!(load_table(&path).unwrap_err(), Error::Csv { .. }));
    }

    #[test]
    fn load_table_rejects_header_only_file() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "empty.csv", "label,p0\n");
        assert!(matches!(load_table(&path).unwrap_err(), Error::Malformed { .. }));
    }

    #[test]
    fn split_sizes_add_up_and_partitions_are_disjoint() {
        let table = Array2::from_shape_fn((2, 99), |(row, column)| (row * 1000 + column) as f64);
        let mut rng = StdRng::seed_from_u64(7);

        for ratio in [0.05, 0.1, 0.2, 0.5, 0.9] {
            let (training, validation) = split(&table, ratio, &mut rng);
            assert_eq!(training.ncols() + validation.ncols(), 99);
            assert_eq!(validation.ncols(), (ratio * 99.0).floor() as usize);

            let ids = training
                .row(1)
                .iter()
                .chain(validation.row(1).iter())
                .map(|&id| id as usize)
                .collect::<HashSet<_>>();
            assert_eq!(ids.len(), 99);
        }
    }

    #[test]
    fn split_keeps_columns_intact() {
        let table = Array2::from_shape_fn((3, 20), |(row, column)| (column * 10 + row) as f64);
        let (training, validation) = split(&table, 0.25, &mut StdRng::seed_from_u64(1));

        for column in training.columns().into_iter().chain(validation.columns()) {
            assert_eq!(column[1], column[0] + 1.0);
            assert_eq!(column[2], column[0] + 2.0);
        }
    }

    #[test]
    fn split_is_deterministic_for_a_seed() {
        let table = Array2::from_shape_fn((1, 50), |(_, column)| column as f64);
        let first = split(&table, 0.1, &mut StdRng::seed_from_u64(42));
        let second = split(&table, 0.1, &mut StdRng::seed_from_u64(42));
        assert_eq!(first, second);
    }

    #[test]
    fn normalize_maps_pixel_range_into_unit_interval() {
        let features = Array2::from_shape_fn((1, 256), |(_, value)| value as f64);
        let normalized = normalize(features.view());

        for (value, scaled) in features.iter().zip(normalized.iter()) {
            assert_eq!(*scaled, value / 255.0);
            assert!((0.0..=1.0).contains(scaled));
        }
    }

    #[test]
    fn normalize_does_not_clamp() {
        let normalized = normalize(array![[510.0, -255.0]].view());
        assert_eq!(normalized, array![[2.0, -1.0]]);
    }

    #[test]
    fn unlabeled_features_are_normalized_unless_raw() {
        let table = array![[255.0, 51.0], [0.0, 102.0]];

        assert_eq!(unlabeled(table.clone(), false), array![[1.0, 0.2], [0.0, 0.4]]);
        assert_eq!(unlabeled(table.clone(), true), table);
    }

    #[test]
    fn labels_are_shifted_by_one() {
        let table =
            Array2::from_shape_fn((2, 10), |(row, column)| if row == 0 { column as f64 } else { 255.0 });
        let set = LabeledSet::from_table(&table).unwrap();

        assert_eq!(set.labels, Array1::from_iter(1..=10_usize));
        assert_eq!(set.features, Array2::<f64>::ones((1, 10)));
        for (raw, shifted) in table.row(0).iter().zip(set.labels.iter()) {
            assert_eq!(shifted - LABEL_SHIFT, *raw as usize);
        }
    }

    #[test]
    fn labels_outside_digit_range_are_rejected() {
        for bad in [10.0, -1.0, 2.5] {
            let table = array![[1.0, bad], [0.0, 0.0]];
            match LabeledSet::from_table(&table).unwrap_err() {
                Error::Label { sample, .. } => assert_eq!(sample, 1),
                other => panic!("unexpected error: {other}"),
            }
        }
    }
}
