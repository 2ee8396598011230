//! CSV dataset loading and preprocessing
//!
//! Reads the NASA cumulative KOI export (or any CSV carrying the contract
//! columns), derives binary labels, imputes gaps and provides a
//! deterministic stratified split.

use crate::deterministic::LcgRng;
use crate::errors::TrainerError;
use exovision_ai_core::features::{column_index, FeatureRecord, FEATURE_COLUMNS, FEATURE_COUNT};
use exovision_ai_core::tabular::parse_measurement;
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// Column holding the archive disposition.
pub const DISPOSITION_COLUMN: &str = "koi_disposition";

/// Disposition counted as the positive class.
pub const POSITIVE_DISPOSITION: &str = "CONFIRMED";

/// Where the binary target comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelSource {
    /// `1` when `koi_disposition == "CONFIRMED"`, else `0`
    Disposition,
    /// An explicit 0/1 column
    Column(String),
}

impl LabelSource {
    fn column(&self) -> &str {
        match self {
            LabelSource::Disposition => DISPOSITION_COLUMN,
            LabelSource::Column(name) => name,
        }
    }

    fn parse(&self, cell: &str, row: usize) -> Result<u8, TrainerError> {
        match self {
            LabelSource::Disposition => Ok(u8::from(cell == POSITIVE_DISPOSITION)),
            LabelSource::Column(name) => match cell {
                "0" | "0.0" => Ok(0),
                "1" | "1.0" => Ok(1),
                other => Err(TrainerError::Dataset(format!(
                    "row {row}: label column `{name}` holds `{other}`, expected 0 or 1"
                ))),
            },
        }
    }
}

/// Gap-filling strategy applied before fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Imputation {
    /// Per-column median of the observed values
    Median,
    /// `0.0`, the same fill the serving path uses
    Zero,
}

/// Labelled training rows.
#[derive(Clone, Debug, Default)]
pub struct Dataset {
    pub records: Vec<FeatureRecord>,
    pub labels: Vec<u8>,
    /// Rows skipped because every feature was missing
    pub dropped_rows: usize,
}

/// Dense, gap-free feature matrix.
#[derive(Clone, Debug)]
pub struct Imputed {
    pub features: Vec<[f64; FEATURE_COUNT]>,
    /// Value substituted per column
    pub fill: [f64; FEATURE_COUNT],
}

/// Per-column summary used for logging.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureStats {
    pub name: &'static str,
    pub present: usize,
    pub missing: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Dataset {
    /// Load dataset from a CSV file.
    pub fn from_csv<P: AsRef<Path>>(path: P, label: &LabelSource) -> Result<Self, TrainerError> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(file, label)
    }

    /// Load dataset from any CSV source. Lines starting with `#` are skipped.
    pub fn from_reader<R: Read>(reader: R, label: &LabelSource) -> Result<Self, TrainerError> {
        let mut reader = csv::ReaderBuilder::new()
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let label_position = headers
            .iter()
            .position(|h| h == label.column())
            .ok_or_else(|| {
                TrainerError::Dataset(format!("label column `{}` not found", label.column()))
            })?;
        let feature_positions: Vec<(usize, usize)> = headers
            .iter()
            .enumerate()
            .filter_map(|(position, name)| column_index(name).map(|index| (position, index)))
            .collect();

        if feature_positions.is_empty() {
            return Err(TrainerError::Dataset(format!(
                "none of the feature columns [{}] are present",
                FEATURE_COLUMNS.join(", ")
            )));
        }

        let mut dataset = Dataset::default();
        for (index, row) in reader.records().enumerate() {
            let row = row?;
            let row_number = index + 1;

            let mut record = FeatureRecord::default();
            for &(position, feature) in &feature_positions {
                let cell = row.get(position).unwrap_or_default();
                let value = parse_measurement(cell).ok_or_else(|| {
                    TrainerError::Dataset(format!(
                        "row {row_number}: `{}` is not a number in column `{}`",
                        cell, FEATURE_COLUMNS[feature]
                    ))
                })?;
                if let Some(slot) = record.slot_mut(feature) {
                    *slot = value;
                }
            }

            if record.present_count() == 0 {
                dataset.dropped_rows += 1;
                continue;
            }

            let target = label.parse(row.get(label_position).unwrap_or_default(), row_number)?;
            dataset.records.push(record);
            dataset.labels.push(target);
        }

        if dataset.is_empty() {
            return Err(TrainerError::Dataset("Dataset is empty".into()));
        }

        let (negative, positive) = dataset.label_counts();
        info!(
            rows = dataset.len(),
            dropped = dataset.dropped_rows,
            positive,
            negative,
            "Loaded labelled rows"
        );
        Ok(dataset)
    }

    /// Get number of samples
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if dataset is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `(class 0, class 1)` row counts.
    pub fn label_counts(&self) -> (usize, usize) {
        let positive = self.labels.iter().filter(|&&l| l == 1).count();
        (self.labels.len() - positive, positive)
    }

    /// Presence and range per contract column.
    pub fn feature_stats(&self) -> Vec<FeatureStats> {
        FEATURE_COLUMNS
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let observed: Vec<f64> =
                    self.records.iter().filter_map(|r| r.values()[i]).collect();
                FeatureStats {
                    name: *name,
                    present: observed.len(),
                    missing: self.len() - observed.len(),
                    min: observed.iter().copied().reduce(f64::min),
                    max: observed.iter().copied().reduce(f64::max),
                }
            })
            .collect()
    }

    /// Per-column median of observed values; `0.0` for an all-missing column.
    pub fn medians(&self) -> [f64; FEATURE_COUNT] {
        let mut medians = [0.0; FEATURE_COUNT];
        for (i, slot) in medians.iter_mut().enumerate() {
            let mut observed: Vec<f64> =
                self.records.iter().filter_map(|r| r.values()[i]).collect();
            if observed.is_empty() {
                continue;
            }
            observed.sort_by(f64::total_cmp);
            let mid = observed.len() / 2;
            *slot = if observed.len() % 2 == 0 {
                (observed[mid - 1] + observed[mid]) / 2.0
            } else {
                observed[mid]
            };
        }
        medians
    }

    /// Fill gaps with the chosen strategy.
    pub fn impute(&self, strategy: Imputation) -> Imputed {
        let fill = match strategy {
            Imputation::Median => self.medians(),
            Imputation::Zero => [0.0; FEATURE_COUNT],
        };
        debug!(?strategy, ?fill, "Imputing missing values");

        let features = self
            .records
            .iter()
            .map(|record| {
                let mut row = [0.0; FEATURE_COUNT];
                for (i, value) in record.values().into_iter().enumerate() {
                    row[i] = value.unwrap_or(fill[i]);
                }
                row
            })
            .collect();

        Imputed { features, fill }
    }

    /// Stratified train/test split over row indices.
    ///
    /// Each class is shuffled separately and `round(n * test_fraction)` of
    /// its rows go to the test side. Both sides come back sorted.
    pub fn stratified_split(&self, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
        let mut rng = LcgRng::new(seed);
        let mut train = Vec::new();
        let mut test = Vec::new();

        for class in [0u8, 1u8] {
            let mut members: Vec<usize> = self
                .labels
                .iter()
                .enumerate()
                .filter(|&(_, &l)| l == class)
                .map(|(i, _)| i)
                .collect();
            rng.shuffle(&mut members);

            let n_test = ((members.len() as f64) * test_fraction).round() as usize;
            let n_test = n_test.min(members.len());
            test.extend_from_slice(&members[..n_test]);
            train.extend_from_slice(&members[n_test..]);
        }

        train.sort_unstable();
        test.sort_unstable();
        (train, test)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# NASA Exoplanet Archive excerpt
kepid,koi_disposition,koi_period,koi_depth,koi_steff,koi_score
1,CONFIRMED,9.5,615.8,5455,1.0
2,FALSE POSITIVE,1.7,10.2,,0.0
3,CANDIDATE,,,,0.5
4,FALSE POSITIVE,,,,0.1
5,CONFIRMED,20.0,400.0,6000,0.9
";

    fn sample() -> Dataset {
        Dataset::from_reader(SAMPLE.as_bytes(), &LabelSource::Disposition).unwrap()
    }

    #[test]
    fn test_load_csv() {
        let dataset = sample();

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.dropped_rows, 2);
        assert_eq!(dataset.labels, vec![1, 0, 1]);
        assert_eq!(dataset.records[1].koi_steff, None);
        assert_eq!(dataset.label_counts(), (1, 2));
    }

    #[test]
    fn test_explicit_label_column() {
        let text = "koi_period,is_planet\n1.0,1\n2.0,0\n";
        let label = LabelSource::Column("is_planet".into());
        let dataset = Dataset::from_reader(text.as_bytes(), &label).unwrap();
        assert_eq!(dataset.labels, vec![1, 0]);

        let bad = "koi_period,is_planet\n1.0,yes\n";
        assert!(Dataset::from_reader(bad.as_bytes(), &label).is_err());
    }

    #[test]
    fn test_missing_label_column() {
        let err = Dataset::from_reader("koi_period\n1.0\n".as_bytes(), &LabelSource::Disposition)
            .unwrap_err();
        assert!(err.to_string().contains("koi_disposition"));
    }

    #[test]
    fn test_median_imputation() {
        let dataset = sample();
        let medians = dataset.medians();
        assert_eq!(medians[0], 9.5);
        assert_eq!(medians[5], (5455.0 + 6000.0) / 2.0);
        assert_eq!(medians[10], 0.0);

        let imputed = dataset.impute(Imputation::Median);
        assert_eq!(imputed.features[1][5], medians[5]);

        let zeroed = dataset.impute(Imputation::Zero);
        assert_eq!(zeroed.features[1][5], 0.0);
    }

    #[test]
    fn test_feature_stats() {
        let stats = sample().feature_stats();
        assert_eq!(stats.len(), FEATURE_COUNT);
        assert_eq!(stats[0].present, 3);
        assert_eq!(stats[0].min, Some(1.7));
        assert_eq!(stats[0].max, Some(20.0));
        assert_eq!(stats[10].missing, 3);
        assert_eq!(stats[10].min, None);
    }

    #[test]
    fn test_stratified_split() {
        let dataset = Dataset {
            records: vec![FeatureRecord::default(); 100],
            labels: (0..100).map(|i| u8::from(i % 4 == 0)).collect(),
            dropped_rows: 0,
        };

        let (train, test) = dataset.stratified_split(0.2, 42);
        assert_eq!(train.len() + test.len(), 100);
        assert_eq!(test.len(), 20);
        assert_eq!(test.iter().filter(|&&i| dataset.labels[i] == 1).count(), 5);

        assert_eq!(dataset.stratified_split(0.2, 42), (train, test));
    }
}
