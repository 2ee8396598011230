//! Hold-out evaluation report

use crate::errors::TrainerError;
use exovision_ai_core::{Classifier, FeatureVector, Label, FEATURE_COUNT};
use serde::Serialize;
use tracing::info;

/// Precision, recall and F1 for one class.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassReport {
    pub label: u8,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EvaluationReport {
    /// `confusion_matrix[actual][predicted]`
    pub confusion_matrix: [[usize; 2]; 2],
    pub classes: Vec<ClassReport>,
    pub accuracy: f64,
    pub samples: usize,
}

impl EvaluationReport {
    /// Tabulate predicted against actual 0/1 labels.
    pub fn from_labels(actual: &[u8], predicted: &[u8]) -> Self {
        let mut confusion = [[0usize; 2]; 2];
        for (&a, &p) in actual.iter().zip(predicted) {
            confusion[usize::from(a.min(1))][usize::from(p.min(1))] += 1;
        }

        let samples = confusion.iter().flatten().sum::<usize>();
        let correct = confusion[0][0] + confusion[1][1];
        let classes = (0..2)
            .map(|class| {
                let true_positive = confusion[class][class];
                let support = confusion[class][0] + confusion[class][1];
                let predicted = confusion[0][class] + confusion[1][class];
                let precision = ratio(true_positive, predicted);
                let recall = ratio(true_positive, support);
                let f1_score = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassReport {
                    label: class as u8,
                    precision,
                    recall,
                    f1_score,
                    support,
                }
            })
            .collect();

        Self {
            confusion_matrix: confusion,
            classes,
            accuracy: ratio(correct, samples),
            samples,
        }
    }

    /// Log the report the way a classification summary reads.
    pub fn log_summary(&self) {
        info!("              precision    recall  f1-score   support");
        for class in &self.classes {
            info!(
                "{:>12} {:>10.2} {:>9.2} {:>9.2} {:>9}",
                class.label, class.precision, class.recall, class.f1_score, class.support
            );
        }
        info!("    accuracy {:>30.2} {:>9}", self.accuracy, self.samples);
        info!(
            "Confusion matrix: [[{} {}] [{} {}]]",
            self.confusion_matrix[0][0],
            self.confusion_matrix[0][1],
            self.confusion_matrix[1][0],
            self.confusion_matrix[1][1]
        );
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Score `features` with `model` and compare against `labels`.
pub fn evaluate(
    model: &dyn Classifier,
    features: &[[f64; FEATURE_COUNT]],
    labels: &[u8],
) -> Result<EvaluationReport, TrainerError> {
    let batch: Vec<FeatureVector> = features.iter().map(|row| FeatureVector::new(*row)).collect();
    let predicted: Vec<u8> = model
        .predict_labels(&batch)?
        .into_iter()
        .map(Label::as_u8)
        .collect();
    Ok(EvaluationReport::from_labels(labels, &predicted))
}
