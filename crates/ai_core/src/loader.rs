//! Pluggable artifact decoders
//!
//! The model store owns file access, hashing and sibling inspection; a
//! loader only turns bytes into a [`Classifier`].

use crate::classifier::Classifier;
use crate::errors::LoadError;
use crate::gbdt::TreeEnsemble;
use std::path::Path;
use std::sync::Arc;

/// Decodes one artifact format.
pub trait ModelLoader: Send + Sync {
    /// Format label used in logs.
    fn format(&self) -> &'static str;

    /// Decode and validate artifact bytes read from `path`.
    fn decode(&self, path: &Path, bytes: &[u8]) -> Result<Arc<dyn Classifier>, LoadError>;
}

/// Loader for JSON [`TreeEnsemble`] artifacts.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeEnsembleLoader;

impl ModelLoader for TreeEnsembleLoader {
    fn format(&self) -> &'static str {
        "tree-ensemble-json"
    }

    fn decode(&self, path: &Path, bytes: &[u8]) -> Result<Arc<dyn Classifier>, LoadError> {
        let model = TreeEnsemble::from_slice(bytes)
            .map_err(|err| LoadError::corrupt(path, err.to_string()))?;
        Ok(Arc::new(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gbdt::{EnsembleKind, Node, Tree};

    #[test]
    fn decodes_valid_ensemble() {
        let model = TreeEnsemble::new(
            EnsembleKind::GradientBoosting,
            vec![Tree::new(vec![Node::leaf(0, 0.5)], 1.0)],
            0.0,
        );
        let bytes = model.to_canonical_json().unwrap();

        let classifier = TreeEnsembleLoader
            .decode(Path::new("model.json"), bytes.as_bytes())
            .unwrap();
        assert_eq!(classifier.model_type(), "gradient_boosting");
        assert_eq!(classifier.feature_count(), Some(11));
    }

    #[test]
    fn garbage_is_corrupt() {
        let err = TreeEnsembleLoader
            .decode(Path::new("model.json"), b"\x80\x04not json")
            .unwrap_err();
        assert!(matches!(err, LoadError::Corrupt { .. }));
    }
}
