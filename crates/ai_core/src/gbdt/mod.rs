//! Tree-ensemble inference
//!
//! # Model Format
//!
//! Artifacts are canonical JSON documents:
//!
//! ```json
//! {
//!   "base_score": -0.2,
//!   "contract_version": 1,
//!   "feature_names": ["koi_period", "koi_depth", "..."],
//!   "format_version": 1,
//!   "kind": "gradient_boosting",
//!   "metadata": {},
//!   "trees": [
//!     {
//!       "nodes": [
//!         {"id":0,"left":1,"right":2,"feature_idx":4,"threshold":7.1,"leaf":null},
//!         {"id":1,"left":-1,"right":-1,"feature_idx":-1,"threshold":0.0,"leaf":-1.2},
//!         {"id":2,"left":-1,"right":-1,"feature_idx":-1,"threshold":0.0,"leaf":0.8}
//!       ],
//!       "weight": 1.0
//!     }
//!   ]
//! }
//! ```
//!
//! Traversal goes left when `feature <= threshold`.

pub mod model;
pub mod tree;

pub use model::{EnsembleKind, ModelError, TreeEnsemble, FORMAT_VERSION};
pub use tree::{Node, Tree};
