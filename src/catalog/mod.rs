//! Model catalog: pipeline families, model descriptors and on-disk discovery.

pub mod family;
pub mod model;

pub use family::{FeatureKind, PipelineFamily};
pub use model::{default_models, ModelCatalog, ModelDescriptor};
