//! Feature model, item index and query engine shared by every stage.

pub mod builder;
pub mod feature;
pub mod index;
pub mod message;
pub mod persist;
pub mod query;
pub mod status;

pub use builder::{build_from_path, build_from_reader, BuildError, BuildStats, BulkFormat};
pub use feature::{Context, FeatureList, FeatureMap, FeatureStringFormat, FieldId, ScopeId};
pub use index::HashIndex;
pub use status::{Status, StatusResult};
