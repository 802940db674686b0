mod repository;
mod schema;

pub use repository::{QualityRow, Repository};
