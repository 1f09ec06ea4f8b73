pub mod derive;
pub mod store;
pub mod types;

pub use derive::{infer_columns, InferenceOptions};
pub use store::{read_schema, write_schema};
pub use types::{Column, ColumnSchema, ScalarType};
