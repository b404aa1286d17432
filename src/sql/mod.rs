//! SQL for the company tables: identifiers come from the schema definition, values are always parameters.

mod builder;
pub mod params;
pub use builder::*;
pub use params::*;
