//! CrudService: company CRUD and order workflows over the SQL builder.

mod crud;
mod validation;
pub use crud::CrudService;
pub use validation::{parse_decimal, RequestValidator};
