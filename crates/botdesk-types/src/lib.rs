pub mod api;
pub mod authz;
pub mod models;
pub mod validation;
