pub mod connections;
pub mod error;
pub mod tools;
