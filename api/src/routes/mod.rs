pub mod connections;
pub mod health;
pub mod messages;
pub mod tools;
