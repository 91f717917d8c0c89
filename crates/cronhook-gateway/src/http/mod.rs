pub mod error;
pub mod health;
pub mod results;
pub mod tasks;
