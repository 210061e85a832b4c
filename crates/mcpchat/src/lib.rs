pub mod agent;
pub mod client;
pub mod config;
pub mod errors;
pub mod models;
pub mod prompt;
pub mod providers;
pub mod tools;
