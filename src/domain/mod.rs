pub mod catalog;
pub mod error;
pub mod models;
pub mod settings;
