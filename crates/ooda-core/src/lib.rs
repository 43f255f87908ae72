pub mod action;
pub mod alert;
pub mod anomaly;
pub mod config;
pub mod cycle;
pub mod error;
pub mod io;
pub mod observe;
pub mod paths;
pub mod policy;
pub mod runner;
pub mod store;
pub mod strategy;
pub mod types;

pub use error::{OodaError, Result};
