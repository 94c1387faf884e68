pub mod config;
pub mod constants;
pub mod engine;
pub mod environment;
pub mod errors;
pub mod logging;
pub mod model;
pub mod reconcile;
