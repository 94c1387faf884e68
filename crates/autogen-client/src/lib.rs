pub mod bundler;
pub mod error;
pub mod resources;
pub mod runner;
pub mod script;
pub mod targets;
