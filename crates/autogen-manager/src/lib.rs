pub mod command;
pub mod dependency;
pub mod ensemble;
pub mod error;
pub mod job;
pub mod manager;
pub mod plan;
pub mod program;
pub mod record;
pub mod recovery;
