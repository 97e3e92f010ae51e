pub mod adapters;
pub mod balance;
pub mod config;
pub mod domain;
pub mod encryption;
pub mod errors;
pub mod events;
pub mod orchestrator;
pub mod ports;
pub mod reconciliation;
pub mod registry;
pub mod requirements;
