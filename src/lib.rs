pub mod account;
pub mod agent;
pub mod annotation_file;
pub mod cache;
pub mod client;
pub mod concepts;
pub mod config;
pub mod dataset;
pub mod error;
pub mod node;
pub mod output;
pub mod profile;
pub mod property;
pub mod session;
pub mod templates;
pub mod timeseries;
pub mod transport;

mod wire;

pub use client::Pennsieve;
pub use error::PennsieveError;
