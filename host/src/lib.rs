pub mod accounts;
pub mod alerter;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod host;
pub mod mdm;
pub mod merkle;
pub mod obligation;
pub mod pricetable;
pub mod registry;

pub use error::HostError;
pub use host::Host;
