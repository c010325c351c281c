//! Store management: the registry of open stores and the periodic driver
//! that sweeps them.
//!
//! The sweeper is the only place parked retries run and the only place
//! entries expire; client threads never do either. One process typically
//! runs one registry and one sweeper over any number of stores.

pub mod registry;
pub mod sweeper;

pub use registry::StoreRegistry;
pub use sweeper::{start_sweeper, Sweeper};
