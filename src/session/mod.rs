//! Session lifecycle tracking

pub mod state;

pub use state::ConnectionState;
