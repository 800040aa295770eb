//! Tag-addressed backend connections with watch-driven configuration
//! propagation.
//!
//! - [`TaggedRegistry`] keeps one live handle per tag for each backend family
//!   and replaces them when a tag is re-added.
//! - [`WatchSupervisor`] observes paths on a coordination service and pushes
//!   changed bytes onto a bounded [`propagation_channel`].
//! - [`live::apply_connection_updates`] feeds propagated connection records
//!   back into a registry.
//!
//! Drivers are opt-in: `mongo`, `redis` and `zookeeper` features.

mod backend;
pub mod config;
mod coordination;
mod errors;
pub mod live;
pub(crate) mod utils;

pub use backend::*;
pub use self::config::*;
pub use coordination::*;
pub use errors::*;
pub(crate) use utils::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
