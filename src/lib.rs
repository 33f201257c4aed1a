//! Herald - cluster-wide command channel
//!
//! Lets every instance of a horizontally scaled service react to commands
//! broadcast on a shared pub/sub channel: reload a license, restart an event
//! bus, install a package. Each instance role owns a dispatch table mapping
//! command kinds to actions.

pub mod bus;
pub mod config;
pub mod orchestration;
pub mod protocol;
pub mod utils;

#[cfg(test)]
mod test_utils;
