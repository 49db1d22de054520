//! SplitSocket - transport connection lifecycle
//!
//! The shared base every concrete connection (TCP, named pipe, ...) builds on:
//! a stable identity, close signaling, a completion gate and a LIFO chain of
//! shutdown hooks drained exactly once during teardown.

pub mod completion;
pub mod error;
pub mod id;
pub mod lifecycle;
pub mod transport;

pub use completion::*;
pub use error::*;
pub use id::*;
pub use lifecycle::*;
pub use transport::*;
