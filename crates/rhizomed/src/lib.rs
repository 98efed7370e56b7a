//! The bundle payload fetch engine, as a library so `tests/integration`
//! can drive the scheduler end-to-end against fakes instead of spawning
//! the daemon binary.

pub mod datagram;
pub mod glue;
pub mod http;
pub mod scheduler;
pub mod slot;
pub mod stream;
