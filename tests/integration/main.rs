//! End-to-end scenarios against the scheduler, driven through fakes
//! instead of a spawned daemon binary — the REST/CLI/database surface the
//! reference implementation exposes is out of scope here, so the
//! scheduler's own public API is the black box under test.

mod infra;
mod queueing;
mod transport;
