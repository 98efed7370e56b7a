//! rhizome-services — the size-tiered queue set and the two associative
//! caches that make it cheap to run. Pure, synchronous data structures;
//! no I/O, no async runtime. `rhizomed` drives these from its scheduler
//! actor and supplies the transport and persistence side of the engine.

pub mod ignore_cache;
pub mod queue;
pub mod version_cache;

pub use ignore_cache::IgnoreCache;
pub use queue::{suggest_queue, AdmitOutcome, FetchCandidate, QueueSet, Tier, DEFAULT_PRIORITY};
pub use version_cache::{VersionCache, VersionLookup};
