//! Agent-side sampling: the accumulator and the sources feeding it

mod source;
mod store;

pub use source::{HostStats, RuntimeStats, StatsSource, SysinfoSource};
pub use store::{CollectionStore, POLL_COUNT, RANDOM_VALUE};
