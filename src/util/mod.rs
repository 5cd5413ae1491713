//! Process-level helpers shared by the binaries

pub mod logging;
pub mod shutdown;
