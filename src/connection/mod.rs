//! Database connection plumbing

#[cfg(feature = "postgres")]
pub mod postgres;
