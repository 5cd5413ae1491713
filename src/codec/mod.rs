//! Wire-format primitives shared by the agent and the server

pub mod crypto;
pub mod framer;
pub mod gzip;
pub mod hash;

pub use crypto::{Decryptor, Encryptor};
pub use framer::{DeliveryFramer, Frame, FrameDecoder};
pub use hash::HASH_HEADER;
