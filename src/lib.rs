#![doc = include_str!("../README.md")]
#![deny(unsafe_code, missing_docs)]

pub mod clock;
pub mod crypto;
pub mod error;
pub mod fields;
pub mod flow;
pub mod inflate;
pub mod packet;
pub mod record;
pub mod session;
