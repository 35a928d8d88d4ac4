//! The acme side of gitfiles. Acme's window files and the plumber's ports
//! are reached over a small 9P2000 client.

pub mod acme;
pub mod client;
pub mod event;
pub mod fcall;
pub mod namespace;
pub mod plumb;

pub use acme::Acme;
pub use client::{Client, NinepError};
pub use plumb::PlumbPort;
