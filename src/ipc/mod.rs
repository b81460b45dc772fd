//! Bus endpoint — the Unix-socket surface clients talk to.
//!
//! Clients call `ShowMenu` and receive `OnSelect` / `OnCancel` signals.
//! Frames are length-prefixed MessagePack (see [`codec`]).

pub mod client;
pub mod codec;
pub mod protocol;
pub mod server;
