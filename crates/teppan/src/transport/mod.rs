//! # Transport
//!
//! Local IPC between clients and the batching server: a Unix domain socket
//! on POSIX systems, a named pipe on Windows. Both carry the same
//! length-prefixed MessagePack frames through [`Channel`].

mod address;
mod channel;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::{ClientChannel, Listener, ServerChannel, connect, remove_stale};

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::{ClientChannel, Listener, ServerChannel, connect, remove_stale};

pub use address::Address;
pub use channel::{Channel, MAX_FRAME_LEN};
