//! Anonymous, file-backed payload buffers
//!
//! A [`Buffer`] is a cursor over a shared anonymous file. Producers write a
//! payload once; the broker hands every subscriber its own
//! [`Buffer::duplicate`], which shares the content but carries an
//! independent cursor starting at 0.
//!
//! ```text
//!   Buffer (pos 42) ──┐
//!   duplicate (pos 0) ─┼──► Arc<Inner { fd: memfd, len }>
//!   duplicate (pos 7) ─┘
//! ```
//!
//! Because content lives in a file descriptor, a buffer can be sent to a
//! socket with `sendfile(2)` and never copied through user space. The last
//! handle to drop closes the descriptor and the kernel reclaims the storage.

pub mod handle;
pub mod store;
pub mod transmit;

pub use handle::Buffer;
pub use store::BackingStore;
pub use transmit::{write_all, StreamSocket};
