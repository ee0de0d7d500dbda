/*!
 * Asynchronous Channels
 *
 * Stream, listening and datagram channels bound to a channel group. Every
 * operation takes an optional deadline and a single-shot callback that runs
 * on one of the group's pool threads. At most one operation of each kind
 * may be pending per channel.
 */

mod datagram;
mod io;
mod options;
mod server;
mod shared;
mod socket;

pub(crate) use shared::{Attempt, ChannelCore, Completion, Operation, Sock};
pub use datagram::AsyncDatagramChannel;
pub use server::AsyncServerSocketChannel;
pub use socket::AsyncSocketChannel;
