//! Multi-listener broadcast endpoint
//!
//! Listeners connect with a token issued by the listener manager. Encoded
//! audio is produced by an external encoder fed from the frame pump and
//! multiplexed to every connection, with ICY metadata interleaved for
//! clients that ask for it.

mod connection;
pub mod icy;
pub mod routes;
mod server;

pub use connection::DirectStream;
pub use routes::router;
pub use server::{BroadcastServer, SINK_NAME};
