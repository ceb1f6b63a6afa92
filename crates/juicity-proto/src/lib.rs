//! juicity-proto: wire codecs for the juicity proxy protocol
//!
//! Everything here is transport-agnostic: readers and writers are plain
//! tokio `AsyncRead` / `AsyncWrite` halves, so the same codecs run over QUIC
//! streams in the server and over in-memory pipes in tests.

pub mod address;
pub mod command;
pub mod error;
pub mod packet;
pub mod request;
pub mod stream;

pub use address::Address;
pub use command::{Authenticate, CommandHead, CommandType, VERSION_0};
pub use error::ProtoError;
pub use packet::{PacketReader, PacketWriter, MAX_PACKET_SIZE};
pub use request::{Network, RelayRequest};
pub use stream::StreamConn;
