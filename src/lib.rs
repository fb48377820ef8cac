//! # wsengine - an RFC 6455 WebSocket protocol engine
//!
//! `wsengine` implements the WebSocket protocol for one endpoint, client or
//! server, over any byte transport. The engine never touches a socket: a
//! driver feeds received bytes to [`Connection::add`] and writes out what
//! [`Connection::get`] returns. [`StreamTransport`] is such a driver for
//! tokio streams.
//!
//! ## Components
//!
//! - **Frame codec** ([`protocol::frame`]): bit-exact RFC 6455 framing
//! - **Handshake** ([`protocol::handshake`]): HTTP/1.1 upgrade for both roles
//! - **Connection** ([`connection`]): state machine, fragmentation, ping/pong
//!   and the close handshake
//! - **Extensions** ([`extensions`]): negotiated per-frame transforms
//! - **Processor** ([`processor`]): delivers messages to application listeners
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wsengine::{Config, Connection, ExtensionRegistry, Processor, StreamTransport};
//!
//! let transport = StreamTransport::new();
//! let conn = Connection::server(Config::new(), Arc::new(ExtensionRegistry::new()), transport.clone());
//! let processor = Processor::new(conn.clone());
//! processor.add_listener(Arc::new(MyListener));
//! processor.start();
//! transport.spawn(tcp_stream, conn);
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod extensions;
pub mod message;
pub mod processor;
pub mod protocol;
pub mod transport;

pub use config::{Config, Limits, Timeouts};
pub use connection::{Connection, ConnectionState, Event, Role};
pub use error::{Error, Result};
pub use extensions::{Extension, ExtensionOffer, ExtensionParam, ExtensionPipeline, ExtensionRegistry};
pub use message::{CloseCode, CloseFrame, Message};
pub use processor::{ListenerId, MessageListener, Processor, ProtocolConsumer};
pub use protocol::{HandshakeRequest, HandshakeResponse, OpCode, WS_GUID, compute_accept_key};
pub use transport::{StreamTransport, Transport};
