//! Client for the remote realtime speech service.

pub mod client;
pub mod events;
pub mod loopback;
pub mod messages;
pub mod tools;
pub mod transport;

pub use client::{ClientSettings, ClientState, ProtocolClient, ProtocolHandle, SendOutcome};
pub use events::{EventKind, ProtocolEvent};
pub use loopback::{loopback, LoopbackConnector, LoopbackServer};
pub use messages::{ClientMessage, SessionParams, ToolDeclaration};
pub use tools::{character_tools, ToolHandler, ToolRegistry};
pub use transport::{Connector, Transport, WsConnector};
