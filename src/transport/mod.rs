//! Link from the command tool to a node
//!
//! - `tcp`: TCP connector
//! - `link`: bridges an async stream to the polled `Transport` used by the client

pub mod link;
pub mod tcp;

pub use link::spawn_link;
pub use tcp::TcpConnector;
