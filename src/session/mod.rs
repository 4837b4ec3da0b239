//! Session and endpoint management
//!
//! A session owns the sockets and the worker thread for one direction of
//! one stream. Senders push frames in and datagrams out; receivers pull
//! datagrams in and frames out. Sessions are independent; a process may
//! run any number of them.

pub mod endpoint;
pub mod receiver;
pub mod sender;

pub use endpoint::{Endpoint, EndpointProtocol};
pub use receiver::{ReceiverSession, ReceiverStats};
pub use sender::{SenderSession, SenderStats};
