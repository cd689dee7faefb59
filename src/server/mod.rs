pub mod builder;
pub mod handler;
pub mod listener;

pub use builder::{ServerBuilder, BIND_POOL, GENERAL_POOL};
pub use handler::ConnectionHandler;
pub use listener::{Acceptor, ClientConnection, ClientHandle, ProxyListener, SessionInfo};
