pub mod api;
pub mod scripted;

pub use api::{ErrorKind, RemoteApi, RemoteError, RemotePage};
pub use scripted::ScriptedClient;
