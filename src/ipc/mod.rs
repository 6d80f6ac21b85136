// IPC module - Communication between client and daemon

pub mod client;
pub mod protocol;
pub mod server;

pub use client::IpcClient;
pub use protocol::{Command, DaemonCommand, LogOptions, Request, Response, ResponseData};
pub use server::IpcServer;
