mod client;
mod dispatch;
mod pipeline;
mod runtime;
mod server;

pub use client::client_request;
pub use server::run_daemon;
