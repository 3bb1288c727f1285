// ABOUTME: Server-side connection handling: accept loop, request dispatch,
// ABOUTME: and the wire-level response marshalling for each return kind.

mod dispatch;
mod listener;

pub use listener::Server;
