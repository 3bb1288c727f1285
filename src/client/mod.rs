// ABOUTME: The caller side of the wire protocol: dialing, the request/response
// ABOUTME: round trip, and the stream handles a `Stream`-kind response returns.

mod call;
mod stream;

pub use call::{CallArg, CallResult, Client, ClientStream};
pub use stream::{DuplexStream, ReadStream, WriteStream};
