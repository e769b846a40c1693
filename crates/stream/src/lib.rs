pub mod decode;
pub mod ws;

pub use decode::decode;
pub use ws::{LifecycleEvent, WsTransport};
