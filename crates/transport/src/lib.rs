pub mod cancel;
pub mod client;
pub mod event;
pub mod sse;
pub mod transport;

pub use cancel::CancelToken;
pub use client::{HttpSessionTransport, SseEventStream};
pub use event::SessionEvent;
pub use sse::{parse_event, SseDecoder, SseFrame};
pub use transport::{EventStream, HistoryPage, SessionTransport, StreamRequest, TransportError};

#[cfg(any(test, feature = "test-utils"))]
pub use transport::mock;
