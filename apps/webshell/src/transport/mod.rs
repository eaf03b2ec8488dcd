pub mod mock;
pub mod websocket;

pub use chunk_transport::{
    ByteChunk, FrameKind, LoopbackEnd, LoopbackTransport, Transport, TransportError,
    TransportEvent, TransportEvents, TransportResult,
};
