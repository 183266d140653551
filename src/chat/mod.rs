//! Chat pipeline
//!
//! User input is routed either to one-shot image generation or over the
//! chat socket; streamed replies are assembled into an observable message
//! list.

pub mod assembler;
pub mod image;
pub mod message;
pub mod router;
pub mod session;
pub mod socket;

pub use assembler::{Reply, StreamAssembler};
pub use image::ImageClient;
pub use message::{Message, Role};
pub use router::{RequestRouter, Route};
pub use session::{
    CONNECTION_ERROR_MESSAGE, ChatSession, IMAGE_FAILED_MESSAGE, SessionBuilder, SessionState,
};
pub use socket::{Disconnect, Frame, FrameSink, SocketSession, SocketState};
