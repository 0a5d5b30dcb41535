/// Wire protocol shared by the worker and its parent process
///
/// - `codec`: length-prefixed JSON framing (`FrameReader` / `FrameWriter`)
/// - `message`: request and response payloads
pub mod codec;
pub mod message;

pub use codec::{
    encode_frame, FrameError, FrameReader, FrameWriter, DEFAULT_MAX_FRAME_LEN, LENGTH_PREFIX_LEN,
};
pub use message::{Request, Response, SynthesisResponse};
