//! Audio payload helpers shared by the dispatcher and the engines.

pub mod redirect;
pub mod wav;

pub use redirect::StdoutRedirect;
pub use wav::{decode_base64, decode_wav, encode_base64, encode_wav, resample_linear};
