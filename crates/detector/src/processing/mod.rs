pub mod nms;
pub mod post;

pub use nms::suppress;
pub use post::{Architecture, DecodeError, OutputNames, PostProcessor};
