//! 流协议层：provider 输出片段与 batchCall 展开

pub mod batch;
pub mod parts;

pub use batch::{transform_stream, BatchCallTransformer};
pub use parts::StreamPart;
