// Output Pipeline - bytes -> lines -> protocol text -> store

mod decoder;
mod pipeline;
mod protocol;

pub use decoder::{LineFramer, Utf8StreamDecoder};
pub use pipeline::{console_tag, OutputPipeline, CONSOLE_TARGET};
pub use protocol::extract_text;
