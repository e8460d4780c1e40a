//! NPDRM license header carried at the start of protected files.

pub mod headers;

pub use headers::{NpdAppType, NpdDrmType, NpdHeader};
