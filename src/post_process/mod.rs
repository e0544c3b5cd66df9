pub mod merger;

pub use merger::{MediaMerger, MergeError, MuxResult, Muxer, decode_diagnostic};
