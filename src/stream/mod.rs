//! Image stream parsing
//!
//! Turns the byte stream produced by the transcoder into discrete images.

pub mod chunk;
pub mod demuxer;

pub use chunk::{ChunkHeader, PNG_SIGNATURE};
pub use demuxer::{DemuxState, StreamDemuxer};
