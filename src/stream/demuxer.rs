//! Stream demultiplexer
//!
//! Splits a continuous `image2pipe` byte stream into complete PNG images.
//! Input may arrive in arbitrarily sized pieces; images are only emitted
//! once their terminal chunk (checksum included) has been buffered.

use super::chunk::{ChunkHeader, CHUNK_HEADER_LEN, PNG_SIGNATURE};
use crate::utils::error::{AppError, AppResult};

/// Parser position within the current image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxState {
    /// Waiting for the 8-byte signature of the next image
    SignatureWait,
    /// Waiting for a chunk's length and type
    HeaderWait,
    /// Waiting for the payload and checksum of `header`
    PayloadWait(ChunkHeader),
    /// Terminal chunk consumed, image ready to emit
    Finalize,
    /// A signature mismatch was seen; the stream is abandoned
    Failed,
}

/// Incremental image extractor over an append-only buffer
#[derive(Debug)]
pub struct StreamDemuxer {
    buf: Vec<u8>,
    /// Bytes before `offset` belong to the image being assembled
    offset: usize,
    state: DemuxState,
    images_emitted: u64,
    /// Absolute stream position of `buf[0]`, for error reports
    stream_base: usize,
}

impl StreamDemuxer {
    /// Create a demuxer positioned at the start of a stream
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            offset: 0,
            state: DemuxState::SignatureWait,
            images_emitted: 0,
            stream_base: 0,
        }
    }

    /// Append `data` and return every image it completes, in stream order.
    ///
    /// A signature mismatch is fatal: the error is returned from this call
    /// and every later call.
    pub fn feed(&mut self, data: &[u8]) -> AppResult<Vec<Vec<u8>>> {
        if self.state == DemuxState::Failed {
            return Err(self.failed_error());
        }
        self.buf.extend_from_slice(data);

        let mut images = Vec::new();
        loop {
            let before = (self.state, self.offset);
            match self.state {
                DemuxState::SignatureWait => self.process_signature()?,
                DemuxState::HeaderWait => self.process_header(),
                DemuxState::PayloadWait(header) => self.process_payload(header),
                DemuxState::Finalize => images.push(self.finalize_image()),
                DemuxState::Failed => return Err(self.failed_error()),
            }
            // No progress means the buffer cannot satisfy the current state
            if (self.state, self.offset) == before {
                break;
            }
        }
        Ok(images)
    }

    /// Current parser state
    pub fn state(&self) -> DemuxState {
        self.state
    }

    /// Number of bytes buffered for an incomplete image
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    /// True if bytes of an unfinished image are buffered
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Number of images emitted so far
    pub fn images_emitted(&self) -> u64 {
        self.images_emitted
    }

    /// Resolve end of stream: an unfinished image becomes an error.
    pub fn finish(&self) -> AppResult<()> {
        if self.state == DemuxState::Failed {
            return Err(self.failed_error());
        }
        if self.has_partial() {
            return Err(AppError::Stream {
                offset: self.stream_base + self.buf.len(),
                message: format!(
                    "stream ended inside an image ({} bytes buffered)",
                    self.buf.len()
                ),
            });
        }
        Ok(())
    }

    fn available(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn process_signature(&mut self) -> AppResult<()> {
        if self.available() < PNG_SIGNATURE.len() {
            return Ok(());
        }
        let observed = &self.buf[self.offset..self.offset + PNG_SIGNATURE.len()];
        if observed != PNG_SIGNATURE {
            let message = format!("bad image signature {:02x?}", observed);
            tracing::error!("Abandoning stream: {}", message);
            self.state = DemuxState::Failed;
            return Err(AppError::Stream {
                offset: self.stream_base + self.offset,
                message,
            });
        }
        self.offset += PNG_SIGNATURE.len();
        self.state = DemuxState::HeaderWait;
        Ok(())
    }

    fn process_header(&mut self) {
        if self.available() < CHUNK_HEADER_LEN {
            return;
        }
        let mut block = [0u8; CHUNK_HEADER_LEN];
        block.copy_from_slice(&self.buf[self.offset..self.offset + CHUNK_HEADER_LEN]);
        self.offset += CHUNK_HEADER_LEN;
        self.state = DemuxState::PayloadWait(ChunkHeader::parse(block));
    }

    fn process_payload(&mut self, header: ChunkHeader) {
        // Payload and checksum must both be present
        let needed = header.body_len();
        if self.available() < needed {
            return;
        }
        self.offset += needed;
        self.state = if header.is_terminal {
            DemuxState::Finalize
        } else {
            DemuxState::HeaderWait
        };
    }

    fn finalize_image(&mut self) -> Vec<u8> {
        let image: Vec<u8> = self.buf.drain(..self.offset).collect();
        self.stream_base += self.offset;
        self.offset = 0;
        self.state = DemuxState::SignatureWait;
        self.images_emitted += 1;
        tracing::trace!(
            "Extracted image #{} ({} bytes)",
            self.images_emitted,
            image.len()
        );
        image
    }

    fn failed_error(&self) -> AppError {
        AppError::Stream {
            offset: self.stream_base + self.offset,
            message: "stream was abandoned after a bad image signature".to_string(),
        }
    }
}

impl Default for StreamDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::fixtures::encode_png;

    fn feed_in_pieces(input: &[u8], piece: usize) -> Vec<Vec<u8>> {
        let mut demuxer = StreamDemuxer::new();
        let mut images = Vec::new();
        for chunk in input.chunks(piece) {
            images.extend(demuxer.feed(chunk).unwrap());
        }
        assert!(!demuxer.has_partial());
        images
    }

    fn sample_stream() -> (Vec<Vec<u8>>, Vec<u8>) {
        let sources = vec![encode_png(4, 3, 1), encode_png(16, 9, 7), encode_png(1, 1, 3)];
        let stream = sources.concat();
        (sources, stream)
    }

    #[test]
    fn test_single_feed_extracts_all_images() {
        let (sources, stream) = sample_stream();
        let images = feed_in_pieces(&stream, stream.len());
        assert_eq!(images, sources);
    }

    #[test]
    fn test_one_byte_feeds_match_one_shot() {
        let (sources, stream) = sample_stream();
        assert_eq!(feed_in_pieces(&stream, 1), sources);
    }

    #[test]
    fn test_seven_byte_feeds_match_one_shot() {
        let (sources, stream) = sample_stream();
        assert_eq!(feed_in_pieces(&stream, 7), sources);
    }

    #[test]
    fn test_partial_header_waits_for_more() {
        let image = encode_png(2, 2, 5);
        let mut demuxer = StreamDemuxer::new();

        // Signature plus half a chunk header
        let images = demuxer.feed(&image[..12]).unwrap();
        assert!(images.is_empty());
        assert_eq!(demuxer.state(), DemuxState::HeaderWait);
        assert!(demuxer.has_partial());
        assert!(demuxer.finish().is_err());

        let images = demuxer.feed(&image[12..]).unwrap();
        assert_eq!(images, vec![image]);
        assert!(demuxer.finish().is_ok());
    }

    #[test]
    fn test_bad_signature_is_fatal() {
        let mut demuxer = StreamDemuxer::new();
        let mut bogus = b"GIF89a\x01\x00".to_vec();
        bogus.extend_from_slice(&encode_png(2, 2, 1));

        let err = demuxer.feed(&bogus).unwrap_err();
        assert!(matches!(err, AppError::Stream { offset: 0, .. }));
        assert_eq!(demuxer.state(), DemuxState::Failed);

        // No resynchronization on later input
        assert!(demuxer.feed(&encode_png(2, 2, 1)).is_err());
    }

    #[test]
    fn test_bad_signature_after_valid_image() {
        let first = encode_png(2, 2, 1);
        let mut stream = first.clone();
        stream.extend_from_slice(&[0u8; 8]);

        let mut demuxer = StreamDemuxer::new();
        let err = demuxer.feed(&stream).unwrap_err();
        match err {
            AppError::Stream { offset, .. } => assert_eq!(offset, first.len()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_short_signature_is_not_an_error_yet() {
        let mut demuxer = StreamDemuxer::new();
        assert!(demuxer.feed(&PNG_SIGNATURE[..5]).unwrap().is_empty());
        assert_eq!(demuxer.state(), DemuxState::SignatureWait);
    }

    #[test]
    fn test_hand_built_image_with_empty_terminal_chunk() {
        let mut image = PNG_SIGNATURE.to_vec();
        image.extend_from_slice(&[0, 0, 0, 3]);
        image.extend_from_slice(b"abCd");
        image.extend_from_slice(&[1, 2, 3]);
        image.extend_from_slice(&[9, 9, 9, 9]);
        image.extend_from_slice(&[0, 0, 0, 0]);
        image.extend_from_slice(b"IEND");
        image.extend_from_slice(&[0xAE, 0x42, 0x60, 0x82]);

        let mut demuxer = StreamDemuxer::new();
        let images = demuxer.feed(&image[..image.len() - 1]).unwrap();
        assert!(images.is_empty());
        let images = demuxer.feed(&image[image.len() - 1..]).unwrap();
        assert_eq!(images, vec![image]);
        assert_eq!(demuxer.images_emitted(), 1);
        assert_eq!(demuxer.pending_bytes(), 0);
    }
}
