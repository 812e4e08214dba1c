//! Decoder for the container engine's binary log multiplex format.
//!
//! Each frame is an 8-byte header followed by its payload: byte 0 identifies
//! the stream (1 = stdout, 2 = stderr), bytes 4-7 are a big-endian u32
//! payload length, and the rest of the header is padding. This is exposed as
//! a standalone pure function rather than hidden inside the engine client
//! library's own demultiplexing, so it can be tested directly against
//! malformed and partial input.

const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream: FrameStream,
    pub payload: String,
}

/// Decode exactly one frame from the front of `buf`.
///
/// Returns `Some((frame, consumed))` when a complete frame is present, where
/// `consumed` is the number of bytes (header + payload) to drop from `buf`
/// before decoding the next one. Returns `None` if `buf` doesn't yet hold a
/// full frame — the caller should wait for more bytes. An unrecognized
/// stream id in byte 0 is treated as stdout, matching the engine's own
/// leniency toward unknown stream ids.
pub fn decode_frame(buf: &[u8]) -> Option<(Frame, usize)> {
    if buf.len() < HEADER_LEN {
        return None;
    }

    let stream = match buf[0] {
        2 => FrameStream::Stderr,
        _ => FrameStream::Stdout,
    };
    let length = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
    let total = HEADER_LEN + length;

    if buf.len() < total {
        return None;
    }

    let payload = String::from_utf8_lossy(&buf[HEADER_LEN..total]).into_owned();
    Some((Frame { stream, payload }, total))
}

/// Decode every complete frame present in `buf`, leaving any trailing
/// partial frame undecoded.
pub fn decode_all(mut buf: &[u8]) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Some((frame, consumed)) = decode_frame(buf) {
        frames.push(frame);
        buf = &buf[consumed..];
    }
    frames
}
