//! Length-prefixed frame codec.
//!
//! Every message on either channel is one frame: a 4-byte little-endian
//! length followed by a JSON body. Framing keeps message boundaries
//! unambiguous on a raw byte stream and lets a reader pull exactly one
//! message without lookahead.
//!
//! End-of-file is meaningful on these channels, since a closed channel is
//! how an agent's death is observed. The reader distinguishes a clean close
//! at a frame boundary ([`read_frame`] returns `Ok(None)`) from a close in
//! the middle of a frame, which is an error.

use std::collections::TryReserveError;
use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Upper bound on the body length of a single frame.
///
/// Larger payloads (bulk memory transfers) must be refused by the agent
/// before this limit matters; the limit exists so a corrupt length header
/// cannot drive an unbounded allocation.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Failure while framing or unframing a message.
#[derive(Debug, Error)]
pub enum CodecError
{
    /// The underlying stream failed, including a close mid-body.
    #[error("channel i/o failed: {0}")]
    Io(#[from] io::Error),

    /// The body was not a valid message.
    #[error("malformed message body: {0}")]
    Json(#[from] serde_json::Error),

    /// The length header announced a frame above [`MAX_FRAME_LEN`].
    #[error("{len} byte frame exceeds the {max} byte limit")]
    FrameTooLarge
    {
        /// Announced body length.
        len: usize,
        /// The limit it exceeded.
        max: usize,
    },

    /// The stream closed in the middle of a length header.
    #[error("channel closed mid-frame ({got} of 4 header bytes)")]
    TruncatedHeader
    {
        /// Header bytes received before the close.
        got: usize,
    },

    /// The receive buffer for a frame body could not be allocated.
    #[error("failed to allocate frame buffer: {0}")]
    OutOfMemory(#[from] TryReserveError),
}

/// Serialize `value` and write it as one frame.
///
/// The frame is flushed before returning so a blocked peer sees it
/// immediately; both channels sit on FIFOs where buffered partial frames
/// would deadlock the request/response dance.
///
/// # Errors
///
/// Fails if the value does not serialize, exceeds [`MAX_FRAME_LEN`], or the
/// stream cannot be written.
pub fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), CodecError>
where
    W: Write,
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec(value)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge { len: body.len(), max: MAX_FRAME_LEN });
    }
    let header = (body.len() as u32).to_le_bytes();
    writer.write_all(&header)?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame and deserialize its body.
///
/// Returns `Ok(None)` when the stream is cleanly closed at a frame
/// boundary. A close inside a header or body is an error, as is a header
/// announcing more than [`MAX_FRAME_LEN`] bytes.
///
/// # Errors
///
/// Fails on stream errors, truncated frames, oversized frames, frame
/// buffers that cannot be allocated, and bodies that do not deserialize.
pub fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, CodecError>
where
    R: Read,
    T: DeserializeOwned,
{
    let len = match read_len(reader)? {
        Some(len) => len as usize,
        None => return Ok(None),
    };
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge { len, max: MAX_FRAME_LEN });
    }

    let mut body = Vec::new();
    body.try_reserve_exact(len)?;
    body.resize(len, 0);
    reader.read_exact(&mut body)?;

    Ok(Some(serde_json::from_slice(&body)?))
}

/// Read the 4-byte length header, distinguishing a clean close (`None`)
/// from a close after some header bytes arrived.
fn read_len<R: Read>(reader: &mut R) -> Result<Option<u32>, CodecError>
{
    let mut header = [0_u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(CodecError::TruncatedHeader { got: filled });
            }
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(CodecError::Io(e)),
        }
    }
    Ok(Some(u32::from_le_bytes(header)))
}

#[cfg(test)]
mod tests
{
    use std::io::Cursor;

    use super::*;
    use crate::message::{Request, Response};
    use crate::Payload;

    #[test]
    fn frames_round_trip_in_sequence()
    {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Request::State).unwrap();
        write_frame(&mut buf, &Request::ReadMemory { addr: 0x2000, len: 16 }).unwrap();

        let mut cursor = Cursor::new(buf);
        let first: Request = read_frame(&mut cursor).unwrap().unwrap();
        let second: Request = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(first, Request::State);
        assert_eq!(second, Request::ReadMemory { addr: 0x2000, len: 16 });

        let end: Option<Request> = read_frame(&mut cursor).unwrap();
        assert!(end.is_none());
    }

    #[test]
    fn clean_close_is_none()
    {
        let mut cursor = Cursor::new(Vec::new());
        let got: Option<Response> = read_frame(&mut cursor).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn close_inside_the_header_is_an_error()
    {
        let mut cursor = Cursor::new(vec![0x04, 0x00]);
        let got = read_frame::<_, Request>(&mut cursor);
        assert!(matches!(got, Err(CodecError::TruncatedHeader { got: 2 })));
    }

    #[test]
    fn close_inside_the_body_is_an_error()
    {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Response::Valid(Payload::Empty)).unwrap();
        buf.truncate(buf.len() - 3);

        let mut cursor = Cursor::new(buf);
        let got = read_frame::<_, Response>(&mut cursor);
        assert!(matches!(got, Err(CodecError::Io(_))));
    }

    #[test]
    fn oversized_header_is_refused_without_allocating()
    {
        let mut buf = Vec::from(u32::MAX.to_le_bytes());
        buf.extend_from_slice(b"junk");

        let mut cursor = Cursor::new(buf);
        let got = read_frame::<_, Request>(&mut cursor);
        assert!(matches!(got, Err(CodecError::FrameTooLarge { .. })));
    }
}
