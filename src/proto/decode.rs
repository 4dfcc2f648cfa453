//! Decoders to handle different response body framings.
//!
//! If a message body does not include a `Transfer-Encoding`, it *should*
//! include a `Content-Length` header; a response carrying neither is read
//! until the peer closes the connection.

use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

use crate::error::{Error, Parse};

/// The chunk-size line (hex size, optional extensions, CRLF) may not exceed
/// this many bytes.
const CHUNK_SIZE_LINE_MAX: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkedState {
    Size,
    SizeLws,
    Extension,
    SizeLf,
    Body,
    BodyCr,
    BodyLf,
    EndCr,
    EndLf,
    End,
}

#[derive(Debug)]
pub(crate) enum Decoder {
    /// Used when a `Content-Length` header is passed with a positive integer.
    Length(u64),
    /// Used when `Transfer-Encoding` ends in `chunked`.
    Chunked {
        state: ChunkedState,
        size: u64,
        line_len: usize,
    },
    /// Used for responses that don't indicate a length or chunked: the body
    /// ends when the peer closes the connection.
    Eof,
}

/// One step of decoding against the receive buffer.
#[derive(Debug)]
pub(crate) enum Decoded {
    /// A run of body bytes.
    Data(Bytes),
    /// The buffer is exhausted; read more from the transport.
    NeedMore,
    /// The body is complete.
    Complete,
}

impl Decoder {
    pub(crate) fn length(len: u64) -> Decoder {
        Decoder::Length(len)
    }

    pub(crate) fn chunked() -> Decoder {
        Decoder::Chunked {
            state: ChunkedState::Size,
            size: 0,
            line_len: 0,
        }
    }

    pub(crate) fn eof() -> Decoder {
        Decoder::Eof
    }

    pub(crate) fn is_eof_mode(&self) -> bool {
        matches!(self, Decoder::Eof)
    }

    /// Consumes what it can from `buf` and reports progress. `Data` may be
    /// returned repeatedly; `Complete` is terminal except for `Eof`, which
    /// only completes through [`Decoder::on_eof`].
    pub(crate) fn decode(&mut self, buf: &mut BytesMut) -> crate::Result<Decoded> {
        match self {
            Decoder::Length(remaining) => {
                if *remaining == 0 {
                    return Ok(Decoded::Complete);
                }
                if buf.is_empty() {
                    return Ok(Decoded::NeedMore);
                }
                let n = std::cmp::min(*remaining, buf.len() as u64) as usize;
                *remaining -= n as u64;
                Ok(Decoded::Data(buf.split_to(n).freeze()))
            }
            Decoder::Eof => {
                if buf.is_empty() {
                    Ok(Decoded::NeedMore)
                } else {
                    let len = buf.len();
                    Ok(Decoded::Data(buf.split_to(len).freeze()))
                }
            }
            Decoder::Chunked {
                state,
                size,
                line_len,
            } => loop {
                match *state {
                    ChunkedState::Body => {
                        if buf.is_empty() {
                            return Ok(Decoded::NeedMore);
                        }
                        let n = std::cmp::min(*size, buf.len() as u64) as usize;
                        let data = buf.split_to(n).freeze();
                        *size -= n as u64;
                        if *size == 0 {
                            *state = ChunkedState::BodyCr;
                        }
                        return Ok(Decoded::Data(data));
                    }
                    ChunkedState::End => return Ok(Decoded::Complete),
                    other => {
                        if buf.is_empty() {
                            return Ok(Decoded::NeedMore);
                        }
                        let byte = buf[0];
                        buf.advance(1);
                        *state = step_chunk_line(other, byte, size, line_len)?;
                    }
                }
            },
        }
    }

    /// The transport hit EOF; whether that completes the body depends on the
    /// framing mode.
    pub(crate) fn on_eof(&self) -> crate::Result<()> {
        match self {
            Decoder::Eof => Ok(()),
            Decoder::Length(0) => Ok(()),
            Decoder::Chunked {
                state: ChunkedState::End,
                ..
            } => Ok(()),
            _ => Err(Error::new_closed()),
        }
    }
}

/// Advances the chunked framing machine by one non-body byte.
fn step_chunk_line(
    state: ChunkedState,
    byte: u8,
    size: &mut u64,
    line_len: &mut usize,
) -> crate::Result<ChunkedState> {
    use self::ChunkedState::*;

    let in_size_line = matches!(state, Size | SizeLws | Extension);
    if in_size_line {
        *line_len += 1;
        if *line_len > CHUNK_SIZE_LINE_MAX {
            return Err(Error::new_parse(Parse::Chunk));
        }
    }

    let next = match state {
        Size => match byte {
            b @ b'0'..=b'9' => {
                *size = checked_hex(*size, (b - b'0') as u64)?;
                Size
            }
            b @ b'a'..=b'f' => {
                *size = checked_hex(*size, (b + 10 - b'a') as u64)?;
                Size
            }
            b @ b'A'..=b'F' => {
                *size = checked_hex(*size, (b + 10 - b'A') as u64)?;
                Size
            }
            // LWS can follow the chunk size, but no more digits can come.
            b'\t' | b' ' => SizeLws,
            b';' => Extension,
            b'\r' => SizeLf,
            _ => return Err(Error::new_parse(Parse::Chunk)),
        },
        SizeLws => match byte {
            b'\t' | b' ' => SizeLws,
            b';' => Extension,
            b'\r' => SizeLf,
            _ => return Err(Error::new_parse(Parse::Chunk)),
        },
        // No supported extensions; skip to the end of the line.
        Extension => match byte {
            b'\r' => SizeLf,
            _ => Extension,
        },
        SizeLf => match byte {
            b'\n' => {
                trace!("chunk size: {}", *size);
                *line_len = 0;
                if *size == 0 {
                    EndCr
                } else {
                    Body
                }
            }
            _ => return Err(Error::new_parse(Parse::Chunk)),
        },
        BodyCr => match byte {
            b'\r' => BodyLf,
            _ => return Err(Error::new_parse(Parse::Chunk)),
        },
        BodyLf => match byte {
            b'\n' => Size,
            _ => return Err(Error::new_parse(Parse::Chunk)),
        },
        EndCr => match byte {
            b'\r' => EndLf,
            _ => return Err(Error::new_parse(Parse::Chunk)),
        },
        EndLf => match byte {
            b'\n' => End,
            _ => return Err(Error::new_parse(Parse::Chunk)),
        },
        // Body and End are handled by the caller.
        Body | End => state,
    };
    Ok(next)
}

fn checked_hex(size: u64, digit: u64) -> crate::Result<u64> {
    size.checked_mul(16)
        .and_then(|s| s.checked_add(digit))
        .ok_or_else(|| Error::new_parse(Parse::Chunk))
}
