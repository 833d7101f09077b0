//! The pkt-line demultiplexer (§4.1): Git's 4-hex-length-prefixed framing,
//! with sideband channels 1 (pack data), 2 (progress) and 3 (error).
//!
//! Exposed as a pull API (`next_event`) rather than a real `Iterator`,
//! since producing the next event can fail and that needs to come back as
//! a `Result`, not be swallowed by `Iterator::next`'s `Option`.

use std::io::Read;

use crate::error::{Error, Result};

/// One event out of a pkt-line stream. Sideband-1 bytes are written
/// directly to the caller's sink and never surface as an event; sideband-2
/// lines surface as `Progress` so the caller can log them; anything else
/// (capability advertisement, ref lines, ack/nak) surfaces as `Control`
/// with the full payload, leading byte included.
#[derive(Debug, PartialEq, Eq)]
pub enum PktEvent {
    Control(Vec<u8>),
    Progress(Vec<u8>),
    Flush,
}

/// Reads one pkt-line event from `r`, writing any sideband-1 payload to
/// `pack_sink`. Returns `Ok(None)` at EOF (the remote closed the
/// connection without a final flush, which callers treat the same as a
/// flush).
pub fn next_event(r: &mut impl Read, pack_sink: &mut impl std::io::Write) -> Result<Option<PktEvent>> {
    // Sideband-1 lines don't surface as an event; a pack can be many
    // thousands of them, so this loops rather than recursing.
    loop {
        let mut len_hex = [0u8; 4];
        match read_exact_or_eof(r, &mut len_hex)? {
            false => return Ok(None),
            true => {}
        }
        let len = parse_hex_len(&len_hex)?;
        if len < 4 {
            // Flush (0000), protocol v2 delim (0001), or response-end (0002):
            // none carry a payload. The original treats all of these as
            // pure separators to skip past, not stream terminators — only a
            // closed connection (EOF) ends a response. `Flush` still
            // surfaces as a distinct event for callers that care (e.g. the
            // request encoder round-trip tests), but nothing here treats it
            // as "stop reading".
            return Ok(Some(PktEvent::Flush));
        }
        let payload_len = len - 4;
        if payload_len == 0 {
            // A pkt-line with a length but no payload byte at all; treat like
            // an empty control line rather than erroring, since some servers
            // emit these between ack batches.
            return Ok(Some(PktEvent::Control(Vec::new())));
        }
        let mut first = [0u8; 1];
        r.read_exact(&mut first)?;
        match first[0] {
            0x01 => {
                let mut remaining = payload_len - 1;
                let mut buf = [0u8; 4096];
                while remaining > 0 {
                    let chunk = std::cmp::min(remaining, buf.len());
                    r.read_exact(&mut buf[..chunk])?;
                    pack_sink.write_all(&buf[..chunk])?;
                    remaining -= chunk;
                }
                continue;
            }
            0x02 => {
                let mut rest = vec![0u8; payload_len - 1];
                r.read_exact(&mut rest)?;
                return Ok(Some(PktEvent::Progress(rest)));
            }
            0x03 => {
                let mut rest = vec![0u8; payload_len - 1];
                r.read_exact(&mut rest)?;
                return Err(Error::Remote {
                    status: 0,
                    message: String::from_utf8_lossy(&rest).into_owned(),
                });
            }
            other => {
                let mut rest = vec![0u8; payload_len - 1];
                r.read_exact(&mut rest)?;
                let mut line = vec![other];
                line.extend(rest);
                return Ok(Some(PktEvent::Control(line)));
            }
        }
    }
}

fn read_exact_or_eof(r: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "truncated pkt-line length prefix",
            )
            .into());
        }
        filled += n;
    }
    Ok(true)
}

fn parse_hex_len(bytes: &[u8; 4]) -> Result<usize> {
    let s = std::str::from_utf8(bytes).map_err(|_| Error::Remote {
        status: 0,
        message: "pkt-line length is not ASCII hex".into(),
    })?;
    usize::from_str_radix(s, 16).map_err(|_| Error::Remote {
        status: 0,
        message: format!("invalid pkt-line length {s:?}"),
    })
}

/// Encodes a single pkt-line (4-hex-digit length prefix, including itself,
/// followed by the payload). Used by the fetch engine to build the
/// want/have negotiation body (§4.5.2).
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let len = payload.len() + 4;
    let mut out = format!("{len:04x}").into_bytes();
    out.extend_from_slice(payload);
    out
}

/// The flush packet `"0000"`, terminating a whole request.
pub fn flush() -> Vec<u8> {
    b"0000".to_vec()
}

/// The protocol v2 delimiter packet `"0001"`, separating a command's
/// capability lines from its argument lines (§4.5.2) — distinct from a
/// flush-pkt, which ends the request entirely.
pub fn delim() -> Vec<u8> {
    b"0001".to_vec()
}

/// Drains every remaining event from the stream, invoking `on_progress`
/// for sideband-2 lines and writing sideband-1 bytes to `pack_sink`. Used
/// by the fetch response-ingestion path (§4.5.3), which only cares about
/// pack bytes and progress, not individual control lines.
///
/// Flush and delim packets are separators within the response (e.g.
/// between the acknowledgments/packfile sections), not its end — only a
/// closed connection (`None`, true EOF) stops the drain, matching how the
/// response is framed as one HTTP/1.0 body with no keep-alive.
pub fn drain(
    r: &mut impl Read,
    pack_sink: &mut impl std::io::Write,
    mut on_progress: impl FnMut(&[u8]),
) -> Result<()> {
    loop {
        match next_event(r, pack_sink)? {
            None => break,
            Some(PktEvent::Flush) => {}
            Some(PktEvent::Progress(line)) => on_progress(&line),
            Some(PktEvent::Control(_)) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn control_line_round_trips() {
        let line = encode(b"want deadbeef\n");
        let mut c = Cursor::new(line);
        let mut sink = Vec::new();
        let event = next_event(&mut c, &mut sink).unwrap();
        assert_eq!(event, Some(PktEvent::Control(b"want deadbeef\n".to_vec())));
    }

    #[test]
    fn flush_is_reported() {
        let mut c = Cursor::new(flush());
        let mut sink = Vec::new();
        assert_eq!(next_event(&mut c, &mut sink).unwrap(), Some(PktEvent::Flush));
    }

    #[test]
    fn sideband_one_is_teed_to_sink_not_surfaced() {
        let mut stream = Vec::new();
        stream.extend(encode(b"\x01packbytes"));
        stream.extend(flush());
        let mut c = Cursor::new(stream);
        let mut sink = Vec::new();
        let event = next_event(&mut c, &mut sink).unwrap();
        assert_eq!(event, Some(PktEvent::Flush));
        assert_eq!(sink, b"packbytes");
    }

    #[test]
    fn sideband_three_fails_with_remote_error() {
        let mut stream = Vec::new();
        stream.extend(encode(b"\x03remote says no"));
        let mut c = Cursor::new(stream);
        let mut sink = Vec::new();
        let err = next_event(&mut c, &mut sink).unwrap_err();
        assert!(matches!(err, Error::Remote { message, .. } if message == "remote says no"));
    }

    #[test]
    fn drain_skips_interior_delim_without_stopping() {
        let mut stream = Vec::new();
        stream.extend(encode(b"\x01AB"));
        stream.extend(delim());
        stream.extend(encode(b"\x01CD"));
        stream.extend(flush());
        let mut c = Cursor::new(stream);
        let mut sink = Vec::new();
        drain(&mut c, &mut sink, |_| {}).unwrap();
        assert_eq!(sink, b"ABCD");
    }

    #[test]
    fn drain_collects_progress_and_pack_bytes() {
        let mut stream = Vec::new();
        stream.extend(encode(b"\x01AB"));
        stream.extend(encode(b"\x02halfway there\n"));
        stream.extend(encode(b"\x01CD"));
        stream.extend(flush());
        let mut c = Cursor::new(stream);
        let mut sink = Vec::new();
        let mut progress = Vec::new();
        drain(&mut c, &mut sink, |line| progress.push(line.to_vec())).unwrap();
        assert_eq!(sink, b"ABCD");
        assert_eq!(progress, vec![b"halfway there\n".to_vec()]);
    }
}
