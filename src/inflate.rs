//! The bounded, process-wide singleton inflate stream (§4.2, `DecompIo`
//! in the design doc — `DecompIO` in the original Python).
//!
//! Only one `DecompIo` may be alive at a time: the zlib window is the
//! largest single allocation in the system, and holding two breaks on
//! devices with ~100 KB free. The singleton lives in a thread-local slot
//! (the whole client is single-threaded, §5) and every `DecompIo` carries
//! the id it was constructed with; a stale reader that tries to read after
//! a newer one has taken the slot hits the `assert_eq!` below, which is a
//! programming-error abort, not a recoverable `Result`.

use flate2::read::ZlibDecoder;
use std::cell::RefCell;
use std::io::{Read, Seek, SeekFrom};

use crate::error::{Error, Result};

/// Zlib's default window is 32 KiB; this is the contiguous allocation the
/// design doc's `MemoryError` diagnostic refers to.
const WINDOW_BYTES: usize = 32 * 1024;

pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

struct Slot {
    id: u64,
    anchor: u64,
    pos: u64,
    decoder: ZlibDecoder<Box<dyn ReadSeek>>,
}

thread_local! {
    static SLOT: RefCell<Option<Slot>> = RefCell::new(None);
    static NEXT_ID: RefCell<u64> = RefCell::new(0);
}

fn probe_window_allocation() -> std::result::Result<(), ()> {
    let mut probe: Vec<u8> = Vec::new();
    probe.try_reserve_exact(WINDOW_BYTES).map_err(|_| ())
}

/// A single-use handle onto the process-wide inflate singleton.
pub struct DecompIo {
    id: u64,
}

impl DecompIo {
    /// Constructs a new inflate stream reading from `source`'s *current*
    /// position, evicting whatever `DecompIo` was previously live.
    pub fn new(source: Box<dyn ReadSeek>) -> Result<Self> {
        Self::new_inner(source, None)
    }

    fn new_inner(mut source: Box<dyn ReadSeek>, forced_anchor: Option<u64>) -> Result<Self> {
        if probe_window_allocation().is_err() {
            return Err(Error::Memory {
                requested: WINDOW_BYTES,
                free: 0,
            });
        }
        let anchor = match forced_anchor {
            Some(a) => {
                source.seek(SeekFrom::Start(a))?;
                a
            }
            None => source.stream_position()?,
        };
        let id = NEXT_ID.with(|n| {
            let mut n = n.borrow_mut();
            *n += 1;
            *n
        });
        let decoder = ZlibDecoder::new(source);
        SLOT.with(|slot| {
            // Dropping the previous Slot here frees its window.
            *slot.borrow_mut() = Some(Slot {
                id,
                anchor,
                pos: 0,
                decoder,
            });
        });
        Ok(DecompIo { id })
    }

    fn with_slot<R>(&self, f: impl FnOnce(&mut Slot) -> Result<R>) -> Result<R> {
        SLOT.with(|slot| {
            let mut slot = slot.borrow_mut();
            let slot = slot.as_mut().expect("DecompIo slot vanished without a new owner");
            assert_eq!(
                slot.id, self.id,
                "DecompIo used after a newer instance took the singleton (programming error)"
            );
            f(slot)
        })
    }

    /// Reads up to `n` freshly inflated bytes, or fewer at end of stream.
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        self.with_slot(|slot| {
            let mut buf = vec![0u8; n];
            let mut filled = 0;
            while filled < n {
                let read = slot.decoder.read(&mut buf[filled..])?;
                if read == 0 {
                    break;
                }
                filled += read;
            }
            buf.truncate(filled);
            slot.pos += filled as u64;
            Ok(buf)
        })
    }

    /// Reads bytes up to and including the next `\n`, or to EOF.
    pub fn readline(&mut self) -> Result<Vec<u8>> {
        self.with_slot(|slot| {
            let mut out = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                let read = slot.decoder.read(&mut byte)?;
                if read == 0 {
                    break;
                }
                out.push(byte[0]);
                slot.pos += 1;
                if byte[0] == b'\n' {
                    break;
                }
            }
            Ok(out)
        })
    }

    pub fn position(&self) -> u64 {
        self.with_slot(|slot| Ok(slot.pos)).unwrap_or(0)
    }

    /// Random-access emulation over a forward-only stream: a forward seek
    /// just discards bytes; a backward seek rebuilds the decoder from the
    /// anchored source offset and replays forward (§4.2).
    pub fn seek(&mut self, target: u64) -> Result<()> {
        let needs_rebuild = self.with_slot(|slot| Ok(target < slot.pos))?;
        if needs_rebuild {
            self.rebuild()?;
        }
        loop {
            let pos = self.with_slot(|slot| Ok(slot.pos))?;
            if pos >= target {
                break;
            }
            let chunk = std::cmp::min(4096, (target - pos) as usize);
            let got = self.read(chunk)?;
            if got.is_empty() {
                break;
            }
        }
        Ok(())
    }

    fn rebuild(&mut self) -> Result<()> {
        let (anchor, source) = SLOT.with(|slot| {
            let mut slot = slot.borrow_mut();
            let owned = slot.take().expect("DecompIo slot vanished without a new owner");
            assert_eq!(owned.id, self.id, "DecompIo rebuilt after being superseded");
            (owned.anchor, owned.decoder.into_inner())
        });
        *self = Self::new_inner(source, Some(anchor))?;
        Ok(())
    }
}

impl Drop for DecompIo {
    fn drop(&mut self) {
        SLOT.with(|slot| {
            let mut slot = slot.borrow_mut();
            if matches!(slot.as_ref(), Some(s) if s.id == self.id) {
                *slot = None;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::ZlibEncoder, Compression};
    use std::io::{Cursor, Write};

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn read_and_readline_roundtrip() {
        let payload = zlib(b"tree abc\nauthor me\n\nmessage body");
        let mut d = DecompIo::new(Box::new(Cursor::new(payload))).unwrap();
        assert_eq!(d.readline().unwrap(), b"tree abc\n");
        assert_eq!(d.readline().unwrap(), b"author me\n");
        assert_eq!(d.readline().unwrap(), b"\n");
        assert_eq!(d.read(7).unwrap(), b"message");
    }

    #[test]
    fn seek_backward_rebuilds_and_forward_discards() {
        let payload = zlib(b"0123456789abcdefghij");
        let mut d = DecompIo::new(Box::new(Cursor::new(payload))).unwrap();
        assert_eq!(d.read(5).unwrap(), b"01234");
        d.seek(2).unwrap();
        assert_eq!(d.read(3).unwrap(), b"234");
        d.seek(10).unwrap();
        assert_eq!(d.read(3).unwrap(), b"abc");
    }

    #[test]
    fn constructing_a_new_stream_evicts_the_old_one() {
        let payload_a = zlib(b"aaaaaaaaaa");
        let payload_b = zlib(b"bbbbbbbbbb");
        let mut a = DecompIo::new(Box::new(Cursor::new(payload_a))).unwrap();
        let _b = DecompIo::new(Box::new(Cursor::new(payload_b))).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| a.read(1)));
        assert!(result.is_err(), "stale reader must panic instead of reading garbage");
    }
}
