//! The fetch engine (§4.5): ref discovery, protocol v2 want/have
//! negotiation, pack ingestion, and pack parsing into the idx DB.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::crypto::DeviceKey;
use crate::db::{ConfigDb, IndexDb, IndexEntry, RefsDb};
use crate::error::{Error, Result};
use crate::object;
use crate::pack::PackObjectReader;
use crate::pktline::{self, PktEvent};
use crate::transport::{self, RemoteUrl};

/// `GET info/refs` (§4.5.1): consumes the advertisement and rewrites the
/// refs DB wholesale, since the client treats each advertisement as
/// authoritative.
pub fn discover_refs(
    url: &RemoteUrl,
    config: &ConfigDb,
    device_key: &impl DeviceKey,
    refs: &mut RefsDb,
) -> Result<()> {
    let mut response = transport::get_info_refs(url, config, device_key)?;
    refs.clear();
    // The "# service=..." marker line is followed by a flush before the
    // actual ref advertisement; flush/delim packets only separate sections
    // here, so only EOF (a closed connection) ends the loop.
    loop {
        let mut sink = std::io::sink();
        match pktline::next_event(&mut response, &mut sink)? {
            None => break,
            Some(PktEvent::Flush) => {}
            Some(PktEvent::Progress(_)) => {}
            Some(PktEvent::Control(line)) => {
                if line.starts_with(b"#") {
                    continue;
                }
                let line = match line.iter().position(|&b| b == 0) {
                    Some(nul) => &line[..nul],
                    None => &line[..],
                };
                let line = strip_trailing_newline(line);
                let (rev, name) = split_once(line, b' ').ok_or_else(|| Error::Remote {
                    status: 0,
                    message: format!("malformed ref advertisement line: {line:?}"),
                })?;
                let rev = std::str::from_utf8(rev).map_err(|_| Error::Remote {
                    status: 0,
                    message: "ref advertisement sha is not ASCII".into(),
                })?;
                refs.put(name, object::from_hex(rev)?);
            }
        }
    }
    Ok(())
}

fn strip_trailing_newline(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}

fn split_once(haystack: &[u8], needle: u8) -> Option<(&[u8], &[u8])> {
    let pos = haystack.iter().position(|&b| b == needle)?;
    Some((&haystack[..pos], &haystack[pos + 1..]))
}

fn existing_pack_ids(git_dir: &Path) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(git_dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(stem) = name.strip_suffix(".pack") {
                if let Ok(id) = stem.parse::<u64>() {
                    ids.push(id);
                }
            }
        }
    }
    Ok(ids)
}

fn pack_path(git_dir: &Path, pack_id: u64) -> PathBuf {
    git_dir.join(format!("{pack_id}.pack"))
}

/// Builds the protocol v2 `command=fetch` body (§4.5.2).
fn build_fetch_body(target: [u8; 20], haves: &[[u8; 20]], shallow: bool, quiet: bool) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend(pktline::encode(b"command=fetch"));
    body.extend(pktline::encode(b"agent=ygit/0.1"));
    body.extend(pktline::encode(b"object-format=sha1"));
    body.extend(pktline::delim());
    body.extend(pktline::encode(b"ofs-delta"));
    if quiet {
        body.extend(pktline::encode(b"no-progress"));
        body.extend(pktline::encode(b"include-tag"));
    }
    if shallow {
        body.extend(pktline::encode(b"deepen 1"));
    }
    body.extend(pktline::encode(format!("want {}\n", object::to_hex(&target)).as_bytes()));
    for have in haves {
        body.extend(pktline::encode(format!("have {}\n", object::to_hex(have)).as_bytes()));
    }
    body.extend(pktline::encode(b"done\n"));
    body.extend(pktline::flush());
    body
}

/// Runs one fetch for `target` (§4.5.2-4.5.4). Returns whether any new
/// objects were received; `false` covers both "already present" and
/// "empty remote" (§4.5.5).
pub fn fetch(
    git_dir: &Path,
    url: &RemoteUrl,
    config: &ConfigDb,
    device_key: &impl DeviceKey,
    idx: &mut IndexDb,
    target: Option<[u8; 20]>,
    shallow: bool,
    quiet: bool,
) -> Result<bool> {
    let target = match target {
        Some(t) => t,
        None => {
            log::info!("fetched an empty repo");
            return Ok(false);
        }
    };
    if idx.contains(&target) {
        log::info!("up to date!");
        return Ok(false);
    }

    let haves = idx.oids();
    let body = build_fetch_body(target, &haves, shallow, quiet);
    let mut response = transport::post_upload_pack(url, config, device_key, &body)?;

    let pack_id = existing_pack_ids(git_dir)?.into_iter().max().unwrap_or(0) + 1;
    let path = pack_path(git_dir, pack_id);
    let mut received = 0u64;
    {
        let file = OpenOptions::new().write(true).create(true).truncate(true).open(&path)?;
        let mut sink = BufWriter::new(CountingWriter {
            inner: file,
            count: &mut received,
        });
        pktline::drain(&mut response, &mut sink, |line| {
            if line.first() == Some(&0x02) {
                log::info!("{}", String::from_utf8_lossy(&line[1..]).trim_end());
            }
        })?;
        sink.flush()?;
    }

    if received == 0 {
        fs::remove_file(&path)?;
        return Ok(false);
    }

    let had_new = parse_pack_into_index(&path, pack_id, idx)?;
    idx.flush()?;
    Ok(had_new)
}

struct CountingWriter<'a, W> {
    inner: W,
    count: &'a mut u64,
}

impl<'a, W: Write> Write for CountingWriter<'a, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        *self.count += n as u64;
        Ok(n)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Pack parsing (§4.5.4): walks every object header in the new pack,
/// computing its digest and recording its locator in the idx DB.
fn parse_pack_into_index(path: &Path, pack_id: u64, idx: &mut IndexDb) -> Result<bool> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 4];
    use std::io::Read as _;
    file.read_exact(&mut magic)?;
    if &magic != b"PACK" {
        return Err(Error::Remote {
            status: 0,
            message: format!("{path:?} does not start with PACK magic"),
        });
    }
    let mut version_and_count = [0u8; 8];
    file.read_exact(&mut version_and_count)?;
    let count = u32::from_be_bytes(version_and_count[4..8].try_into().unwrap());

    let mut had_new = false;
    let mut header_start = 12u64;
    for _ in 0..count {
        let mut reader = PackObjectReader::open(path, header_start)?;
        let kind_wire = reader.wire_kind().to_wire();
        assert_ne!(kind_wire, 0, "pack object must not have kind 0");
        let inflate_start = reader.inflate_start();
        let size = reader.resolved_size()?;
        let sha = reader.digest()?;
        if !idx.contains(&sha) {
            had_new = true;
        }
        idx.put(
            &sha,
            IndexEntry {
                pack_id,
                kind_wire,
                inflate_start,
                inflated_size: size,
                header_start,
            },
        );
        header_start = reader.next_header_start()?;
    }
    Ok(had_new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_body_orders_sections_per_protocol_v2() {
        let target = [0x11u8; 20];
        let body = build_fetch_body(target, &[], true, true);
        let text = String::from_utf8(
            body.iter()
                .filter(|&&b| b != 0)
                .cloned()
                .collect::<Vec<u8>>(),
        )
        .unwrap();
        assert!(text.contains("command=fetch"));
        assert!(text.contains("ofs-delta"));
        assert!(text.contains("no-progress"));
        assert!(text.contains("deepen 1"));
        assert!(text.contains(&format!("want {}", object::to_hex(&target))));
        assert!(text.contains("done"));
    }

    #[test]
    fn fetch_body_lists_haves_excluding_none_given() {
        let target = [0x22u8; 20];
        let haves = vec![[0x33u8; 20], [0x44u8; 20]];
        let body = build_fetch_body(target, &haves, false, false);
        let text = String::from_utf8_lossy(&body).into_owned();
        assert!(text.contains(&format!("have {}", object::to_hex(&haves[0]))));
        assert!(text.contains(&format!("have {}", object::to_hex(&haves[1]))));
    }
}
