//! Session outputs.
//!
//! Everything a session exports lands under `<output>/<chain>/`:
//!
//! ```text
//! <output>/<chain>/
//! |-- output.json                  # key-value map written by generators
//! |-- cospends.txt                 # one co-spend cluster of key indices per line
//! \-- regtest/blocks/blk00000.dat  # first block file, zero padding trimmed
//! ```

use crate::chain::ChainKind;
use crate::cospend::CospendTracker;
use crate::error::SessionError;
use crate::KvMap;
use log::{debug, info};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Size of the frames the block file is scanned in.
pub const FRAME_SIZE: usize = 16;

/// Consecutive all-zero frames after which the rest of the file is padding.
pub const ZERO_FRAME_CAP: usize = 16;

pub const BLOCK_FILE: &str = "blk00000.dat";
pub const OUTPUT_FILE: &str = "output.json";
pub const COSPENDS_FILE: &str = "cospends.txt";

/// Block files relative to a node data directory.
pub fn blocks_dir(root: &Path) -> PathBuf {
    root.join("regtest").join("blocks")
}

/// Copy `src` to `dst`, dropping everything after the first run of
/// [`ZERO_FRAME_CAP`] all-zero frames.
///
/// The zero run that triggers the cap is kept, so truncating an already
/// truncated file copies it unchanged. Returns the bytes written.
pub fn copy_truncated<R: Read, W: Write>(src: R, dst: &mut W) -> io::Result<u64> {
    let mut reader = BufReader::new(src);
    let mut frame = [0u8; FRAME_SIZE];
    let mut zero_run = 0;
    let mut written = 0u64;

    while zero_run < ZERO_FRAME_CAP {
        let len = read_frame(&mut reader, &mut frame)?;
        if len == 0 {
            break;
        }
        let bytes = &frame[..len];
        if len == FRAME_SIZE && bytes.iter().all(|&b| b == 0) {
            zero_run += 1;
        } else {
            zero_run = 0;
        }
        dst.write_all(bytes)?;
        written += len as u64;
    }
    Ok(written)
}

/// Fill `frame` as far as the reader allows; short only at end of input.
fn read_frame<R: Read>(reader: &mut R, frame: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < frame.len() {
        match reader.read(&mut frame[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Writes one session's outputs into `<output>/<chain>/`.
#[derive(Debug, Clone)]
pub struct SessionExporter {
    chain_dir: PathBuf,
}

impl SessionExporter {
    pub fn new(output_dir: &Path, chain: ChainKind) -> Self {
        SessionExporter {
            chain_dir: output_dir.join(chain.as_str()),
        }
    }

    pub fn chain_dir(&self) -> &Path {
        &self.chain_dir
    }

    /// Create `<output>/<chain>/` if needed.
    pub fn prepare_output_dir(&self) -> Result<&Path, SessionError> {
        fs::create_dir_all(&self.chain_dir).map_err(|e| {
            SessionError::io(format!("Failed to create {}", self.chain_dir.display()), e)
        })?;
        Ok(&self.chain_dir)
    }

    /// Copy the node's first block file into the output tree.
    ///
    /// With `truncate`, trailing pre-allocated zero space is dropped so
    /// block parsers do not read into it.
    pub fn copy_tail_block_file(&self, node_dir: &Path, truncate: bool) -> Result<PathBuf, SessionError> {
        let source = blocks_dir(node_dir).join(BLOCK_FILE);
        let dest_dir = blocks_dir(&self.chain_dir);
        info!("Copying {} to {}", BLOCK_FILE, dest_dir.display());
        fs::create_dir_all(&dest_dir)
            .map_err(|e| SessionError::io(format!("Failed to create {}", dest_dir.display()), e))?;
        let dest = dest_dir.join(BLOCK_FILE);

        if truncate {
            let input = File::open(&source)
                .map_err(|e| SessionError::io(format!("Failed to open {}", source.display()), e))?;
            let output = File::create(&dest)
                .map_err(|e| SessionError::io(format!("Failed to create {}", dest.display()), e))?;
            let mut output = BufWriter::new(output);
            let written = copy_truncated(input, &mut output)
                .and_then(|n| output.flush().map(|_| n))
                .map_err(|e| SessionError::io(format!("Failed to copy {}", source.display()), e))?;
            debug!("Wrote {} bytes of block data", written);
        } else {
            fs::copy(&source, &dest)
                .map_err(|e| SessionError::io(format!("Failed to copy {}", source.display()), e))?;
        }
        Ok(dest)
    }

    /// Dump the key-value map as JSON.
    pub fn persist_outputs(&self, kv: &KvMap) -> Result<PathBuf, SessionError> {
        info!("Writing hashes to file {}", OUTPUT_FILE);
        debug!("{:?}", kv);
        let path = self.prepare_output_dir()?.join(OUTPUT_FILE);

        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        kv.serialize(&mut ser)?;

        fs::write(&path, buf)
            .map_err(|e| SessionError::io(format!("Failed to write {}", path.display()), e))?;
        Ok(path)
    }

    /// One comma-joined line per co-spend cluster.
    pub fn persist_cospends(&self, cospends: &CospendTracker) -> Result<PathBuf, SessionError> {
        info!("Writing cospent addresses to file {}", COSPENDS_FILE);
        let path = self.prepare_output_dir()?.join(COSPENDS_FILE);

        let mut contents = String::new();
        for cluster in cospends.all() {
            let line: Vec<String> = cluster.iter().map(u64::to_string).collect();
            contents.push_str(&line.join(","));
            contents.push('\n');
        }

        fs::write(&path, contents)
            .map_err(|e| SessionError::io(format!("Failed to write {}", path.display()), e))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn truncate(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        copy_truncated(data, &mut out).unwrap();
        out
    }

    #[test]
    fn test_trailing_padding_is_cut_after_cap() {
        let mut data = vec![0xf9, 0xbe, 0xb4, 0xd9];
        data.extend(std::iter::repeat(0xab).take(60));
        let payload_len = data.len();
        data.extend(std::iter::repeat(0).take(FRAME_SIZE * 1000));

        let out = truncate(&data);
        assert_eq!(out.len(), payload_len + FRAME_SIZE * ZERO_FRAME_CAP);
        assert_eq!(&out[..payload_len], &data[..payload_len]);
    }

    #[test]
    fn test_short_zero_runs_are_kept() {
        let mut data = vec![1u8; FRAME_SIZE];
        data.extend(vec![0u8; FRAME_SIZE * (ZERO_FRAME_CAP - 1)]);
        data.extend(vec![2u8; FRAME_SIZE]);

        assert_eq!(truncate(&data), data);
    }

    #[test]
    fn test_truncation_is_idempotent() {
        let mut data = vec![7u8; 100];
        data.extend(vec![0u8; FRAME_SIZE * 40]);
        data.extend(vec![9u8; 5]);

        let once = truncate(&data);
        let twice = truncate(&once);
        assert_eq!(once, twice);
        assert!(once.len() < data.len());
    }

    #[test]
    fn test_file_without_padding_is_copied_whole() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1001).collect();
        assert_eq!(truncate(&data), data);
        assert!(truncate(&[]).is_empty());
    }

    #[test]
    fn test_copy_tail_block_file() {
        let node = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::create_dir_all(blocks_dir(node.path())).unwrap();
        let mut data = vec![5u8; 32];
        data.extend(vec![0u8; FRAME_SIZE * 64]);
        fs::write(blocks_dir(node.path()).join(BLOCK_FILE), &data).unwrap();

        let exporter = SessionExporter::new(out.path(), ChainKind::Btc);
        let dest = exporter.copy_tail_block_file(node.path(), true).unwrap();
        assert_eq!(dest, out.path().join("btc/regtest/blocks/blk00000.dat"));
        assert_eq!(fs::read(&dest).unwrap().len(), 32 + FRAME_SIZE * ZERO_FRAME_CAP);

        let dest = exporter.copy_tail_block_file(node.path(), false).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), data);
    }

    #[test]
    fn test_missing_block_file_is_io_error() {
        let node = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let exporter = SessionExporter::new(out.path(), ChainKind::Ltc);
        assert!(matches!(
            exporter.copy_tail_block_file(node.path(), true),
            Err(SessionError::Io { .. })
        ));
    }

    #[test]
    fn test_persist_outputs_and_cospends() {
        let out = tempfile::tempdir().unwrap();
        let exporter = SessionExporter::new(out.path(), ChainKind::Bch);

        let mut kv = KvMap::new();
        kv.insert("p2pkh_address_count".to_string(), json!(2));
        kv.insert("final_block_hash".to_string(), json!("00ff"));
        let path = exporter.persist_outputs(&kv).unwrap();
        assert_eq!(path, out.path().join("bch").join("output.json"));
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n    \"p2pkh_address_count\": 2"));
        let parsed: KvMap = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, kv);

        let mut cospends = CospendTracker::new();
        cospends.union(20_001, 20_000);
        cospends.union(30_000, 9);
        let path = exporter.persist_cospends(&cospends).unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "9,30000\n20000,20001\n");
    }

    #[test]
    fn test_empty_cospends_file_exists() {
        let out = tempfile::tempdir().unwrap();
        let exporter = SessionExporter::new(out.path(), ChainKind::Btc);
        let path = exporter.persist_cospends(&CospendTracker::new()).unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "");
    }
}
