//! Bounded-prefix content fingerprint.
//!
//! Only the first [`FINGERPRINT_PREFIX_BYTES`] of a file are hashed. Two
//! files that differ only beyond that offset get the same fingerprint, and
//! resume decisions rely on exactly this behaviour.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

pub const FINGERPRINT_PREFIX_BYTES: u64 = 1 << 20;

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Hex SHA-256 of the first [`FINGERPRINT_PREFIX_BYTES`] of `path`.
pub fn fingerprint(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    fingerprint_reader(file)
}

pub fn fingerprint_reader<R: Read>(reader: R) -> io::Result<String> {
    let mut limited = reader.take(FINGERPRINT_PREFIX_BYTES);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; READ_CHUNK_BYTES];

    loop {
        let n = match limited.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
