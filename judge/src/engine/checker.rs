//! Checksum based output verification.
//!
//! Verification is strict-exact: trailing whitespace is the only judged
//! insignificant content, every other byte counts. Tolerant comparison is a
//! special judge's job.
//!

use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::Result;

/// Compare the produced output file against the expected checksum. Returns
/// the produced output's checksum and whether it matched. The file is read
/// exactly once.
pub fn compare<P>(output_file: P, expected_checksum: &str) -> Result<(String, bool)>
    where P: AsRef<Path> {
    let content = fs::read(output_file)?;
    let actual_checksum = checksum(&content);
    let matched = actual_checksum == expected_checksum;
    Ok((actual_checksum, matched))
}

/// Compute the lowercase hex checksum of the given output content with
/// trailing whitespace stripped. Catalog authors use the same function to
/// produce the expected checksums.
pub fn checksum(content: &[u8]) -> String {
    let stripped = strip_trailing_whitespace(content);
    hex::encode(Sha256::digest(stripped))
}

fn strip_trailing_whitespace(content: &[u8]) -> &[u8] {
    let end = content.iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|pos| pos + 1)
        .unwrap_or(0);
    &content[..end]
}
