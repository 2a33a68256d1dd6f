//! Multi-file payloads.
//!
//! A job transfers one blob: its files concatenated in metadata order.

use printlink_protocol::FileMetadata;
use tracing::debug;

use crate::TransferError;
use crate::frame::checksum_bytes;

/// Concatenates file contents into a single payload.
pub fn bundle_files<B: AsRef<[u8]>>(parts: &[B]) -> Vec<u8> {
    let total = parts.iter().map(|p| p.as_ref().len()).sum();
    let mut blob = Vec::with_capacity(total);
    for part in parts {
        blob.extend_from_slice(part.as_ref());
    }
    blob
}

/// Splits a received payload back into files by their declared sizes.
///
/// Files carrying a checksum are verified.
pub fn split_bundle(
    blob: &[u8],
    files: &[FileMetadata],
) -> Result<Vec<Vec<u8>>, TransferError> {
    let actual = blob.len() as u64;
    let expected = files
        .iter()
        .try_fold(0u64, |acc, f| acc.checked_add(f.size))
        .ok_or(TransferError::SizeMismatch {
            expected: u64::MAX,
            actual,
        })?;
    if expected != actual {
        return Err(TransferError::SizeMismatch { expected, actual });
    }

    let mut offset = 0usize;
    let mut parts = Vec::with_capacity(files.len());
    for file in files {
        let end = usize::try_from(file.size)
            .ok()
            .and_then(|size| offset.checked_add(size))
            .filter(|end| *end <= blob.len())
            .ok_or(TransferError::SizeMismatch { expected, actual })?;
        let part = &blob[offset..end];
        if let Some(checksum) = &file.checksum {
            if !checksum.eq_ignore_ascii_case(&checksum_bytes(part)) {
                return Err(TransferError::ChecksumMismatch(file.name.clone()));
            }
            debug!(file = %file.name, "checksum verified");
        }
        parts.push(part.to_vec());
        offset = end;
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use printlink_protocol::PrintSpec;

    fn meta(name: &str, data: &[u8], checksum: bool) -> FileMetadata {
        FileMetadata {
            name: name.into(),
            size: data.len() as u64,
            mime_type: None,
            checksum: checksum.then(|| checksum_bytes(data)),
            specs: PrintSpec::default(),
        }
    }

    #[test]
    fn split_restores_files() {
        let a = b"first document".to_vec();
        let b = Vec::new();
        let c = vec![9u8; 40_000];
        let blob = bundle_files(&[&a, &b, &c]);
        let files = [meta("a.pdf", &a, true), meta("b.pdf", &b, false), meta("c.png", &c, true)];

        let parts = split_bundle(&blob, &files).unwrap();
        assert_eq!(parts, vec![a, b, c]);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let files = [meta("a.pdf", b"abc", false)];
        assert!(matches!(
            split_bundle(b"ab", &files),
            Err(TransferError::SizeMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn overflowing_sizes_are_a_mismatch() {
        let mut huge = meta("a.pdf", b"", false);
        huge.size = u64::MAX;
        let one = meta("b.pdf", b"x", false);
        assert!(matches!(
            split_bundle(&[], &[huge.clone(), one]),
            Err(TransferError::SizeMismatch { actual: 0, .. })
        ));
        assert!(matches!(
            split_bundle(b"x", &[huge]),
            Err(TransferError::SizeMismatch { expected, actual: 1 }) if expected == u64::MAX
        ));
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let mut file = meta("a.pdf", b"abc", true);
        file.checksum = Some(checksum_bytes(b"abd"));
        assert!(matches!(
            split_bundle(b"abc", &[file]),
            Err(TransferError::ChecksumMismatch(name)) if name == "a.pdf"
        ));
    }
}
