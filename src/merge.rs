//! Reassembly of segment bytes into one artifact

use crate::error::{Error, Result};
use crate::pool::SegmentResult;
use bytes::{Bytes, BytesMut};

/// Concatenate segment bytes in ascending index order
///
/// The output buffer is allocated once at its final size. Fails with
/// [`Error::IncompleteData`] listing every index that has no bytes.
pub fn merge(results: &[SegmentResult]) -> Result<Bytes> {
    let mut ordered: Vec<&SegmentResult> = results.iter().collect();
    ordered.sort_by_key(|r| r.index);

    let missing: Vec<usize> = ordered
        .iter()
        .filter(|r| !r.is_ok())
        .map(|r| r.index)
        .collect();
    if !missing.is_empty() {
        return Err(Error::IncompleteData { missing });
    }

    let total: usize = ordered
        .iter()
        .filter_map(|r| r.bytes())
        .map(Bytes::len)
        .sum();

    let mut buffer = BytesMut::with_capacity(total);
    for bytes in ordered.iter().filter_map(|r| r.bytes()) {
        buffer.extend_from_slice(bytes);
    }

    tracing::debug!(segments = ordered.len(), bytes = total, "Merged segments");
    Ok(buffer.freeze())
}
