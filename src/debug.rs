//! Deterministic debug segments for exercising downstream readers without a
//! real model export.

use crate::pack::Segment;

pub const DEFAULT_CHUNKS: usize = 8;
/// 64 KiB per chunk; 512 KiB total with the default chunk count.
pub const DEFAULT_CHUNK_LEN: usize = 64 * 1024;

/// `chunks` segments named `debug_chunk_{i}`; byte `j` of chunk `i` is
/// `(i * 31 + j) & 0xFF`.
pub fn debug_segments(chunks: usize, chunk_len: usize) -> Vec<Segment> {
    (0..chunks)
        .map(|i| {
            let bytes = (0..chunk_len).map(|j| (i.wrapping_mul(31).wrapping_add(j) & 0xFF) as u8).collect::<Vec<u8>>();
            Segment::new(format!("debug_chunk_{i}"), bytes)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_and_names() {
        let segs = debug_segments(3, 300);
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[2].name, "debug_chunk_2");
        assert_eq!(segs[0].bytes[0], 0);
        assert_eq!(segs[0].bytes[255], 255);
        assert_eq!(segs[0].bytes[256], 0);
        assert_eq!(segs[1].bytes[0], 31);
        assert_eq!(segs[2].bytes[1], 63);
        assert!(segs.iter().all(|s| s.bytes.len() == 300));
    }

    #[test]
    fn zero_chunks() {
        assert!(debug_segments(0, 16).is_empty());
    }
}
