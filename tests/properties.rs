use n64w::{pack, validate, ManifestVersion, PackOptions, Segment, ValidateOptions, ValidationError};
use proptest::prelude::*;

fn segments_strategy() -> impl Strategy<Value = Vec<Segment>> {
    prop::collection::vec(
        ("[a-z_.0-9]{1,24}", prop::collection::vec(any::<u8>(), 0..300)),
        0..12,
    )
    .prop_map(|v| v.into_iter().map(|(name, bytes)| Segment::new(name, bytes)).collect())
}

fn align_strategy() -> impl Strategy<Value = u16> {
    (0u32..=8).prop_map(|shift| 1u16 << shift)
}

proptest! {
    #[test]
    fn packed_pairs_always_validate(segs in segments_strategy(), align in align_strategy()) {
        let opts = PackOptions { align, version: ManifestVersion::V2 };
        let (blob, man) = pack(&segs, &opts).unwrap().into_bytes().unwrap();
        prop_assert_eq!(validate(&blob, &man, &ValidateOptions::default()).unwrap(), segs.len());
    }

    #[test]
    fn offsets_are_aligned_ordered_and_disjoint(segs in segments_strategy(), align in align_strategy()) {
        let opts = PackOptions { align, version: ManifestVersion::V1 };
        let packed = pack(&segs, &opts).unwrap();
        let entries: Vec<_> = packed.manifest.entries().collect();
        prop_assert_eq!(entries.len(), segs.len());
        for (e, s) in entries.iter().zip(&segs) {
            prop_assert_eq!(e.entry.offset % align as u32, 0);
            prop_assert_eq!(&e.entry.name, &s.name);
            prop_assert_eq!(e.entry.slice(&packed.blob).unwrap(), &s.bytes[..]);
        }
        for pair in entries.windows(2) {
            prop_assert!(pair[0].entry.end() <= pair[1].entry.offset as u64);
        }
        let expected_len = entries.last().map(|e| e.entry.end()).unwrap_or(0);
        prop_assert_eq!(packed.blob.len() as u64, expected_len);
    }

    #[test]
    fn any_payload_bit_flip_is_caught(
        segs in segments_strategy(),
        pick in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let packed = pack(&segs, &PackOptions::default()).unwrap();
        let payload: Vec<(usize, u64)> = packed
            .manifest
            .entries()
            .flat_map(|e| e.entry.byte_range().map(move |b| (e.index, b)))
            .collect();
        prop_assume!(!payload.is_empty());
        let (index, at) = payload[pick.index(payload.len())];

        let mut blob = packed.blob.clone();
        blob[at as usize] ^= 1 << bit;
        let man = packed.manifest_bytes().unwrap();
        let err = validate(&blob, &man, &ValidateOptions::default()).unwrap_err();
        let matched = matches!(err, ValidationError::ChecksumMismatch { index: i, .. } if i == index);
        prop_assert!(matched);
    }

    #[test]
    fn decoder_never_panics_on_garbage(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let _ = validate(&[0u8; 256], &bytes, &ValidateOptions::default());
    }
}
