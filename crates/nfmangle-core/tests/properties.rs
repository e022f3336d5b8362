//! Property-based tests for rewriting and re-serialization

use nfmangle_core::packet::checksum::{verify_ipv4_header, verify_tcp_ipv4};
use nfmangle_core::packet::PacketBuilder;
use nfmangle_core::report::{diff, DiffSpan};
use nfmangle_core::{
    reserialize, DecodedPacket, Engine, MatchRule, RawPacket, RewriteResult, RuleSet, Verdict,
};
use proptest::prelude::*;
use std::net::Ipv4Addr;

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn count(haystack: &[u8], needle: &[u8]) -> usize {
    MatchRule::new(needle, Vec::<u8>::new()).count_matches(haystack)
}

proptest! {
    #[test]
    fn prop_decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..200)) {
        let _ = DecodedPacket::decode(&data);
    }

    #[test]
    fn prop_unchanged_is_byte_identical(payload in "[a-z ]{0,64}") {
        // Pattern contains a digit, so it never occurs in the payload
        let engine = Engine::new(RuleSet::single("magic 1", "x"));
        let data = PacketBuilder::tcp_v4().payload(payload.as_bytes()).build();
        let raw = RawPacket::new(1, data.clone());
        prop_assert_eq!(engine.process(&raw), Verdict::Accept(data.into()));
    }

    #[test]
    fn prop_replace_all_counts(
        chunks in proptest::collection::vec("[a-z]{0,8}", 1..6),
    ) {
        let pattern = b"XY".as_slice();
        let replacement = b"Q".as_slice();
        let payload = chunks.join("XY").into_bytes();
        let k = chunks.len() - 1;

        let result = RuleSet::single(pattern, replacement).apply(Some(payload.as_slice()));
        if k == 0 {
            prop_assert_eq!(result, RewriteResult::Unchanged);
        } else {
            let RewriteResult::Rewritten(out) = result else {
                return Err(TestCaseError::fail("expected rewrite"));
            };
            prop_assert_eq!(count(&out, replacement), k);
            prop_assert!(!contains(&out, pattern));
            prop_assert_eq!(out.len(), payload.len() - k);
        }
    }

    #[test]
    fn prop_reserialized_checksums_valid(
        src in any::<[u8; 4]>(),
        dst in any::<[u8; 4]>(),
        payload in proptest::collection::vec(any::<u8>(), 0..300),
        replacement in proptest::collection::vec(any::<u8>(), 0..300),
    ) {
        let data = PacketBuilder::tcp_v4()
            .src_ip(src)
            .dst_ip(dst)
            .payload(&payload)
            .build();
        let packet = DecodedPacket::decode(&data).unwrap();
        let out = reserialize(&packet, &replacement).unwrap();

        prop_assert_eq!(out.len(), 40 + replacement.len());
        prop_assert!(verify_ipv4_header(&out[..20]));
        prop_assert!(verify_tcp_ipv4(Ipv4Addr::from(src), Ipv4Addr::from(dst), &out[20..]));
    }

    #[test]
    fn prop_diff_reconstructs_both_sides(
        old in proptest::collection::vec(0u8..4, 0..40),
        new in proptest::collection::vec(0u8..4, 0..40),
    ) {
        let spans = diff(&old, &new);
        let mut left = Vec::new();
        let mut right = Vec::new();
        for span in &spans {
            match span {
                DiffSpan::Common(b) => {
                    left.extend_from_slice(b);
                    right.extend_from_slice(b);
                }
                DiffSpan::Removed(b) => left.extend_from_slice(b),
                DiffSpan::Inserted(b) => right.extend_from_slice(b),
            }
        }
        prop_assert_eq!(left, old);
        prop_assert_eq!(right, new);
    }
}
