//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data that maintains
//! required invariants (well-formed doc IDs, valid rev-ID chains,
//! serializable bodies).

use proptest::prelude::*;
use serde_json::Value;
use tidedb_core::{Body, RevId};

/// Strategy for generating valid document IDs.
pub fn doc_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,15}").expect("invalid regex")
}

/// Strategy for generating small JSON object bodies.
pub fn body_strategy() -> impl Strategy<Value = Body> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-z]{1,8}").expect("invalid regex"),
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            prop::string::string_regex("[ -~]{0,12}")
                .expect("invalid regex")
                .prop_map(Value::from),
        ],
        0..5,
    )
    .prop_map(|entries| entries.into_iter().collect())
}

/// Strategy for generating a hex digest token of a rev ID.
pub fn digest_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[0-9a-f]{8,32}").expect("invalid regex")
}

/// Strategy for generating a well-formed revision-history chain, newest
/// first: generations decrement by one down to 1 and every digest is
/// distinct from its neighbors.
pub fn rev_chain_strategy(max_len: usize) -> impl Strategy<Value = Vec<RevId>> {
    prop::collection::vec(digest_strategy(), 1..=max_len).prop_map(|digests| {
        let len = digests.len();
        digests
            .into_iter()
            .enumerate()
            .map(|(idx, digest)| {
                let generation = len - idx;
                format!("{generation}-{digest}")
                    .parse()
                    .expect("generated rev ID must parse")
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn doc_ids_are_never_empty(id in doc_id_strategy()) {
            prop_assert!(!id.is_empty());
        }

        #[test]
        fn bodies_serialize(body in body_strategy()) {
            prop_assert!(serde_json::to_vec(&body).is_ok());
        }

        #[test]
        fn chains_are_well_formed(chain in rev_chain_strategy(6)) {
            prop_assert!(!chain.is_empty());
            for (idx, rev) in chain.iter().enumerate() {
                prop_assert_eq!(rev.generation() as usize, chain.len() - idx);
            }
            prop_assert_eq!(chain.last().unwrap().generation(), 1);
        }
    }
}
