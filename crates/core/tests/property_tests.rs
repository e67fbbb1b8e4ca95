//! Property-based tests for the index.
//!
//! These check invariants that must hold for any input:
//! - distance spaces are symmetric, non-negative where defined, and zero on self
//! - element counts agree with label listings after any mutation sequence
//! - search results are sorted and never contain deleted labels

use hnswgraph_core::{IndexConfig, IndexError, LabelFilter, Space, VectorIndex};
use proptest::prelude::*;

prop_compose! {
    fn arb_vector(dim: usize)(vec in prop::collection::vec(-10.0f32..10.0, dim)) -> Vec<f32> {
        vec
    }
}

mod distance_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn l2_non_negative_and_symmetric(a in arb_vector(24), b in arb_vector(24)) {
            let d_ab = Space::L2.distance(&a, &b);
            let d_ba = Space::L2.distance(&b, &a);
            prop_assert!(d_ab >= 0.0);
            prop_assert!((d_ab - d_ba).abs() <= 1e-3 * d_ab.max(1.0));
        }

        #[test]
        fn l2_self_is_zero(a in arb_vector(24)) {
            prop_assert_eq!(Space::L2.distance(&a, &a), 0.0);
        }

        #[test]
        fn cosine_in_range_on_unit_vectors(a in arb_vector(16), b in arb_vector(16)) {
            let mut a = a;
            let mut b = b;
            hnswgraph_core::hnsw::distance::normalize_in_place(&mut a);
            hnswgraph_core::hnsw::distance::normalize_in_place(&mut b);
            let d = Space::Cosine.distance(&a, &b);
            prop_assert!((-1e-4..=2.0 + 1e-4).contains(&d), "cosine distance {}", d);
        }

        #[test]
        fn inner_product_symmetric(a in arb_vector(16), b in arb_vector(16)) {
            let d_ab = Space::InnerProduct.distance(&a, &b);
            let d_ba = Space::InnerProduct.distance(&b, &a);
            prop_assert!((d_ab - d_ba).abs() <= 1e-3 * d_ab.abs().max(1.0));
        }
    }
}

mod index_props {
    use super::*;

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u64, bool),
        Delete(u64),
        Undelete(u64),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0u64..40, any::<bool>()).prop_map(|(l, r)| Op::Insert(l, r)),
            2 => (0u64..40).prop_map(Op::Delete),
            1 => (0u64..40).prop_map(Op::Undelete),
        ]
    }

    fn vector_for(label: u64, salt: usize) -> Vec<f32> {
        vec![label as f32, (salt % 7) as f32, (label % 3) as f32]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(40))]

        #[test]
        fn counts_match_label_listing(
            ops in prop::collection::vec(arb_op(), 1..120),
            reuse in any::<bool>(),
        ) {
            let index = VectorIndex::create_or_load(IndexConfig {
                dimension: 3,
                max_elements: 256,
                allow_replace_deleted: reuse,
                ..Default::default()
            }).unwrap();

            for (i, op) in ops.iter().enumerate() {
                let result = match *op {
                    Op::Insert(label, replace) => index.insert(&vector_for(label, i), label, replace),
                    Op::Delete(label) => index.delete(label),
                    Op::Undelete(label) => index.undelete(label),
                };
                match result {
                    Ok(())
                    | Err(IndexError::DuplicateLabel(_))
                    | Err(IndexError::NotFound(_))
                    | Err(IndexError::AlreadyReused(_)) => {}
                    Err(e) => prop_assert!(false, "unexpected error {e}"),
                }

                let active = index.list_labels(LabelFilter::ActiveOnly);
                prop_assert_eq!(index.current_count() - index.deleted_count(), active.len());
                prop_assert_eq!(index.active_count(), active.len());
                prop_assert!(index.deleted_count() <= index.current_count());
            }

            let active = index.list_labels(LabelFilter::ActiveOnly);
            if !active.is_empty() {
                let k = active.len().min(5);
                let hits = match index.search(&[20.0, 3.0, 1.0], k, None) {
                    Ok(hits) => hits,
                    Err(IndexError::InsufficientResults { found, .. }) => {
                        prop_assert!(found < k);
                        return Ok(());
                    }
                    Err(e) => return Err(TestCaseError::fail(format!("search failed: {e}"))),
                };
                prop_assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
                prop_assert!(hits.iter().all(|h| index.contains(h.label)));
            }
        }
    }
}
