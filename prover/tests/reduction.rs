use ahash::HashMap;
use alloy_primitives::{Address, Bytes, U256};
use gatevm_asm::{HashedNeed, Need, TargetNeed, Value};
use gatevm_prover::{zksync::reduce_needs, ProofPlan};
use proptest::prelude::*;

fn need_strategy() -> impl Strategy<Value = Need> {
    prop_oneof![
        4 => (0u8..4, any::<bool>()).prop_map(|(byte, required)| {
            Need::Target(TargetNeed {
                target: Address::with_last_byte(byte),
                required,
            })
        }),
        8 => (0u64..6).prop_map(|slot| Need::Slot(U256::from(slot))),
        1 => Just(Need::Hashed(HashedNeed {
            hash: Value::from(Bytes::new()),
            value: Value::from(Bytes::from_static(b"supplied")),
        })),
    ]
}

/// Key each need proves, relative to the targets seen before it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    Account(Address),
    Storage(Option<Address>, U256),
}

fn keys(needs: &[Need]) -> Vec<Option<Key>> {
    let mut current = None;
    needs
        .iter()
        .map(|need| match need {
            Need::Target(need) => {
                current = Some(need.target);
                Some(Key::Account(need.target))
            }
            Need::Slot(slot) => Some(Key::Storage(current, *slot)),
            Need::Hashed(_) => None,
        })
        .collect()
}

fn check_plan(needs: &[Need], plan: &ProofPlan) -> Result<(), TestCaseError> {
    prop_assert_eq!(plan.order.len(), needs.len());
    prop_assert!(plan.order.iter().all(|id| *id < plan.len()));

    // ids are handed out in first-use order
    let mut next = 0;
    for id in &plan.order {
        prop_assert!(*id <= next);
        if *id == next {
            next += 1;
        }
    }
    prop_assert_eq!(next, plan.len());
    Ok(())
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(64))]

    #[test]
    fn test_reduction_invariants(needs in prop::collection::vec(need_strategy(), 0..40)) {
        let plan = ProofPlan::reduce(&needs);
        check_plan(&needs, &plan)?;

        let mut ids: HashMap<Key, usize> = HashMap::default();
        for (key, id) in keys(&needs).into_iter().zip(&plan.order) {
            let Some(key) = key else {
                // hashed needs never share
                prop_assert_eq!(plan.order.iter().filter(|x| *x == id).count(), 1);
                continue;
            };
            let key = match key {
                // untargeted slots collapse into the null proof
                Key::Storage(None, _) => Key::Storage(None, U256::ZERO),
                key => key,
            };
            let seen = *ids.entry(key).or_insert(*id);
            prop_assert_eq!(seen, *id);
        }
        // distinct keys never share
        let distinct: std::collections::HashSet<_> = ids.values().collect();
        prop_assert_eq!(distinct.len(), ids.len());
    }

    #[test]
    fn test_storage_only_reduction_invariants(
        needs in prop::collection::vec(need_strategy(), 0..40)
    ) {
        let plan = reduce_needs(&needs);
        check_plan(&needs, &plan)?;
        prop_assert!(plan.buckets.iter().all(|bucket| bucket.account.is_none()));
        prop_assert!(plan.buckets.iter().all(|bucket| bucket.target != Address::ZERO));
    }
}
