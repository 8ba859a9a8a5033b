//! Property-based tests for read routing.
//!
//! Random replica counts, distance scores (with ties) and sets of failing
//! replicas. Every attempt completes immediately; only the ordering rules
//! are under test.

use std::collections::HashSet;

use proptest::prelude::*;
use tabletrpc::error::RpcError;
use tabletrpc::observability::RouteOperation;
use tabletrpc::routing::{ByDistance, LocationList, ReplicaLocation, RouteOptions, route};
use tabletrpc::types::{Address, RangeDescriptor, RowKeyRange};

/// Distance scores plus, per replica, whether it fails when tried.
fn arb_replicas() -> impl Strategy<Value = Vec<(u64, bool)>> {
    prop::collection::vec((0u64..6, any::<bool>()), 1..=8)
}

fn build(replicas: &[(u64, bool)]) -> (LocationList, HashSet<Address>) {
    let mut failing = HashSet::new();
    let locations = replicas
        .iter()
        .enumerate()
        .map(|(i, (score, fails))| {
            let address = Address::new(format!("r{}", i), 2600);
            if *fails {
                failing.insert(address.clone());
            }
            ReplicaLocation::new(address, *score)
        })
        .collect();
    (
        LocationList::new(RangeDescriptor::new(9, RowKeyRange::whole()), locations),
        failing,
    )
}

/// Addresses in stable ascending-score order.
fn distance_order(list: &LocationList) -> Vec<Address> {
    let mut entries: Vec<_> = list.locations().to_vec();
    entries.sort_by_key(|l| l.distance_score);
    entries.into_iter().map(|l| l.address).collect()
}

fn run(list: &LocationList, failing: &HashSet<Address>) -> tabletrpc::routing::RouteOutcome<Address> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    runtime.block_on(route(
        RouteOperation::Get,
        list,
        &ByDistance,
        RouteOptions::default(),
        |target| {
            let fails = failing.contains(&target);
            async move {
                if fails {
                    Err(RpcError::Transport {
                        target,
                        reason: "connection refused".into(),
                    })
                } else {
                    Ok(target)
                }
            }
        },
    ))
}

proptest! {
    /// The output list holds exactly the input entries.
    #[test]
    fn test_output_is_permutation_of_input(replicas in arb_replicas()) {
        let (list, failing) = build(&replicas);
        let outcome = run(&list, &failing);

        let mut before = list.addresses();
        let mut after = outcome.locations.addresses();
        before.sort();
        after.sort();
        prop_assert_eq!(before, after);
    }

    /// A success always names index 0, and that entry answered.
    #[test]
    fn test_winner_is_front_entry(replicas in arb_replicas()) {
        let (list, failing) = build(&replicas);
        prop_assume!(failing.len() < list.len());
        let outcome = run(&list, &failing);

        prop_assert_eq!(outcome.winner, Some(0));
        let front = outcome.locations.front().unwrap();
        prop_assert!(front.last_known_good);
        prop_assert_eq!(outcome.result.as_ref().ok(), Some(&front.address));
        prop_assert!(!failing.contains(&front.address));
    }

    /// The closest replica answering leaves the list in distance order.
    #[test]
    fn test_first_try_success_keeps_distance_order(replicas in arb_replicas()) {
        let (list, failing) = build(&replicas);
        let sorted = distance_order(&list);
        prop_assume!(!failing.contains(&sorted[0]));
        let outcome = run(&list, &failing);

        prop_assert!(!outcome.changed);
        prop_assert_eq!(outcome.attempts, 1);
        prop_assert_eq!(outcome.locations.addresses(), sorted);
    }

    /// Every failed entry is moved behind the untried ones, in the order tried.
    #[test]
    fn test_failed_entries_move_to_back(replicas in arb_replicas()) {
        let (list, failing) = build(&replicas);
        let sorted = distance_order(&list);
        let tried_and_failed = sorted
            .iter()
            .take_while(|a| failing.contains(*a))
            .count();
        let outcome = run(&list, &failing);

        prop_assert_eq!(outcome.changed, tried_and_failed > 0);
        prop_assert_eq!(
            outcome.attempts,
            (tried_and_failed + 1).min(sorted.len())
        );

        let mut expected = sorted[tried_and_failed..].to_vec();
        expected.extend_from_slice(&sorted[..tried_and_failed]);
        prop_assert_eq!(outcome.locations.addresses(), expected.clone());

        for (i, address) in sorted.iter().enumerate().take(tried_and_failed) {
            let now = expected.iter().position(|a| a == address).unwrap();
            prop_assert!(now >= i);
            prop_assert!(!outcome.locations.locations()[now].last_known_good);
        }
    }

    /// With every replica down the last error is returned and no entry wins.
    #[test]
    fn test_all_down_tries_each_once(replicas in arb_replicas()) {
        let all_down: Vec<_> = replicas.iter().map(|(score, _)| (*score, true)).collect();
        let (list, failing) = build(&all_down);
        let sorted = distance_order(&list);
        let outcome = run(&list, &failing);

        prop_assert_eq!(outcome.attempts, sorted.len());
        prop_assert_eq!(outcome.winner, None);
        let last = sorted.last().unwrap().clone();
        prop_assert!(
            matches!(&outcome.result, Err(RpcError::Transport { target, .. }) if *target == last),
            "expected last replica's transport error"
        );
        prop_assert_eq!(outcome.locations.addresses(), sorted);
    }
}
