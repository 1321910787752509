use std::collections::BTreeSet;

use proptest::prelude::*;
use simloc::store::{SearchQuery, SimulationRecord};
use simloc::types::SearchField;

use crate::support::local_store;

const TAGS: [&str; 4] = ["hydro", "mhd", "2d", "3d"];

fn identity(i: usize) -> String {
    format!("{:08x}-0000-4000-8000-{:012x}", i + 1, i + 1)
}

fn records(tag_sets: &[BTreeSet<usize>]) -> Vec<SimulationRecord> {
    tag_sets
        .iter()
        .enumerate()
        .map(|(i, tags)| {
            SimulationRecord::new(identity(i), format!("run{}", i), format!("/data/run{}", i))
                .with_tags(tags.iter().map(|t| TAGS[*t]))
        })
        .collect()
}

fn tag_query(wanted: &BTreeSet<usize>) -> SearchQuery {
    SearchQuery::new(wanted.iter().map(|t| format!("^{}$", TAGS[*t]))).fields([SearchField::Tags])
}

fn matched_ids(records: Vec<SimulationRecord>) -> BTreeSet<String> {
    records.into_iter().map(|r| r.uuid).collect()
}

proptest! {
    #[test]
    fn inclusive_search_matches_any_tag(
        tag_sets in prop::collection::vec(prop::collection::btree_set(0usize..4, 0..4), 1..12),
        wanted in prop::collection::btree_set(0usize..4, 1..4),
    ) {
        let store = local_store(&records(&tag_sets));
        let found = matched_ids(store.read().search_lenient(&tag_query(&wanted)).unwrap());

        let expected: BTreeSet<String> = tag_sets
            .iter()
            .enumerate()
            .filter(|(_, tags)| !tags.is_disjoint(&wanted))
            .map(|(i, _)| identity(i))
            .collect();
        prop_assert_eq!(found, expected);
    }

    #[test]
    fn exclusive_search_needs_every_tag(
        tag_sets in prop::collection::vec(prop::collection::btree_set(0usize..4, 0..4), 1..12),
        wanted in prop::collection::btree_set(0usize..4, 1..4),
    ) {
        let store = local_store(&records(&tag_sets));
        let query = tag_query(&wanted).exclusive(true);
        let found = matched_ids(store.read().search_lenient(&query).unwrap());

        let expected: BTreeSet<String> = tag_sets
            .iter()
            .enumerate()
            .filter(|(_, tags)| wanted.is_subset(tags))
            .map(|(i, _)| identity(i))
            .collect();
        prop_assert_eq!(found, expected);
    }

    #[test]
    fn exclusive_results_are_a_subset_of_inclusive(
        tag_sets in prop::collection::vec(prop::collection::btree_set(0usize..4, 0..4), 1..12),
        wanted in prop::collection::btree_set(0usize..4, 1..4),
    ) {
        let store = local_store(&records(&tag_sets));
        let store = store.read();
        let inclusive = matched_ids(store.search_lenient(&tag_query(&wanted)).unwrap());
        let exclusive = matched_ids(store.search_lenient(&tag_query(&wanted).exclusive(true)).unwrap());
        prop_assert!(exclusive.is_subset(&inclusive));
    }

    #[test]
    fn empty_patterns_match_nothing(
        tag_sets in prop::collection::vec(prop::collection::btree_set(0usize..4, 0..4), 1..12),
        exclusive in any::<bool>(),
    ) {
        let store = local_store(&records(&tag_sets));
        let query = SearchQuery::new(Vec::<String>::new()).exclusive(exclusive);
        prop_assert!(store.read().search_lenient(&query).unwrap().is_empty());
    }
}
