//! Property tests for tag set algebra, joins and percentile ranks

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::collections::BTreeMap;
use tsexpr::evaluator::{EvalContext, Evaluator};
use tsexpr::registry::{Arg, Registry};
use tsexpr::tags::{TagKeys, TagSet};
use tsexpr::value::{Entry, ResultSet, Series, Value};

fn arb_pairs() -> impl Strategy<Value = BTreeMap<String, String>> {
    proptest::collection::btree_map("[a-e]{1,3}", "[a-z0-9.]{1,4}", 0..6)
}

fn arb_tags() -> impl Strategy<Value = TagSet> {
    arb_pairs().prop_map(|m| TagSet::from_pairs(m).unwrap())
}

fn evaluator() -> Evaluator {
    Evaluator::new(EvalContext::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()))
}

fn number_set(prefix: &str, n: usize) -> ResultSet {
    let mut rs = ResultSet::new();
    for i in 0..n {
        let group = TagSet::from_pairs([("host", format!("{}{}", prefix, i))]).unwrap();
        rs.results.push(Entry::new(Value::Number(i as f64), group));
    }
    rs
}

proptest! {
    /// Canonical form does not depend on insertion order
    #[test]
    fn canonical_ignores_order(
        shuffled in arb_pairs()
            .prop_map(|m| m.into_iter().collect::<Vec<_>>())
            .prop_shuffle()
    ) {
        let a = TagSet::from_pairs(shuffled.clone()).unwrap();
        let mut sorted = shuffled;
        sorted.sort();
        let b = TagSet::from_pairs(sorted).unwrap();
        prop_assert_eq!(a.canonical(), b.canonical());
        prop_assert!(a.equal(&b));
    }

    /// The canonical text parses back to an equal set
    #[test]
    fn canonical_parses_back(tags in arb_tags()) {
        let parsed = TagSet::parse(&tags.canonical()).unwrap();
        prop_assert!(parsed.equal(&tags));
    }

    /// Projection yields a subset, and subsets always overlap
    #[test]
    fn projection_is_a_subset(tags in arb_tags(), keys in proptest::collection::btree_set("[a-e]{1,3}", 0..4)) {
        let keys: TagKeys = keys;
        let projected = tags.project(&keys);
        prop_assert!(projected.subset(&tags));
        prop_assert!(projected.overlaps(&tags));
        prop_assert!(tags.overlaps(&projected));
        prop_assert!(projected.keys().is_subset(&keys));
    }

    /// Merging with a subset changes nothing
    #[test]
    fn merge_with_subset_is_identity(tags in arb_tags(), keys in proptest::collection::btree_set("[a-e]{1,3}", 0..4)) {
        let projected = tags.project(&keys);
        prop_assert!(tags.merge(&projected).equal(&tags));
    }

    /// Disjoint groups never join; every element is kept, NaN-filled
    #[test]
    fn disjoint_union_keeps_everything(a in 1usize..80, b in 1usize..80) {
        let (left, right) = (number_set("a", a), number_set("b", b));
        let unions = evaluator().union(&left, &right, "a + b");
        prop_assert_eq!(unions.len(), a + b);
        prop_assert!(unions[..a].iter().all(|u| u.b.as_float().unwrap().is_nan()));
        prop_assert!(unions[a..].iter().all(|u| u.a.as_float().unwrap().is_nan()));
    }

    /// Identical group lists join one to one, with or without the index
    #[test]
    fn identical_groups_join_pairwise(n in 1usize..150) {
        let set = number_set("h", n);
        let unions = evaluator().union(&set, &set, "a + a");
        prop_assert_eq!(unions.len(), n);
        for (u, e) in unions.iter().zip(&set.results) {
            prop_assert_eq!(&u.group, &e.group);
            prop_assert_eq!(&u.a, &u.b);
        }
    }

    /// percentile(0) is the minimum and percentile(1) the maximum
    #[test]
    fn percentile_bounds(values in proptest::collection::vec(-1e6f64..1e6, 1..40), p in -2.0f64..3.0) {
        let series: Series = values
            .iter()
            .enumerate()
            .map(|(i, v)| (Utc.timestamp_opt(i as i64 * 60, 0).unwrap(), *v))
            .collect();
        let mut rs = ResultSet::new();
        rs.results.push(Entry::new(Value::Series(series), TagSet::new()));

        let registry = Registry::builtin();
        let func = registry.get("percentile").unwrap();
        let mut ev = evaluator();
        let mut at = |p: f64| {
            let out = (func.imp)(&mut ev, vec![Arg::Set(rs.clone()), Arg::Number(p)]).unwrap();
            out.results[0].value.as_float().unwrap()
        };

        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        prop_assert_eq!(at(0.0), min);
        prop_assert_eq!(at(1.0), max);
        let v = at(p);
        prop_assert!(values.contains(&v));
        prop_assert!(min <= v && v <= max);
    }
}
