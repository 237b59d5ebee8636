//! Pure diff between the eligible tenants and the running workers.

use std::collections::BTreeSet;

use serde::Serialize;

use sentinel_core::TenantId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    pub start: BTreeSet<TenantId>,
    pub stop: BTreeSet<TenantId>,
    pub keep: BTreeSet<TenantId>,
}

impl ReconcilePlan {
    pub fn compute(desired: &BTreeSet<TenantId>, actual: &BTreeSet<TenantId>) -> Self {
        Self {
            start: desired.difference(actual).copied().collect(),
            stop: actual.difference(desired).copied().collect(),
            keep: desired.intersection(actual).copied().collect(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.start.is_empty() && self.stop.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(raw: &[i64]) -> BTreeSet<TenantId> {
        raw.iter().copied().map(TenantId::new).collect()
    }

    #[test]
    fn starts_missing_stops_stale_keeps_the_rest() {
        let plan = ReconcilePlan::compute(&ids(&[1, 2, 3]), &ids(&[2, 4]));
        assert_eq!(plan.start, ids(&[1, 3]));
        assert_eq!(plan.stop, ids(&[4]));
        assert_eq!(plan.keep, ids(&[2]));
        assert!(!plan.is_noop());
    }

    #[test]
    fn matching_sets_need_nothing() {
        let plan = ReconcilePlan::compute(&ids(&[1, 2]), &ids(&[1, 2]));
        assert!(plan.is_noop());
        assert_eq!(plan.keep, ids(&[1, 2]));
    }

    proptest! {
        #[test]
        fn applying_the_plan_yields_the_desired_set(
            desired in proptest::collection::btree_set(0i64..20, 0..10),
            actual in proptest::collection::btree_set(0i64..20, 0..10),
        ) {
            let desired: BTreeSet<TenantId> = desired.into_iter().map(TenantId::new).collect();
            let actual: BTreeSet<TenantId> = actual.into_iter().map(TenantId::new).collect();
            let plan = ReconcilePlan::compute(&desired, &actual);

            let mut live = actual.clone();
            for id in &plan.stop {
                live.remove(id);
            }
            live.extend(plan.start.iter().copied());
            prop_assert_eq!(live, desired);
            prop_assert!(plan.start.is_disjoint(&plan.keep));
        }
    }
}
