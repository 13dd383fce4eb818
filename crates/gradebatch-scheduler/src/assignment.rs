//! Assignment planning.
//!
//! [`plan`] is a pure function: it sees a copy of grader load, simulates
//! the assignments it makes, and returns an [`AssignmentPlan`] without
//! touching shared state. The caller still has to reserve capacity on the
//! live pool, so a plan may end up partially applied.

use gradebatch_core::job::Strategy;
use gradebatch_core::{GraderId, ResourceId};
use rand::Rng;
use rand::seq::SliceRandom;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Load view of one grader at planning time.
#[derive(Debug, Clone, PartialEq)]
pub struct GraderView {
    pub id: GraderId,
    pub capacity: u32,
    pub load: u32,
    pub tags: BTreeSet<String>,
}

impl GraderView {
    fn has_spare(&self) -> bool {
        self.load < self.capacity
    }

    /// Compare `load / capacity` exactly, then id.
    fn cmp_by_ratio(&self, other: &Self) -> Ordering {
        let lhs = u64::from(self.load) * u64::from(other.capacity);
        let rhs = u64::from(other.load) * u64::from(self.capacity);
        lhs.cmp(&rhs).then_with(|| self.id.cmp(&other.id))
    }
}

/// An item waiting for a grader.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanItem {
    pub id: ResourceId,
    pub category: Option<String>,
    /// Grader that just failed this item; skipped unless it is the only
    /// grader in the pool.
    pub avoid: Option<GraderId>,
}

/// One-shot mapping of items to graders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentPlan {
    assignments: Vec<(ResourceId, GraderId)>,
}

impl AssignmentPlan {
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn grader_for(&self, item: &ResourceId) -> Option<&GraderId> {
        self.assignments
            .iter()
            .find(|(id, _)| id == item)
            .map(|(_, grader)| grader)
    }

    /// Number of items planned onto `grader`.
    pub fn count_for(&self, grader: &GraderId) -> usize {
        self.assignments.iter().filter(|(_, g)| g == grader).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(ResourceId, GraderId)> {
        self.assignments.iter()
    }
}

impl IntoIterator for AssignmentPlan {
    type Item = (ResourceId, GraderId);
    type IntoIter = std::vec::IntoIter<(ResourceId, GraderId)>;

    fn into_iter(self) -> Self::IntoIter {
        self.assignments.into_iter()
    }
}

/// Produce an assignment plan for `items` over `graders`.
///
/// Items that cannot be placed (every eligible grader is full) are left out
/// of the plan and stay queued.
pub fn plan<R>(
    items: &[PlanItem],
    graders: &[GraderView],
    strategy: Strategy,
    rng: &mut R,
) -> AssignmentPlan
where
    R: Rng + ?Sized,
{
    let mut graders = graders.to_vec();
    let sole_grader = graders.len() == 1;
    let mut assignments = Vec::with_capacity(items.len());

    let eligible = |grader: &GraderView, item: &PlanItem| {
        grader.has_spare() && (sole_grader || item.avoid.as_ref() != Some(&grader.id))
    };

    match strategy {
        Strategy::Balanced => {
            // Rank once, then round-robin across the ranking.
            graders.sort_by(|a, b| a.cmp_by_ratio(b));
            let mut cursor = 0;
            for item in items {
                let found = (0..graders.len())
                    .map(|step| (cursor + step) % graders.len())
                    .find(|&idx| eligible(&graders[idx], item));
                if let Some(idx) = found {
                    graders[idx].load += 1;
                    assignments.push((item.id, graders[idx].id.clone()));
                    cursor = idx + 1;
                }
            }
        }
        Strategy::Workload => {
            for item in items {
                if let Some(idx) = least_loaded(&graders, |g| eligible(g, item)) {
                    graders[idx].load += 1;
                    assignments.push((item.id, graders[idx].id.clone()));
                }
            }
        }
        Strategy::Random => {
            for item in items {
                let candidates: Vec<usize> = (0..graders.len())
                    .filter(|&idx| eligible(&graders[idx], item))
                    .collect();
                if let Some(&idx) = candidates.choose(rng) {
                    graders[idx].load += 1;
                    assignments.push((item.id, graders[idx].id.clone()));
                }
            }
        }
        Strategy::Expertise => {
            for item in items {
                let matched = item.category.as_ref().and_then(|category| {
                    least_loaded(&graders, |g| eligible(g, item) && g.tags.contains(category))
                });
                let chosen = matched.or_else(|| least_loaded(&graders, |g| eligible(g, item)));
                if let Some(idx) = chosen {
                    graders[idx].load += 1;
                    assignments.push((item.id, graders[idx].id.clone()));
                }
            }
        }
    }

    AssignmentPlan { assignments }
}

fn least_loaded<F>(graders: &[GraderView], mut filter: F) -> Option<usize>
where
    F: FnMut(&GraderView) -> bool,
{
    graders
        .iter()
        .enumerate()
        .filter(|(_, g)| filter(g))
        .min_by(|(_, a), (_, b)| a.cmp_by_ratio(b))
        .map(|(idx, _)| idx)
}

/// Final load per grader if `plan` were applied on top of `graders`.
pub fn projected_load(graders: &[GraderView], plan: &AssignmentPlan) -> HashMap<GraderId, u32> {
    let mut load: HashMap<GraderId, u32> =
        graders.iter().map(|g| (g.id.clone(), g.load)).collect();
    for (_, grader) in plan.iter() {
        *load.entry(grader.clone()).or_default() += 1;
    }
    load
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn grader(id: &str, capacity: u32, load: u32, tags: &[&str]) -> GraderView {
        GraderView {
            id: GraderId::from(id),
            capacity,
            load,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn items(n: usize) -> Vec<PlanItem> {
        (0..n)
            .map(|_| PlanItem {
                id: ResourceId::new(),
                category: None,
                avoid: None,
            })
            .collect()
    }

    fn categorized(category: &str) -> PlanItem {
        PlanItem {
            id: ResourceId::new(),
            category: Some(category.to_string()),
            avoid: None,
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn assert_within_capacity(graders: &[GraderView], plan: &AssignmentPlan) {
        let load = projected_load(graders, plan);
        for g in graders {
            assert!(load[&g.id] <= g.capacity, "grader {} over capacity", g.id);
        }
    }

    #[test]
    fn test_balanced_splits_evenly() {
        let graders = vec![grader("g-1", 2, 0, &[]), grader("g-2", 2, 0, &[])];
        let items = items(4);

        let plan = plan(&items, &graders, Strategy::Balanced, &mut rng());

        assert_eq!(plan.len(), 4);
        assert_eq!(plan.count_for(&GraderId::from("g-1")), 2);
        assert_eq!(plan.count_for(&GraderId::from("g-2")), 2);
    }

    #[test]
    fn test_balanced_starts_with_least_loaded_then_lowest_id() {
        let graders = vec![
            grader("g-b", 4, 0, &[]),
            grader("g-a", 4, 0, &[]),
            grader("g-c", 4, 2, &[]),
        ];
        let items = items(1);

        let plan = plan(&items, &graders, Strategy::Balanced, &mut rng());
        assert_eq!(plan.grader_for(&items[0].id), Some(&GraderId::from("g-a")));
    }

    #[test]
    fn test_overflow_items_are_left_unplanned() {
        let graders = vec![grader("g-1", 1, 0, &[]), grader("g-2", 1, 1, &[])];
        let items = items(3);

        for strategy in [
            Strategy::Balanced,
            Strategy::Random,
            Strategy::Expertise,
            Strategy::Workload,
        ] {
            let plan = plan(&items, &graders, strategy, &mut rng());
            assert_eq!(plan.len(), 1, "strategy {}", strategy);
            assert_within_capacity(&graders, &plan);
        }
    }

    #[test]
    fn test_workload_rebalances_after_each_assignment() {
        // g-1 is at 1/4, g-2 at 0/2. The first item goes to g-2 (0 < 1/4),
        // which lifts it to 1/2, so the second goes to g-1.
        let graders = vec![grader("g-1", 4, 1, &[]), grader("g-2", 2, 0, &[])];
        let items = items(2);

        let plan = plan(&items, &graders, Strategy::Workload, &mut rng());
        assert_eq!(plan.grader_for(&items[0].id), Some(&GraderId::from("g-2")));
        assert_eq!(plan.grader_for(&items[1].id), Some(&GraderId::from("g-1")));
        let load = projected_load(&graders, &plan);
        assert_eq!(load[&GraderId::from("g-1")], 2);
        assert_eq!(load[&GraderId::from("g-2")], 1);
    }

    #[test]
    fn test_random_is_reproducible_with_seed() {
        let graders = vec![
            grader("g-1", 10, 0, &[]),
            grader("g-2", 10, 0, &[]),
            grader("g-3", 10, 0, &[]),
        ];
        let items = items(12);

        let a = plan(&items, &graders, Strategy::Random, &mut StdRng::seed_from_u64(99));
        let b = plan(&items, &graders, Strategy::Random, &mut StdRng::seed_from_u64(99));
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
        assert_within_capacity(&graders, &a);
    }

    #[test]
    fn test_expertise_prefers_matching_tags() {
        let graders = vec![
            grader("g-1", 5, 0, &["algebra"]),
            grader("g-2", 5, 0, &["geometry"]),
        ];
        let items = vec![categorized("geometry"), categorized("algebra")];

        let plan = plan(&items, &graders, Strategy::Expertise, &mut rng());
        assert_eq!(plan.grader_for(&items[0].id), Some(&GraderId::from("g-2")));
        assert_eq!(plan.grader_for(&items[1].id), Some(&GraderId::from("g-1")));
    }

    #[test]
    fn test_expertise_falls_back_to_full_pool() {
        let graders = vec![
            grader("g-1", 1, 1, &["algebra"]),
            grader("g-2", 5, 0, &["geometry"]),
        ];
        let items = vec![categorized("algebra"), categorized("chemistry")];

        let plan = plan(&items, &graders, Strategy::Expertise, &mut rng());
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.grader_for(&items[0].id), Some(&GraderId::from("g-2")));
        assert_eq!(plan.grader_for(&items[1].id), Some(&GraderId::from("g-2")));
    }

    #[test]
    fn test_avoids_grader_that_just_failed() {
        let graders = vec![grader("g-1", 5, 0, &[]), grader("g-2", 5, 3, &[])];
        let item = PlanItem {
            id: ResourceId::new(),
            category: None,
            avoid: Some(GraderId::from("g-1")),
        };

        for strategy in [
            Strategy::Balanced,
            Strategy::Random,
            Strategy::Expertise,
            Strategy::Workload,
        ] {
            let plan = plan(std::slice::from_ref(&item), &graders, strategy, &mut rng());
            assert_eq!(plan.grader_for(&item.id), Some(&GraderId::from("g-2")));
        }
    }

    #[test]
    fn test_avoided_grader_still_used_when_alone() {
        let graders = vec![grader("g-1", 1, 0, &[])];
        let item = PlanItem {
            id: ResourceId::new(),
            category: None,
            avoid: Some(GraderId::from("g-1")),
        };

        let plan = plan(std::slice::from_ref(&item), &graders, Strategy::Balanced, &mut rng());
        assert_eq!(plan.grader_for(&item.id), Some(&GraderId::from("g-1")));
    }

    #[test]
    fn test_empty_pool_yields_empty_plan() {
        let plan = plan(&items(3), &[], Strategy::Balanced, &mut rng());
        assert!(plan.is_empty());
    }

    #[test]
    fn test_capacity_never_exceeded_across_many_shapes() {
        let mut seed_rng = StdRng::seed_from_u64(1);
        for round in 0..50u64 {
            let graders: Vec<GraderView> = (0..seed_rng.gen_range(1..6))
                .map(|i| {
                    let capacity = seed_rng.gen_range(1..5);
                    let load = seed_rng.gen_range(0..=capacity);
                    grader(&format!("g-{}", i), capacity, load, &["algebra"])
                })
                .collect();
            let items = items(seed_rng.gen_range(0..20));

            for strategy in [
                Strategy::Balanced,
                Strategy::Random,
                Strategy::Expertise,
                Strategy::Workload,
            ] {
                let plan = plan(&items, &graders, strategy, &mut StdRng::seed_from_u64(round));
                assert_within_capacity(&graders, &plan);
            }
        }
    }
}
