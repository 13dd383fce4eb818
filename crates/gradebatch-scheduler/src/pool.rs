//! Shared grader pool.
//!
//! A grader can be used by several jobs at once, so its load counter lives
//! here rather than in any job. Reservation is a compare-and-swap on a
//! per-grader atomic: `current_load <= capacity` holds without taking a
//! job lock or a pool-wide lock.

use dashmap::DashMap;
use gradebatch_core::grader::{GraderInfo, GraderSpec};
use gradebatch_core::{Error, GraderId, Result};
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::info;

use crate::assignment::GraderView;

#[derive(Debug, Default, Clone, Copy)]
struct GraderStats {
    completed_count: u64,
    average_duration_ms: Option<f64>,
}

#[derive(Debug)]
struct GraderSlot {
    id: GraderId,
    capacity: u32,
    tags: BTreeSet<String>,
    load: AtomicU32,
    stats: Mutex<GraderStats>,
}

impl GraderSlot {
    fn stats(&self) -> GraderStats {
        *self.stats.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn info(&self) -> GraderInfo {
        let stats = self.stats();
        GraderInfo {
            grader_id: self.id.clone(),
            capacity: self.capacity,
            current_load: self.load.load(Ordering::Acquire),
            tags: self.tags.clone(),
            completed_count: stats.completed_count,
            average_duration_ms: stats.average_duration_ms,
        }
    }
}

/// Registry of graders shared by every job.
#[derive(Debug, Default)]
pub struct GraderPool {
    graders: DashMap<GraderId, GraderSlot>,
}

impl GraderPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a grader. Ids must be unique.
    pub fn register(&self, spec: GraderSpec) -> Result<GraderInfo> {
        if spec.grader_id.as_str().trim().is_empty() {
            return Err(Error::Validation("grader id must not be empty".to_string()));
        }
        if spec.capacity == 0 {
            return Err(Error::Validation(format!(
                "grader '{}' must have capacity of at least 1",
                spec.grader_id
            )));
        }

        let entry = match self.graders.entry(spec.grader_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(Error::Conflict(format!(
                    "grader '{}' is already registered",
                    spec.grader_id
                )));
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => entry,
        };

        let slot = GraderSlot {
            id: spec.grader_id.clone(),
            capacity: spec.capacity,
            tags: spec.tags,
            load: AtomicU32::new(0),
            stats: Mutex::new(GraderStats::default()),
        };
        let info = slot.info();
        entry.insert(slot);

        info!(grader_id = %info.grader_id, capacity = info.capacity, "Grader registered");
        Ok(info)
    }

    /// Remove an idle grader.
    pub fn deregister(&self, id: &GraderId) -> Result<()> {
        let removed = self
            .graders
            .remove_if(id, |_, slot| slot.load.load(Ordering::Acquire) == 0);

        match removed {
            Some(_) => {
                info!(grader_id = %id, "Grader deregistered");
                Ok(())
            }
            None if self.graders.contains_key(id) => Err(Error::Conflict(format!(
                "grader '{}' still holds work items",
                id
            ))),
            None => Err(Error::NotFound(format!("grader {}", id))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.graders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.graders.len()
    }

    pub fn contains(&self, id: &GraderId) -> bool {
        self.graders.contains_key(id)
    }

    /// Claim one unit of capacity. Returns false when the grader is full
    /// or unknown.
    pub fn try_reserve(&self, id: &GraderId) -> bool {
        let Some(slot) = self.graders.get(id) else {
            return false;
        };
        let capacity = slot.capacity;
        slot.load
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |load| {
                (load < capacity).then_some(load + 1)
            })
            .is_ok()
    }

    /// Give back one unit of capacity.
    pub fn release(&self, id: &GraderId) {
        if let Some(slot) = self.graders.get(id) {
            let _ = slot
                .load
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |load| {
                    load.checked_sub(1)
                });
        }
    }

    /// Record a successful item. Folds the duration into the grader's
    /// exponential moving average.
    pub fn record_completion(&self, id: &GraderId, duration_ms: f64, alpha: f64) {
        if let Some(slot) = self.graders.get(id) {
            let mut stats = slot.stats.lock().unwrap_or_else(|p| p.into_inner());
            stats.completed_count += 1;
            stats.average_duration_ms = Some(match stats.average_duration_ms {
                Some(avg) => alpha * duration_ms + (1.0 - alpha) * avg,
                None => duration_ms,
            });
        }
    }

    pub fn info(&self, id: &GraderId) -> Option<GraderInfo> {
        self.graders.get(id).map(|slot| slot.info())
    }

    /// All graders, ordered by id.
    pub fn list(&self) -> Vec<GraderInfo> {
        let mut graders: Vec<GraderInfo> = self.graders.iter().map(|slot| slot.info()).collect();
        graders.sort_by(|a, b| a.grader_id.cmp(&b.grader_id));
        graders
    }

    /// Load snapshot for the assignment engine, ordered by id.
    pub fn views(&self) -> Vec<GraderView> {
        let mut views: Vec<GraderView> = self
            .graders
            .iter()
            .map(|slot| GraderView {
                id: slot.id.clone(),
                capacity: slot.capacity,
                load: slot.load.load(Ordering::Acquire),
                tags: slot.tags.clone(),
            })
            .collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    pub fn has_spare_capacity(&self) -> bool {
        self.graders
            .iter()
            .any(|slot| slot.load.load(Ordering::Acquire) < slot.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_respects_capacity() {
        let pool = GraderPool::new();
        pool.register(GraderSpec::new("g-1", 2)).unwrap();
        let id = GraderId::from("g-1");

        assert!(pool.try_reserve(&id));
        assert!(pool.try_reserve(&id));
        assert!(!pool.try_reserve(&id));
        assert_eq!(pool.info(&id).unwrap().current_load, 2);

        pool.release(&id);
        assert!(pool.try_reserve(&id));
    }

    #[test]
    fn test_release_never_underflows() {
        let pool = GraderPool::new();
        pool.register(GraderSpec::new("g-1", 1)).unwrap();
        let id = GraderId::from("g-1");

        pool.release(&id);
        assert_eq!(pool.info(&id).unwrap().current_load, 0);
    }

    #[test]
    fn test_reserve_unknown_grader() {
        let pool = GraderPool::new();
        assert!(!pool.try_reserve(&GraderId::from("ghost")));
    }

    #[test]
    fn test_register_validation() {
        let pool = GraderPool::new();
        assert!(matches!(
            pool.register(GraderSpec::new("g-1", 0)),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            pool.register(GraderSpec::new("  ", 1)),
            Err(Error::Validation(_))
        ));

        pool.register(GraderSpec::new("g-1", 1)).unwrap();
        assert!(matches!(
            pool.register(GraderSpec::new("g-1", 3)),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn test_deregister_busy_grader_is_conflict() {
        let pool = GraderPool::new();
        pool.register(GraderSpec::new("g-1", 1)).unwrap();
        let id = GraderId::from("g-1");

        assert!(pool.try_reserve(&id));
        assert!(matches!(pool.deregister(&id), Err(Error::Conflict(_))));

        pool.release(&id);
        pool.deregister(&id).unwrap();
        assert!(matches!(pool.deregister(&id), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_completion_average_is_smoothed() {
        let pool = GraderPool::new();
        pool.register(GraderSpec::new("g-1", 1)).unwrap();
        let id = GraderId::from("g-1");

        pool.record_completion(&id, 1000.0, 0.2);
        pool.record_completion(&id, 2000.0, 0.2);

        let info = pool.info(&id).unwrap();
        assert_eq!(info.completed_count, 2);
        let avg = info.average_duration_ms.unwrap();
        assert!((avg - 1200.0).abs() < 1e-9);
    }

    #[test]
    fn test_concurrent_reservations_never_exceed_capacity() {
        let pool = std::sync::Arc::new(GraderPool::new());
        pool.register(GraderSpec::new("g-1", 5)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .filter(|_| pool.try_reserve(&GraderId::from("g-1")))
                        .count()
                })
            })
            .collect();

        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 5);
        assert_eq!(pool.info(&GraderId::from("g-1")).unwrap().current_load, 5);
    }
}
