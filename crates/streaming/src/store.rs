use std::collections::BTreeMap;

use foundation::GeoBounds;

use crate::protocol::{Delta, SpotPatch};
use crate::request::{ViewId, ViewportRequest, ViewportTracker};
use crate::spot::{Spot, SpotId, SpotStatus};

/// Where a record's reference data came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Origin {
    /// Latest viewport snapshot; authoritative for everything except status.
    Snapshot,
    /// Introduced by a full-record upsert delta.
    Delta,
}

#[derive(Debug, Clone)]
struct Entry {
    spot: Spot,
    origin: Origin,
}

/// Status information seen on the live channel since the store was created.
#[derive(Debug, Clone, Default, PartialEq)]
struct Observed {
    status: Option<SpotStatus>,
    last_updated: Option<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// The visible collection changed.
    Applied,
    /// Accepted, but nothing visible changed.
    Unchanged,
    /// Patch for an id that is not in the collection; nothing was created.
    UnknownTarget(SpotId),
    /// New record outside the current viewport or its status filter; not
    /// added.
    OutOfView(SpotId),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Applied,
    Unchanged,
    /// Result for a viewport request that has since been superseded.
    Stale,
}

/// Authoritative in-memory spot collection.
///
/// Merges viewport snapshots (authoritative for membership and reference
/// data) with live deltas (authoritative for `status` / `last_updated` once
/// observed). Pure state: no I/O, no clocks.
///
/// Notes on determinism:
/// - Records are keyed in a `BTreeMap`, so ids are unique by construction.
/// - The visible list is kept sorted by id and only rebuilt when it changes;
///   `revision` increments exactly when it does.
#[derive(Debug, Default)]
pub struct SpotStore {
    entries: BTreeMap<SpotId, Entry>,
    observed: BTreeMap<SpotId, Observed>,
    visible: Vec<Spot>,
    revision: u64,
    viewports: ViewportTracker,
}

impl SpotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visible spots, sorted by id.
    pub fn spots(&self) -> &[Spot] {
        &self.visible
    }

    pub fn get(&self, id: SpotId) -> Option<&Spot> {
        self.visible
            .binary_search_by_key(&id, |s| s.id)
            .ok()
            .map(|i| &self.visible[i])
    }

    pub fn contains(&self, id: SpotId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn counts_by_status(&self) -> BTreeMap<SpotStatus, usize> {
        let mut counts = BTreeMap::new();
        for spot in &self.visible {
            *counts.entry(spot.status).or_insert(0) += 1;
        }
        counts
    }

    /// Record a new viewport request; any result for an older one becomes stale.
    pub fn begin_viewport(
        &mut self,
        bounds: GeoBounds,
        status: Option<SpotStatus>,
    ) -> ViewportRequest {
        self.viewports.begin(bounds, status)
    }

    pub fn is_current(&self, view_id: ViewId) -> bool {
        self.viewports.is_current(view_id)
    }

    pub fn current_viewport(&self) -> Option<&ViewportRequest> {
        self.viewports.current()
    }

    /// Apply a fetch result only if it answers the latest viewport request.
    pub fn apply_viewport_result(&mut self, view_id: ViewId, spots: Vec<Spot>) -> SnapshotOutcome {
        if !self.viewports.is_current(view_id) {
            return SnapshotOutcome::Stale;
        }
        if self.apply_viewport_snapshot(spots) {
            SnapshotOutcome::Applied
        } else {
            SnapshotOutcome::Unchanged
        }
    }

    /// Replace the in-view set with exactly `spots` (by id; a repeated id keeps
    /// its last occurrence). Returns whether the visible collection changed.
    pub fn apply_viewport_snapshot(&mut self, spots: Vec<Spot>) -> bool {
        self.entries = spots
            .into_iter()
            .map(|spot| {
                (
                    spot.id,
                    Entry {
                        spot,
                        origin: Origin::Snapshot,
                    },
                )
            })
            .collect();

        let next: Vec<Spot> = self
            .entries
            .iter()
            .map(|(id, e)| overlay(&e.spot, self.observed.get(id)))
            .collect();
        if next == self.visible {
            return false;
        }
        self.visible = next;
        self.revision += 1;
        true
    }

    pub fn apply_delta(&mut self, delta: Delta) -> DeltaOutcome {
        match delta {
            Delta::Upsert(spot) => self.upsert(spot),
            Delta::Patch(patch) => self.patch(patch),
        }
    }

    /// Add a record fetched for an unknown delta target. The fetched status
    /// is not a live observation, so an earlier delta status still wins.
    /// No-op when the id is already present.
    pub fn apply_enrichment(&mut self, spot: Spot) -> DeltaOutcome {
        let id = spot.id;
        if self.entries.contains_key(&id) {
            return DeltaOutcome::Unchanged;
        }
        if !self.admits(&spot) {
            return DeltaOutcome::OutOfView(id);
        }
        self.entries.insert(
            id,
            Entry {
                spot,
                origin: Origin::Snapshot,
            },
        );
        self.refresh(id)
    }

    fn upsert(&mut self, spot: Spot) -> DeltaOutcome {
        let id = spot.id;
        self.observe(id, Some(spot.status), spot.last_updated.clone());
        if !self.entries.contains_key(&id) && !self.admits(&spot) {
            return DeltaOutcome::OutOfView(id);
        }
        match self.entries.get_mut(&id) {
            // Reference data for snapshot records stays with the snapshot.
            Some(e) if e.origin == Origin::Snapshot => {}
            Some(e) => e.spot = spot,
            None => {
                self.entries.insert(
                    id,
                    Entry {
                        spot,
                        origin: Origin::Delta,
                    },
                );
            }
        }
        self.refresh(id)
    }

    fn patch(&mut self, patch: SpotPatch) -> DeltaOutcome {
        let id = patch.id;
        self.observe(id, patch.status, patch.last_updated.clone());
        let Some(entry) = self.entries.get_mut(&id) else {
            return DeltaOutcome::UnknownTarget(id);
        };
        if entry.origin == Origin::Delta {
            let spot = &mut entry.spot;
            if let Some(location) = patch.location {
                spot.location = location;
            }
            if let Some(price) = patch.price_per_hour {
                spot.price_per_hour = Some(price);
            }
            if let Some(city) = patch.city {
                spot.city = Some(city);
            }
            if let Some(area) = patch.area {
                spot.area = Some(area);
            }
        }
        self.refresh(id)
    }

    /// Whether a record not yet in the collection belongs to the current
    /// viewport: inside its bounds and, with a status filter, showing that
    /// status. Everything is admitted before the first viewport request.
    fn admits(&self, spot: &Spot) -> bool {
        let Some(view) = self.viewports.current() else {
            return true;
        };
        let status = self
            .observed
            .get(&spot.id)
            .and_then(|seen| seen.status)
            .unwrap_or(spot.status);
        view.bounds.contains(spot.latitude, spot.longitude)
            && view.status.is_none_or(|wanted| wanted == status)
    }

    fn observe(&mut self, id: SpotId, status: Option<SpotStatus>, last_updated: Option<String>) {
        let seen = self.observed.entry(id).or_default();
        match status {
            // A new status without a timestamp must not inherit an older one.
            Some(status) => {
                seen.status = Some(status);
                seen.last_updated = last_updated;
            }
            None => {
                if last_updated.is_some() {
                    seen.last_updated = last_updated;
                }
            }
        }
    }

    /// Recompute the visible record for `id`.
    fn refresh(&mut self, id: SpotId) -> DeltaOutcome {
        let next = self
            .entries
            .get(&id)
            .map(|e| overlay(&e.spot, self.observed.get(&id)));
        let changed = match (self.visible.binary_search_by_key(&id, |s| s.id), next) {
            (Ok(i), Some(spot)) => {
                if self.visible[i] == spot {
                    false
                } else {
                    self.visible[i] = spot;
                    true
                }
            }
            (Err(i), Some(spot)) => {
                self.visible.insert(i, spot);
                true
            }
            (Ok(i), None) => {
                self.visible.remove(i);
                true
            }
            (Err(_), None) => false,
        };
        if changed {
            self.revision += 1;
            DeltaOutcome::Applied
        } else {
            DeltaOutcome::Unchanged
        }
    }
}

/// Observed delta status wins over the record's; everything else is kept.
fn overlay(base: &Spot, observed: Option<&Observed>) -> Spot {
    let mut spot = base.clone();
    if let Some(seen) = observed {
        if let Some(status) = seen.status {
            spot.status = status;
        }
        if seen.last_updated.is_some() {
            spot.last_updated = seen.last_updated.clone();
        }
    }
    spot
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use foundation::GeoBounds;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{DeltaOutcome, SnapshotOutcome, SpotStore};
    use crate::normalize::normalize;
    use crate::protocol::{Delta, SpotPatch, decode};
    use crate::spot::{Spot, SpotId, SpotStatus};

    fn spot(id: SpotId, status: SpotStatus) -> Spot {
        Spot {
            id,
            latitude: 37.9 + id as f64 * 0.001,
            longitude: 23.7,
            location: format!("spot {id}"),
            status,
            price_per_hour: None,
            last_updated: None,
            city: Some("Athens".to_string()),
            area: None,
        }
    }

    fn ids(store: &SpotStore) -> Vec<SpotId> {
        store.spots().iter().map(|s| s.id).collect()
    }

    fn assert_unique(store: &SpotStore) {
        let set: BTreeSet<SpotId> = store.spots().iter().map(|s| s.id).collect();
        assert_eq!(set.len(), store.len(), "duplicate ids in {:?}", ids(store));
    }

    #[test]
    fn snapshot_defines_membership() {
        let mut store = SpotStore::new();
        store.apply_viewport_snapshot(vec![
            spot(1, SpotStatus::Available),
            spot(2, SpotStatus::Occupied),
        ]);
        assert_eq!(ids(&store), vec![1, 2]);

        store.apply_delta(Delta::Upsert(spot(9, SpotStatus::Reserved)));
        assert_eq!(ids(&store), vec![1, 2, 9]);

        store.apply_viewport_snapshot(vec![
            spot(2, SpotStatus::Occupied),
            spot(3, SpotStatus::Available),
        ]);
        assert_eq!(ids(&store), vec![2, 3]);
    }

    #[test]
    fn duplicate_ids_in_one_snapshot_collapse() {
        let mut store = SpotStore::new();
        store.apply_viewport_snapshot(vec![
            spot(1, SpotStatus::Available),
            spot(1, SpotStatus::Occupied),
        ]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(1).map(|s| s.status), Some(SpotStatus::Occupied));
    }

    #[test]
    fn delta_status_wins_after_snapshot() {
        let mut store = SpotStore::new();
        store.apply_viewport_snapshot(vec![spot(1, SpotStatus::Available)]);
        let out = store.apply_delta(Delta::Patch(SpotPatch::status(1, SpotStatus::Occupied)));
        assert_eq!(out, DeltaOutcome::Applied);
        assert_eq!(store.get(1).map(|s| s.status), Some(SpotStatus::Occupied));
    }

    #[test]
    fn delta_status_wins_over_later_snapshot() {
        let mut store = SpotStore::new();
        store.apply_viewport_snapshot(vec![spot(1, SpotStatus::Available)]);
        store.apply_delta(Delta::Patch(SpotPatch::status(1, SpotStatus::Occupied)));
        // Snapshot taken before the change arrives late.
        store.apply_viewport_snapshot(vec![spot(1, SpotStatus::Available)]);
        assert_eq!(store.get(1).map(|s| s.status), Some(SpotStatus::Occupied));
    }

    #[test]
    fn patch_for_unknown_id_is_a_noop() {
        let mut store = SpotStore::new();
        store.apply_viewport_snapshot(vec![spot(1, SpotStatus::Available)]);
        let before = store.spots().to_vec();
        let rev = store.revision();

        let out = store.apply_delta(Delta::Patch(SpotPatch::status(999, SpotStatus::Occupied)));
        assert_eq!(out, DeltaOutcome::UnknownTarget(999));
        assert_eq!(store.spots(), before.as_slice());
        assert_eq!(store.revision(), rev);
        assert!(!store.contains(999));

        // Once the spot shows up in a snapshot, the observed status applies.
        store.apply_viewport_snapshot(vec![
            spot(1, SpotStatus::Available),
            spot(999, SpotStatus::Available),
        ]);
        assert_eq!(store.get(999).map(|s| s.status), Some(SpotStatus::Occupied));
    }

    #[test]
    fn upsert_keeps_snapshot_reference_data() {
        let mut store = SpotStore::new();
        store.apply_viewport_snapshot(vec![spot(1, SpotStatus::Available)]);
        let mut moved = spot(1, SpotStatus::Reserved);
        moved.latitude = 0.0;
        moved.location = "elsewhere".to_string();
        store.apply_delta(Delta::Upsert(moved));

        let s = store.get(1).expect("spot 1");
        assert_eq!(s.status, SpotStatus::Reserved);
        assert_eq!(s.location, "spot 1");
        assert!((s.latitude - 37.901).abs() < 1e-9);
    }

    #[test]
    fn upsert_inserts_and_replaces_delta_records() {
        let mut store = SpotStore::new();
        assert_eq!(
            store.apply_delta(Delta::Upsert(spot(5, SpotStatus::Available))),
            DeltaOutcome::Applied
        );
        let mut renamed = spot(5, SpotStatus::Available);
        renamed.location = "renamed".to_string();
        store.apply_delta(Delta::Upsert(renamed));
        assert_eq!(store.get(5).map(|s| s.location.as_str()), Some("renamed"));

        store.apply_delta(Delta::Patch(SpotPatch {
            price_per_hour: Some(1.5),
            ..SpotPatch::status(5, SpotStatus::Occupied)
        }));
        let s = store.get(5).expect("spot 5");
        assert_eq!(s.price_per_hour, Some(1.5));
        assert_eq!(s.status, SpotStatus::Occupied);
    }

    #[test]
    fn enrichment_keeps_observed_status() {
        let mut store = SpotStore::new();
        store.apply_viewport_snapshot(vec![spot(1, SpotStatus::Available)]);
        let out = store.apply_delta(Delta::Patch(SpotPatch::status(7, SpotStatus::Reserved)));
        assert_eq!(out, DeltaOutcome::UnknownTarget(7));

        assert_eq!(store.apply_enrichment(spot(7, SpotStatus::Available)), DeltaOutcome::Applied);
        assert_eq!(store.get(7).map(|s| s.status), Some(SpotStatus::Reserved));
        assert_eq!(
            store.apply_enrichment(spot(7, SpotStatus::Occupied)),
            DeltaOutcome::Unchanged
        );
        assert_eq!(ids(&store), vec![1, 7]);
    }

    #[test]
    fn new_records_must_fit_the_current_viewport() {
        let mut store = SpotStore::new();
        let req = store.begin_viewport(
            GeoBounds::new(37.9, 23.6, 38.1, 23.9),
            Some(SpotStatus::Available),
        );
        store.apply_viewport_result(req.view_id, vec![spot(1, SpotStatus::Available)]);

        let mut far = spot(2, SpotStatus::Available);
        far.latitude = 39.64;
        far.longitude = 22.42;
        assert_eq!(store.apply_delta(Delta::Upsert(far.clone())), DeltaOutcome::OutOfView(2));
        assert_eq!(store.apply_enrichment(far), DeltaOutcome::OutOfView(2));

        // Inside the bounds but filtered out by status, in both paths.
        let taken = spot(3, SpotStatus::Occupied);
        assert_eq!(store.apply_delta(Delta::Upsert(taken)), DeltaOutcome::OutOfView(3));
        store.apply_delta(Delta::Patch(SpotPatch::status(4, SpotStatus::Reserved)));
        assert_eq!(
            store.apply_enrichment(spot(4, SpotStatus::Available)),
            DeltaOutcome::OutOfView(4)
        );

        assert_eq!(
            store.apply_delta(Delta::Upsert(spot(5, SpotStatus::Available))),
            DeltaOutcome::Applied
        );
        assert_eq!(ids(&store), vec![1, 5]);

        // Known records still take status changes regardless of the filter.
        assert_eq!(
            store.apply_delta(Delta::Upsert(spot(5, SpotStatus::Occupied))),
            DeltaOutcome::Applied
        );
        assert_eq!(store.get(5).map(|s| s.status), Some(SpotStatus::Occupied));
    }

    #[test]
    fn repeated_identical_delta_is_unchanged() {
        let mut store = SpotStore::new();
        store.apply_viewport_snapshot(vec![spot(1, SpotStatus::Available)]);
        let d = Delta::Patch(SpotPatch::status(1, SpotStatus::Occupied));
        assert_eq!(store.apply_delta(d.clone()), DeltaOutcome::Applied);
        let rev = store.revision();
        assert_eq!(store.apply_delta(d), DeltaOutcome::Unchanged);
        assert_eq!(store.revision(), rev);
    }

    #[test]
    fn delta_timestamp_overrides_and_is_not_inherited() {
        let mut store = SpotStore::new();
        let mut base = spot(1, SpotStatus::Available);
        base.last_updated = Some("snapshot".to_string());
        store.apply_viewport_snapshot(vec![base]);

        store.apply_delta(Delta::Patch(SpotPatch {
            last_updated: Some("delta".to_string()),
            ..SpotPatch::status(1, SpotStatus::Occupied)
        }));
        assert_eq!(store.get(1).and_then(|s| s.last_updated.clone()).as_deref(), Some("delta"));

        store.apply_delta(Delta::Patch(SpotPatch::status(1, SpotStatus::Reserved)));
        assert_eq!(store.get(1).and_then(|s| s.last_updated.clone()).as_deref(), Some("snapshot"));
    }

    #[test]
    fn stale_viewport_result_is_discarded() {
        let mut store = SpotStore::new();
        let old = store.begin_viewport(GeoBounds::new(0.0, 0.0, 1.0, 1.0), None);
        let new = store.begin_viewport(GeoBounds::new(37.9, 23.6, 38.1, 23.9), None);

        let fresh = store.apply_viewport_result(new.view_id, vec![spot(1, SpotStatus::Available)]);
        assert_eq!(fresh, SnapshotOutcome::Applied);
        let late = store.apply_viewport_result(old.view_id, vec![spot(42, SpotStatus::Available)]);
        assert_eq!(late, SnapshotOutcome::Stale);
        assert_eq!(ids(&store), vec![1]);

        let again = store.apply_viewport_result(new.view_id, vec![spot(1, SpotStatus::Available)]);
        assert_eq!(again, SnapshotOutcome::Unchanged);
    }

    #[test]
    fn ids_stay_unique_under_mixed_traffic() {
        let mut store = SpotStore::new();
        // Small deterministic LCG so the sequence is reproducible.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move || {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            (seed >> 33) as i64
        };
        let statuses = SpotStatus::ALL;

        for step in 0..500 {
            let id = next() % 20;
            let status = statuses[(next() % 4) as usize];
            match next() % 3 {
                0 => {
                    let n = next() % 10;
                    let snap: Vec<Spot> = (0..n).map(|i| spot((id + i) % 20, status)).collect();
                    let expected: BTreeSet<SpotId> = snap.iter().map(|s| s.id).collect();
                    store.apply_viewport_snapshot(snap);
                    let got: BTreeSet<SpotId> = store.spots().iter().map(|s| s.id).collect();
                    assert_eq!(got, expected, "step {step}");
                }
                1 => {
                    store.apply_delta(Delta::Upsert(spot(id, status)));
                }
                _ => {
                    store.apply_delta(Delta::Patch(SpotPatch::status(id, status)));
                }
            }
            assert_unique(&store);
            assert!(store.spots().windows(2).all(|w| w[0].id < w[1].id));
        }
    }

    #[test]
    fn counts_by_status() {
        let mut store = SpotStore::new();
        store.apply_viewport_snapshot(vec![
            spot(1, SpotStatus::Available),
            spot(2, SpotStatus::Available),
            spot(3, SpotStatus::Occupied),
        ]);
        let counts = store.counts_by_status();
        assert_eq!(counts.get(&SpotStatus::Available), Some(&2));
        assert_eq!(counts.get(&SpotStatus::Occupied), Some(&1));
        assert_eq!(counts.get(&SpotStatus::Reserved), None);
    }

    #[test]
    fn viewport_then_patch_end_to_end() {
        let mut store = SpotStore::new();
        let req = store.begin_viewport(GeoBounds::new(37.9, 23.6, 38.1, 23.9), None);

        let raw = json!([
            {"id": 1, "status": "Available", "lat": 37.98, "lng": 23.73, "location": "A"}
        ]);
        let fetched: Vec<Spot> = raw.as_array().unwrap().iter().map(normalize).collect();
        assert_eq!(store.apply_viewport_result(req.view_id, fetched), SnapshotOutcome::Applied);

        let delta =
            decode(r#"{"type": "spot_patch", "spot": {"id": 1, "status": "Occupied"}}"#).unwrap();
        assert_eq!(store.apply_delta(delta), DeltaOutcome::Applied);

        assert_eq!(store.len(), 1);
        let s = &store.spots()[0];
        assert_eq!(s.id, 1);
        assert_eq!(s.status, SpotStatus::Occupied);
        assert_eq!(s.latitude, 37.98);
        assert_eq!(s.location, "A");
    }
}
