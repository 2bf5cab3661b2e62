use foundation::GeoBounds;

use crate::spot::SpotStatus;

/// Monotonically increasing id for viewport requests, used for ordering and
/// cancellation: only the latest issued id may land.
pub type ViewId = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct ViewportRequest {
    pub view_id: ViewId,
    pub bounds: GeoBounds,
    pub status: Option<SpotStatus>,
}

/// Issues view ids and remembers the latest one (last request wins).
#[derive(Debug, Default)]
pub struct ViewportTracker {
    last_issued: ViewId,
    current: Option<ViewportRequest>,
}

impl ViewportTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, bounds: GeoBounds, status: Option<SpotStatus>) -> ViewportRequest {
        self.last_issued += 1;
        let req = ViewportRequest {
            view_id: self.last_issued,
            bounds,
            status,
        };
        self.current = Some(req.clone());
        req
    }

    pub fn is_current(&self, view_id: ViewId) -> bool {
        self.current.as_ref().is_some_and(|r| r.view_id == view_id)
    }

    pub fn current(&self) -> Option<&ViewportRequest> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use foundation::GeoBounds;

    use super::ViewportTracker;

    #[test]
    fn only_latest_request_is_current() {
        let mut t = ViewportTracker::new();
        let a = t.begin(GeoBounds::new(0.0, 0.0, 1.0, 1.0), None);
        let b = t.begin(GeoBounds::new(1.0, 1.0, 2.0, 2.0), None);
        assert!(b.view_id > a.view_id);
        assert!(!t.is_current(a.view_id));
        assert!(t.is_current(b.view_id));
        assert_eq!(t.current().map(|r| r.bounds), Some(b.bounds));
    }

    #[test]
    fn nothing_is_current_before_first_request() {
        let t = ViewportTracker::new();
        assert!(!t.is_current(0));
        assert!(t.current().is_none());
    }
}
