//! Single-writer detection state with watch-based subscriptions.
//!
//! The engine is the only writer. Views subscribe and always observe a
//! complete, consistent [`Snapshot`].

use facelens_core::{DetectionResult, Size};
use facelens_hw::SourceKind;
use std::sync::Arc;
use tokio::sync::watch;

/// Detection loop phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopPhase {
    #[default]
    Idle,
    /// Source acquired, waiting for a ready frame and loaded models.
    Starting,
    Detecting,
}

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Session that owns the published state; bumped on every start.
    pub session: u64,
    pub phase: LoopPhase,
    pub camera_on: bool,
    pub source: Option<SourceKind>,
    pub native_size: Size,
    pub display_size: Size,
    pub detections: Arc<Vec<DetectionResult>>,
}

pub struct DetectionStore {
    tx: watch::Sender<Snapshot>,
}

impl Default for DetectionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Snapshot::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    /// Open a new session for `source`, superseding any previous one.
    pub fn begin_session(&self, source: SourceKind) -> u64 {
        let mut session = 0;
        self.tx.send_modify(|s| {
            s.session += 1;
            session = s.session;
            s.phase = LoopPhase::Starting;
            s.source = Some(source);
            s.camera_on = false;
            s.native_size = Size::default();
            s.display_size = Size::default();
            s.detections = Arc::default();
        });
        session
    }

    /// Replace the published detections. Ignored when `session` is stale.
    pub fn set_detections(&self, session: u64, detections: Vec<DetectionResult>) -> bool {
        self.tx.send_if_modified(|s| {
            if s.session != session {
                return false;
            }
            s.detections = Arc::new(detections);
            true
        })
    }

    pub fn reset_detections(&self) {
        self.tx.send_if_modified(|s| {
            if s.detections.is_empty() {
                return false;
            }
            s.detections = Arc::default();
            true
        });
    }

    pub fn set_camera_on(&self, on: bool) {
        self.tx.send_if_modified(|s| {
            let changed = s.camera_on != on;
            s.camera_on = on;
            changed
        });
    }

    /// Move `session` to `phase`. Ignored when `session` is stale.
    pub fn set_phase(&self, session: u64, phase: LoopPhase) -> bool {
        self.tx.send_if_modified(|s| {
            if s.session != session || s.phase == phase {
                return false;
            }
            s.phase = phase;
            true
        })
    }

    pub fn set_sizes(&self, session: u64, native: Size, display: Size) -> bool {
        self.tx.send_if_modified(|s| {
            if s.session != session {
                return false;
            }
            s.native_size = native;
            s.display_size = display;
            true
        })
    }

    pub fn set_display_size(&self, display: Size) {
        self.tx.send_if_modified(|s| {
            let changed = s.display_size != display;
            s.display_size = display;
            changed
        });
    }

    /// End `session` on its own (still image done, camera gone). Ignored
    /// when `session` is stale.
    pub fn finish_session(&self, session: u64, keep_detections: bool) -> bool {
        self.tx.send_if_modified(|s| {
            if s.session != session {
                return false;
            }
            s.phase = LoopPhase::Idle;
            s.camera_on = false;
            if !keep_detections {
                s.detections = Arc::default();
            }
            true
        })
    }

    /// Return to Idle with nothing published.
    pub fn clear(&self) {
        self.tx.send_modify(|s| {
            s.phase = LoopPhase::Idle;
            s.camera_on = false;
            s.detections = Arc::default();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facelens_core::BoundingBox;

    fn det() -> DetectionResult {
        DetectionResult::from_box(BoundingBox { x: 1.0, y: 2.0, width: 3.0, height: 4.0, score: 0.9 })
    }

    #[test]
    fn test_stale_session_cannot_publish() {
        let store = DetectionStore::new();
        let old = store.begin_session(SourceKind::Live);
        let new = store.begin_session(SourceKind::Still);
        assert!(!store.set_detections(old, vec![det()]));
        assert!(store.snapshot().detections.is_empty());
        assert!(store.set_detections(new, vec![det()]));
        assert_eq!(store.snapshot().detections.len(), 1);
    }

    #[test]
    fn test_begin_session_resets_state() {
        let store = DetectionStore::new();
        let s = store.begin_session(SourceKind::Live);
        store.set_detections(s, vec![det()]);
        store.set_camera_on(true);
        store.begin_session(SourceKind::Still);
        let snap = store.snapshot();
        assert_eq!(snap.phase, LoopPhase::Starting);
        assert_eq!(snap.source, Some(SourceKind::Still));
        assert!(!snap.camera_on);
        assert!(snap.detections.is_empty());
    }

    #[test]
    fn test_clear_returns_to_idle() {
        let store = DetectionStore::new();
        let s = store.begin_session(SourceKind::Live);
        store.set_phase(s, LoopPhase::Detecting);
        store.set_camera_on(true);
        store.set_detections(s, vec![det()]);
        store.clear();
        let snap = store.snapshot();
        assert_eq!(snap.phase, LoopPhase::Idle);
        assert!(!snap.camera_on);
        assert!(snap.detections.is_empty());
    }

    #[test]
    fn test_finish_session_keeps_or_clears() {
        let store = DetectionStore::new();
        let s = store.begin_session(SourceKind::Still);
        store.set_detections(s, vec![det()]);
        assert!(store.finish_session(s, true));
        assert_eq!(store.snapshot().phase, LoopPhase::Idle);
        assert_eq!(store.snapshot().detections.len(), 1);

        let s = store.begin_session(SourceKind::Live);
        store.set_detections(s, vec![det()]);
        assert!(!store.finish_session(s - 1, false));
        assert!(store.finish_session(s, false));
        assert!(store.snapshot().detections.is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let store = DetectionStore::new();
        let mut rx = store.subscribe();
        let s = store.begin_session(SourceKind::Live);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().phase, LoopPhase::Starting);
        store.set_detections(s, vec![det(), det()]);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().detections.len(), 2);
    }

    #[test]
    fn test_reset_detections_only_notifies_on_change() {
        let store = DetectionStore::new();
        let rx = store.subscribe();
        store.reset_detections();
        assert!(!rx.has_changed().unwrap());
    }
}
