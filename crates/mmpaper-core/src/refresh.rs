//! Partial/full refresh policy for the e-ink panel.

use log::{info, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RefreshConfig {
    /// Minimum spacing between full refreshes.
    pub full_refresh_min_interval_ms: u64,
    /// Partial refreshes allowed before a full one is wanted.
    pub partial_refresh_max_count: u8,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            full_refresh_min_interval_ms: 10_000,
            partial_refresh_max_count: 5,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RefreshKind {
    /// Fast update of changed pixels; accumulates ghosting.
    Partial,
    /// Clears ghosting.
    Full,
}

impl RefreshKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Partial => "partial",
            Self::Full => "full",
        }
    }
}

/// Pushes the current frame to the panel.
pub trait RefreshPanel {
    type Error;

    fn refresh(&mut self, kind: RefreshKind) -> Result<(), Self::Error>;
}

/// Process-lifetime refresh bookkeeping.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RefreshState {
    pub partial_count: u8,
    pub last_full_refresh_ms: Option<u64>,
    pub dirty: bool,
}

impl RefreshState {
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Kind of refresh the next `smart_refresh` would issue.
    pub fn next_kind(&self, config: &RefreshConfig, now_ms: u64) -> RefreshKind {
        // Boot counts as the last full refresh.
        let since_full = now_ms.saturating_sub(self.last_full_refresh_ms.unwrap_or(0));
        let interval_elapsed = since_full >= config.full_refresh_min_interval_ms;
        if interval_elapsed && self.partial_count >= config.partial_refresh_max_count {
            RefreshKind::Full
        } else {
            RefreshKind::Partial
        }
    }

    /// Refreshes the panel when dirty. Returns the kind issued, `None` when
    /// there was nothing to do. On panel error the state is unchanged.
    pub fn smart_refresh<P: RefreshPanel>(
        &mut self,
        panel: &mut P,
        config: &RefreshConfig,
        now_ms: u64,
    ) -> Result<Option<RefreshKind>, P::Error> {
        if !self.dirty {
            return Ok(None);
        }
        let kind = self.next_kind(config, now_ms);
        self.issue(panel, kind, now_ms)?;
        Ok(Some(kind))
    }

    /// Full refresh regardless of counters.
    pub fn force_full<P: RefreshPanel>(
        &mut self,
        panel: &mut P,
        now_ms: u64,
    ) -> Result<(), P::Error> {
        self.issue(panel, RefreshKind::Full, now_ms)
    }

    fn issue<P: RefreshPanel>(
        &mut self,
        panel: &mut P,
        kind: RefreshKind,
        now_ms: u64,
    ) -> Result<(), P::Error> {
        if let Err(err) = panel.refresh(kind) {
            warn!("refresh: {} refresh failed; frame stays pending", kind.as_str());
            return Err(err);
        }
        self.applied(kind, now_ms);
        Ok(())
    }

    fn applied(&mut self, kind: RefreshKind, now_ms: u64) {
        match kind {
            RefreshKind::Full => {
                self.partial_count = 0;
                self.last_full_refresh_ms = Some(now_ms);
            }
            RefreshKind::Partial => {
                self.partial_count = self.partial_count.saturating_add(1);
            }
        }
        self.dirty = false;
        info!(
            "refresh: {} done partial_count={}",
            kind.as_str(),
            self.partial_count
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[derive(Default)]
    struct RecordingPanel {
        issued: Vec<RefreshKind>,
        fail: bool,
    }

    impl RefreshPanel for RecordingPanel {
        type Error = ();

        fn refresh(&mut self, kind: RefreshKind) -> Result<(), ()> {
            if self.fail {
                return Err(());
            }
            self.issued.push(kind);
            Ok(())
        }
    }

    #[test]
    fn clean_state_is_a_no_op() {
        let mut panel = RecordingPanel::default();
        let mut state = RefreshState::default();
        assert_eq!(
            state.smart_refresh(&mut panel, &RefreshConfig::default(), 60_000),
            Ok(None)
        );
        assert!(panel.issued.is_empty());
    }

    #[test]
    fn five_quick_partials_then_full_after_interval() {
        let config = RefreshConfig::default();
        let mut panel = RecordingPanel::default();
        let mut state = RefreshState::default();
        state.force_full(&mut panel, 1_000).unwrap();

        for step in 0..5u64 {
            state.mark_dirty();
            let kind = state
                .smart_refresh(&mut panel, &config, 1_100 + step * 100)
                .unwrap();
            assert_eq!(kind, Some(RefreshKind::Partial));
        }
        assert_eq!(state.partial_count, 5);

        // Counter is at the limit but the interval has not elapsed.
        state.mark_dirty();
        assert_eq!(
            state.smart_refresh(&mut panel, &config, 2_000).unwrap(),
            Some(RefreshKind::Partial)
        );
        assert_eq!(state.partial_count, 6);

        state.mark_dirty();
        assert_eq!(
            state.smart_refresh(&mut panel, &config, 11_000).unwrap(),
            Some(RefreshKind::Full)
        );
        assert_eq!(state.partial_count, 0);
        assert_eq!(state.last_full_refresh_ms, Some(11_000));
        assert!(!state.dirty);
    }

    #[test]
    fn panel_error_keeps_frame_dirty_and_counters() {
        let mut panel = RecordingPanel {
            fail: true,
            ..RecordingPanel::default()
        };
        let mut state = RefreshState {
            partial_count: 2,
            last_full_refresh_ms: Some(5),
            dirty: true,
        };
        let before = state;

        assert_eq!(
            state.smart_refresh(&mut panel, &RefreshConfig::default(), 50_000),
            Err(())
        );
        assert_eq!(state, before);
        assert_eq!(state.force_full(&mut panel, 50_000), Err(()));
        assert_eq!(state, before);
    }

    #[test]
    fn boot_counts_as_last_full_refresh() {
        let state = RefreshState {
            partial_count: 5,
            last_full_refresh_ms: None,
            dirty: true,
        };
        let config = RefreshConfig::default();
        assert_eq!(state.next_kind(&config, 9_999), RefreshKind::Partial);
        assert_eq!(state.next_kind(&config, 10_000), RefreshKind::Full);
    }
}
