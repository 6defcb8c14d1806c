//! Observable coordinator flags and the per-call cancellation scope.

use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// CoordinatorFlags
// ---------------------------------------------------------------------------

/// Snapshot of the four flags a caller binds its controls to.
///
/// Only ever built through [`CoordinatorFlags::derive`], so `loading` and
/// `executing` are never both set and `can_cancel` always equals
/// `loading || executing`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorFlags {
    /// A pipeline is held and ready for requests.
    pub loaded: bool,
    /// A load operation is in flight.
    pub loading: bool,
    /// An execute operation is in flight.
    pub executing: bool,
    /// There is an active scope to cancel.
    pub can_cancel: bool,
}

impl CoordinatorFlags {
    /// Compute flags from whether a handle is held and the kind of the active
    /// scope, if any.
    pub fn derive(has_handle: bool, active: Option<ScopeKind>) -> Self {
        let loading = active == Some(ScopeKind::Load);
        let executing = active == Some(ScopeKind::Execute);
        Self {
            loaded: has_handle && !loading,
            loading,
            executing,
            can_cancel: loading || executing,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.loading || self.executing
    }
}

// ---------------------------------------------------------------------------
// Scopes
// ---------------------------------------------------------------------------

/// Which operation owns the active scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Load,
    Execute,
}

/// The cancellation context of the single in-flight call.
#[derive(Debug, Clone)]
pub struct ActiveScope {
    /// Monotonic id; lets a finishing call tell whether it is still current.
    pub id: u64,
    pub kind: ScopeKind,
    pub token: CancellationToken,
}

impl ActiveScope {
    pub fn new(id: u64, kind: ScopeKind) -> Self {
        Self {
            id,
            kind,
            token: CancellationToken::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_flags_hold_invariants() {
        for has_handle in [false, true] {
            for active in [None, Some(ScopeKind::Load), Some(ScopeKind::Execute)] {
                let f = CoordinatorFlags::derive(has_handle, active);
                assert!(!(f.loading && f.executing), "{f:?}");
                assert_eq!(f.can_cancel, f.loading || f.executing, "{f:?}");
                if f.loading {
                    assert!(!f.loaded, "{f:?}");
                }
            }
        }
    }

    #[test]
    fn default_flags_are_unloaded() {
        assert_eq!(CoordinatorFlags::derive(false, None), CoordinatorFlags::default());
    }

    #[test]
    fn executing_keeps_loaded() {
        let f = CoordinatorFlags::derive(true, Some(ScopeKind::Execute));
        assert!(f.loaded && f.executing && f.can_cancel);
        assert!(f.is_busy());
    }
}
