//! Mutable generation state: which address/mask bindings are live on the
//! main path versus the remainder path.

use tracing::debug;

use crate::error::{ConfigError, Result};

/// A side whose bindings can switch between main and remainder variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
    Staging,
}

/// The three-dimensional remainder description masks are derived from:
/// row bound, column bound, and the k bound the loop is consuming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemainderBounds {
    pub rows: i64,
    pub cols: i64,
    pub k: i64,
}

/// Masks derived for one side. Derivation is pure in `(bounds, k_offset)`,
/// so re-deriving with the same offset is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskSet {
    pub bounds: RemainderBounds,
    pub k_offset: i64,
}

impl MaskSet {
    fn derive(bounds: RemainderBounds, k_offset: i64) -> Self {
        Self { bounds, k_offset }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SideState {
    active: bool,
    masks: Option<MaskSet>,
    /// How many times addresses were (re)derived. Activation while already
    /// active must refresh masks without touching addresses.
    addr_derivations: u32,
}

/// Active-set state for the whole generation, snapshotted before scheduling
/// so the short path can restore (not re-initialize) it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenState {
    bounds: Option<RemainderBounds>,
    a: SideState,
    b: SideState,
    staging: SideState,
}

impl GenState {
    pub fn new(bounds: Option<RemainderBounds>) -> Self {
        Self { bounds, a: SideState::default(), b: SideState::default(), staging: SideState::default() }
    }

    fn side_mut(&mut self, side: Side) -> &mut SideState {
        match side {
            Side::A => &mut self.a,
            Side::B => &mut self.b,
            Side::Staging => &mut self.staging,
        }
    }

    fn side(&self, side: Side) -> &SideState {
        match side {
            Side::A => &self.a,
            Side::B => &self.b,
            Side::Staging => &self.staging,
        }
    }

    pub fn is_active(&self, side: Side) -> bool {
        self.side(side).active
    }

    pub fn masks(&self, side: Side) -> Option<MaskSet> {
        self.side(side).masks
    }

    #[cfg(test)]
    pub(crate) fn addr_derivations(&self, side: Side) -> u32 {
        self.side(side).addr_derivations
    }

    /// Switch `side` to its remainder bindings.
    ///
    /// Idempotent: activating an already-active side only refreshes its
    /// masks from the current remainder description (with `k_offset`
    /// applied), without re-deriving addresses.
    pub fn activate(&mut self, side: Side, k_offset: i64) -> Result<()> {
        let bounds = self.bounds.ok_or(ConfigError::MasksUnavailable { side })?;
        let state = self.side_mut(side);
        let masks = MaskSet::derive(bounds, k_offset);
        if state.active {
            state.masks = Some(masks);
            return Ok(());
        }
        debug!(?side, k_offset, "activating remainder bindings");
        state.active = true;
        state.masks = Some(masks);
        state.addr_derivations += 1;
        Ok(())
    }

    /// Switch `side` back to its main bindings, tearing down its masks.
    ///
    /// Deactivating a side that is not active would silently drop a
    /// remainder path the schedule still needs, so it is a fatal
    /// generation error.
    pub fn deactivate(&mut self, side: Side) -> Result<()> {
        let state = self.side_mut(side);
        if !state.active {
            return Err(ConfigError::InvalidTransition { side, detail: "deactivate on an inactive side" });
        }
        debug!(?side, "deactivating remainder bindings");
        state.active = false;
        state.masks = None;
        Ok(())
    }

    /// Restore a snapshot taken before scheduling mutated anything.
    pub fn restore(&mut self, snapshot: &GenState) {
        *self = snapshot.clone();
    }
}
