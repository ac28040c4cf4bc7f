//! Scheduled tasks: requirement/action pairs with optional guards and
//! ordered path alternatives.

use smallvec::SmallVec;

use crate::iteration::Iteration;
use crate::requirement::Requirement;

/// A side-effecting closure over the generation context and the cursor.
///
/// The context is passed explicitly to every action; tasks never capture
/// shared mutable state by reference.
pub type Action<C> = Box<dyn FnMut(&mut C, Iteration)>;

/// A generation-time predicate deciding whether an occurrence participates.
pub type Guard<C> = Box<dyn Fn(&C, Iteration) -> bool>;

/// One path alternative of a task: a requirement, the action it fires, and
/// an optional participation guard.
///
/// Alternative 0 is the main path; the last alternative is the remainder
/// path. Guards are evaluated once per occurrence the linearizer considers;
/// a rejection at the first considered occurrence drops the alternative for
/// the whole generation.
pub struct Alt<C> {
    pub req: Requirement,
    pub(crate) action: Action<C>,
    pub(crate) guard: Option<Guard<C>>,
    pub(crate) guard_seen: bool,
    pub(crate) dropped: bool,
}

impl<C> Alt<C> {
    pub fn new(req: Requirement, action: impl FnMut(&mut C, Iteration) + 'static) -> Self {
        Self { req, action: Box::new(action), guard: None, guard_seen: false, dropped: false }
    }

    pub fn guarded(
        req: Requirement,
        action: impl FnMut(&mut C, Iteration) + 'static,
        guard: impl Fn(&C, Iteration) -> bool + 'static,
    ) -> Self {
        Self { req, action: Box::new(action), guard: Some(Box::new(guard)), guard_seen: false, dropped: false }
    }

    /// Consult the guard for the occurrence at `it`, applying the
    /// first-occurrence drop rule, and run the action if it participates.
    pub(crate) fn fire(&mut self, ctx: &mut C, it: Iteration) {
        if self.dropped {
            return;
        }
        if let Some(guard) = &self.guard {
            let ok = guard(ctx, it);
            if !self.guard_seen {
                self.guard_seen = true;
                if !ok {
                    self.dropped = true;
                }
            }
            if !ok {
                return;
            }
        }
        (self.action)(ctx, it);
    }
}

/// A registered task: ordered alternatives for one logical purpose.
pub struct Task<C> {
    pub(crate) alts: SmallVec<[Alt<C>; 2]>,
}

impl<C> Task<C> {
    /// The main-path requirement (alternative 0).
    pub(crate) fn main_req(&self) -> Requirement {
        self.alts[0].req
    }

    /// The remainder-path requirement (last alternative).
    pub(crate) fn tail_req(&self) -> Requirement {
        self.alts[self.alts.len() - 1].req
    }

    pub(crate) fn fire_main(&mut self, ctx: &mut C, it: Iteration) {
        self.alts[0].fire(ctx, it);
    }

    pub(crate) fn fire_tail(&mut self, ctx: &mut C, it: Iteration) {
        let last = self.alts.len() - 1;
        self.alts[last].fire(ctx, it);
    }
}
