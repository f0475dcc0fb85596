//! Combination handler (spec.md §4.G): fires its leaf on the
//! transition from "all but the terminal pressed, terminal just
//! pressed" to "all pressed"; releases it on any sub-input going back
//! up.

use smallvec::SmallVec;

use super::leaf::Leaf;
use super::{DispatchContext, DispatchOutcome};
use crate::event::InputEvent;
use crate::input_config::InputCombination;

pub struct CombinationHandler {
    /// Sub-input signatures in combination order; the last is terminal.
    signatures: SmallVec<[(u16, u16, u64); 4]>,
    pressed: SmallVec<[bool; 4]>,
    active: bool,
    leaf: Leaf,
}

impl CombinationHandler {
    pub fn new(combination: &InputCombination, leaf: Leaf) -> Self {
        let signatures: SmallVec<[(u16, u16, u64); 4]> =
            combination.configs().iter().map(|c| c.signature()).collect();
        let pressed = SmallVec::from_elem(false, signatures.len());
        Self {
            signatures,
            pressed,
            active: false,
            leaf,
        }
    }

    fn index_of(&self, event: &InputEvent) -> Option<usize> {
        let sig = (event.event_type, event.code, event.origin_hash);
        self.signatures.iter().position(|&s| s == sig)
    }

    /// Number of sub-inputs in the combination this handler guards —
    /// used to order [`super::HierarchyHandler`] entries longest-first.
    pub(crate) fn len(&self) -> usize {
        self.signatures.len()
    }

    pub(crate) fn handle(
        &mut self,
        event: &InputEvent,
        ctx: &DispatchContext,
        _graph: &mut super::HandlerGraph,
    ) -> DispatchOutcome {
        let Some(idx) = self.index_of(event) else {
            return DispatchOutcome::NotHandled;
        };
        let is_press = event.value != 0;
        let is_terminal = idx + 1 == self.signatures.len();

        if is_press {
            self.pressed[idx] = true;
            if is_terminal {
                if self.active {
                    // Duplicate press while already active: discarded.
                    return DispatchOutcome::Consumed;
                }
                let all_others_pressed = self.pressed[..self.pressed.len() - 1].iter().all(|&p| p);
                if all_others_pressed {
                    self.active = true;
                    self.leaf.press(ctx);
                    DispatchOutcome::Consumed
                } else {
                    // Not yet complete: let a shorter mapping on the
                    // same signature have a chance (hierarchy handler).
                    DispatchOutcome::Chain
                }
            } else {
                DispatchOutcome::Consumed
            }
        } else {
            self.pressed[idx] = false;
            if self.active {
                self.active = false;
                self.leaf.release(ctx);
            }
            DispatchOutcome::Consumed
        }
    }

    /// Advances the leaf's internal timers while the combination is
    /// active (spec.md §4.F: macros with their own deadlines — `hold`,
    /// `repeat`, `mod_tap` — need to be driven even with no new event).
    pub(crate) fn tick(&mut self, ctx: &DispatchContext) {
        if self.active {
            self.leaf.tick(ctx);
        }
    }

    pub(crate) fn next_deadline(&self) -> Option<std::time::Instant> {
        if self.active {
            self.leaf.next_deadline()
        } else {
            None
        }
    }

    pub(crate) fn release_if_active(&mut self, ctx: &DispatchContext) {
        if self.active {
            self.active = false;
            self.leaf.release(ctx);
        }
        for p in &mut self.pressed {
            *p = false;
        }
    }
}
