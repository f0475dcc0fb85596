//! Handler graph (spec.md §4.G, §4.H, §9 "dynamic dispatch over handler
//! types"): a DAG rooted at input signatures, compiled once per
//! injection from a [`crate::mapping::Preset`].
//!
//! The source project dispatches over a fixed set of Python classes.
//! We reimplement that as a closed tagged-union ([`HandlerKind`])
//! dispatched by an exhaustive match, held in an arena and addressed by
//! stable [`HandlerId`]s rather than owning references — combination
//! and hierarchy handlers hold arrays of child ids, never reference
//! cycles (spec.md §9 "cyclic references").

pub mod analog;
pub mod axis_btn;
pub mod combination;
pub mod graph;
pub mod leaf;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::time::Instant;

use smallvec::SmallVec;

use crate::event::InputEvent;
use crate::macro_engine::MacroVars;
use crate::symbol_table::SymbolTable;
use crate::uinput::GlobalUinputs;

pub use graph::{BuildReport, HandlerGraph};

/// Stable id into a [`HandlerGraph`]'s arena. Never reused within one
/// graph's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub(crate) usize);

/// What a handler did with an event (spec.md §4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Do not forward; this handler owns the event.
    Consumed,
    /// Forward to the per-device forward uinput.
    NotHandled,
    /// Pass to the next handler registered for this signature.
    Chain,
}

/// Everything a handler needs to act: where to write output, how to
/// resolve symbol names, and the shared macro variable map. Borrowed
/// for the duration of one `dispatch` call; never stored by a handler.
pub struct DispatchContext<'a> {
    pub registry: &'a GlobalUinputs,
    pub symbols: &'a SymbolTable,
    pub vars: &'a MacroVars,
    pub now: Instant,
}

impl DispatchContext<'_> {
    fn write_key(&self, target: &str, code: u16, down: bool, origin_hash: u64) {
        let event = InputEvent::new(crate::kernel::EV_KEY, code, down as i32, origin_hash);
        if let Err(e) = self.registry.write(&event, target) {
            tracing::warn!(target, code, down, error = %e, "dropped key write");
        }
    }

    fn write_raw(&self, target: &str, event: &InputEvent) {
        if let Err(e) = self.registry.write(event, target) {
            tracing::warn!(target, error = %e, "dropped uinput write");
        }
    }
}

/// One node in the handler graph. A closed set dispatched by exhaustive
/// match (spec.md §9) rather than trait objects, since the shapes are
/// fixed at compile time.
pub enum HandlerKind {
    Key(leaf::KeyHandler),
    Macro(leaf::MacroHandler),
    Combination(combination::CombinationHandler),
    Hierarchy(Box<HierarchyHandler>),
    AbsToBtn(axis_btn::AbsToBtnHandler),
    RelToBtn(axis_btn::RelToBtnHandler),
    AbsToAbs(analog::AbsToAbsHandler),
    AbsToRel(analog::AbsToRelHandler),
    RelToAbs(analog::RelToAbsHandler),
    RelToRel(analog::RelToRelHandler),
    /// Transient tombstone used only while a node has been moved out of
    /// the arena for recursive dispatch (see [`HandlerGraph::dispatch_handler`]).
    /// Never observed outside of one call stack.
    Placeholder,
}

impl HandlerKind {
    fn handle(
        &mut self,
        event: &InputEvent,
        ctx: &DispatchContext,
        graph: &mut HandlerGraph,
    ) -> DispatchOutcome {
        match self {
            HandlerKind::Key(h) => h.handle(event, ctx),
            HandlerKind::Macro(h) => h.handle(event, ctx),
            HandlerKind::Combination(h) => h.handle(event, ctx, graph),
            HandlerKind::Hierarchy(h) => h.handle(event, ctx, graph),
            HandlerKind::AbsToBtn(h) => h.handle(event, ctx, graph),
            HandlerKind::RelToBtn(h) => h.handle(event, ctx, graph),
            HandlerKind::AbsToAbs(h) => h.handle(event, ctx),
            HandlerKind::AbsToRel(h) => h.handle(event, ctx),
            HandlerKind::RelToAbs(h) => h.handle(event, ctx),
            HandlerKind::RelToRel(h) => h.handle(event, ctx),
            HandlerKind::Placeholder => {
                debug_assert!(false, "dispatch recursed into a tombstoned handler");
                DispatchOutcome::NotHandled
            }
        }
    }

    /// Releases any output this handler is currently holding (spec.md
    /// §4.I / §5: "no injection may leave a key stuck down"). Called on
    /// every arena entry when an injection stops.
    fn release_all(&mut self, ctx: &DispatchContext, graph: &mut HandlerGraph) {
        match self {
            HandlerKind::Key(h) => h.release_if_held(ctx),
            HandlerKind::Macro(h) => h.cancel(ctx),
            HandlerKind::Combination(h) => h.release_if_active(ctx),
            HandlerKind::Hierarchy(h) => h.release_all(ctx, graph),
            HandlerKind::AbsToBtn(h) => h.release_if_latched(ctx, graph),
            HandlerKind::RelToBtn(h) => h.release_if_latched(ctx, graph),
            HandlerKind::AbsToAbs(_)
            | HandlerKind::AbsToRel(_)
            | HandlerKind::RelToAbs(_)
            | HandlerKind::RelToRel(_)
            | HandlerKind::Placeholder => {}
        }
    }

    /// Advances time-driven state (release timers, per-tick analog
    /// emission). Returns the next instant this handler wants to be
    /// ticked again, if any.
    fn tick(&mut self, ctx: &DispatchContext, graph: &mut HandlerGraph) -> Option<Instant> {
        match self {
            HandlerKind::RelToBtn(h) => h.tick(ctx, graph),
            HandlerKind::AbsToRel(h) => h.tick(ctx),
            HandlerKind::Combination(h) => {
                h.tick(ctx);
                h.next_deadline()
            }
            _ => None,
        }
    }
}

/// Wraps several mappings that share an input signature but whose
/// combinations differ in length or specificity (spec.md §4.G step 3).
/// Longer/more specific combinations are offered the event first; a
/// child only "wins" by actually firing (transitioning from partial to
/// active) — if it can't yet (e.g. its other modifiers aren't held),
/// control falls through to the next, shorter entry.
pub struct HierarchyHandler {
    /// `(combination length, child id)`, sorted longest-first. Ties are
    /// broken by insertion order, which the builder derives from the
    /// preset so the most recently declared mapping wins.
    pub(crate) entries: Vec<(usize, HandlerId)>,
}

impl HierarchyHandler {
    fn handle(
        &mut self,
        event: &InputEvent,
        ctx: &DispatchContext,
        graph: &mut HandlerGraph,
    ) -> DispatchOutcome {
        for &(_, child) in &self.entries {
            match graph.dispatch_handler(child, event, ctx) {
                DispatchOutcome::Chain => continue,
                other => return other,
            }
        }
        DispatchOutcome::NotHandled
    }

    fn release_all(&mut self, ctx: &DispatchContext, graph: &mut HandlerGraph) {
        for &(_, child) in &self.entries {
            graph.release_handler(child, ctx);
        }
    }
}

/// Arena entry point index: which handler ids are registered for a
/// given `(type, code, origin_hash)` signature.
pub(crate) type SignatureIndex = HashMap<(u16, u16, u64), SmallVec<[HandlerId; 2]>>;
