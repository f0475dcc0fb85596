//! Leaf handlers: the two things a combination or axis-to-button
//! handler can ultimately drive (spec.md §4.G "Key handler" / "Macro
//! handler").

use std::time::Instant;

use super::{DispatchContext, DispatchOutcome};
use crate::event::InputEvent;
use crate::macro_engine::{Effect, Macro};

/// Emits a single key event — value 1 on press, 0 on release — to the
/// target uinput. The symbolic name is resolved to a keycode once, at
/// build time, against the process-global symbol table (spec.md §4.G).
pub struct KeyHandler {
    pub target: String,
    pub keycode: u16,
    origin_hash: u64,
    held: bool,
}

impl KeyHandler {
    pub fn new(target: String, keycode: u16, origin_hash: u64) -> Self {
        Self {
            target,
            keycode,
            origin_hash,
            held: false,
        }
    }

    pub fn press(&mut self, ctx: &DispatchContext) {
        self.held = true;
        ctx.write_key(&self.target, self.keycode, true, self.origin_hash);
    }

    pub fn release(&mut self, ctx: &DispatchContext) {
        self.held = false;
        ctx.write_key(&self.target, self.keycode, false, self.origin_hash);
    }

    pub fn release_if_held(&mut self, ctx: &DispatchContext) {
        if self.held {
            self.release(ctx);
        }
    }

    /// A bare `KeyHandler` is only ever reached as a combination's leaf
    /// in the degenerate case where the graph builder short-circuits a
    /// single-`EV_KEY` combination; dispatch on its own signature still
    /// goes through [`super::combination::CombinationHandler`], so this
    /// is exercised directly only in unit tests.
    pub(crate) fn handle(&mut self, event: &InputEvent, ctx: &DispatchContext) -> DispatchOutcome {
        if event.value != 0 {
            self.press(ctx);
        } else {
            self.release(ctx);
        }
        DispatchOutcome::Consumed
    }
}

/// Runs a compiled macro through its press/release/tick lifecycle
/// (spec.md §4.G "Macro handler"), translating its [`Effect`]s into
/// uinput writes.
pub struct MacroHandler {
    pub target: String,
    macro_instance: Macro,
    origin_hash: u64,
}

impl MacroHandler {
    pub fn new(target: String, macro_instance: Macro, origin_hash: u64) -> Self {
        Self {
            target,
            macro_instance,
            origin_hash,
        }
    }

    fn apply(&self, ctx: &DispatchContext, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Key { symbol, down } => match ctx.symbols.resolve(&symbol) {
                    Ok(code) => ctx.write_key(&self.target, code, down, self.origin_hash),
                    Err(e) => tracing::warn!(symbol, error = %e, "macro referenced unknown symbol"),
                },
                Effect::Mouse { dx, dy } => {
                    if dx != 0 {
                        let e = InputEvent::new(crate::kernel::EV_REL, crate::kernel::rel::REL_X, dx, self.origin_hash);
                        ctx.write_raw(&self.target, &e);
                    }
                    if dy != 0 {
                        let e = InputEvent::new(crate::kernel::EV_REL, crate::kernel::rel::REL_Y, dy, self.origin_hash);
                        ctx.write_raw(&self.target, &e);
                    }
                }
                Effect::Wheel { amount, horizontal } => {
                    let code = if horizontal {
                        crate::kernel::rel::REL_HWHEEL
                    } else {
                        crate::kernel::rel::REL_WHEEL
                    };
                    let e = InputEvent::new(crate::kernel::EV_REL, code, amount, self.origin_hash);
                    ctx.write_raw(&self.target, &e);
                }
            }
        }
    }

    pub fn press(&mut self, ctx: &DispatchContext) {
        let effects = self.macro_instance.press(ctx.now, ctx.vars);
        self.apply(ctx, effects);
    }

    pub fn release(&mut self, ctx: &DispatchContext) {
        let effects = self.macro_instance.release(ctx.now, ctx.vars);
        self.apply(ctx, effects);
    }

    pub fn tick(&mut self, now: Instant, ctx: &DispatchContext) {
        let effects = self.macro_instance.tick(now, ctx.vars);
        self.apply(ctx, effects);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.macro_instance.next_deadline()
    }

    pub fn cancel(&mut self, ctx: &DispatchContext) {
        let effects = self.macro_instance.cancel(ctx.now, ctx.vars);
        self.apply(ctx, effects);
    }

    pub(crate) fn handle(&mut self, event: &InputEvent, ctx: &DispatchContext) -> DispatchOutcome {
        if event.value != 0 {
            self.press(ctx);
        } else {
            self.release(ctx);
        }
        DispatchOutcome::Consumed
    }
}

/// Either leaf kind a combination or axis-to-button handler can drive.
pub enum Leaf {
    Key(KeyHandler),
    Macro(MacroHandler),
}

impl Leaf {
    pub fn press(&mut self, ctx: &DispatchContext) {
        match self {
            Leaf::Key(h) => h.press(ctx),
            Leaf::Macro(h) => h.press(ctx),
        }
    }

    pub fn release(&mut self, ctx: &DispatchContext) {
        match self {
            Leaf::Key(h) => h.release(ctx),
            Leaf::Macro(h) => h.release(ctx),
        }
    }

    pub fn release_if_held(&mut self, ctx: &DispatchContext) {
        match self {
            Leaf::Key(h) => h.release_if_held(ctx),
            Leaf::Macro(h) => h.cancel(ctx),
        }
    }

    /// Advances a held macro's internal timers (mod_tap/hold/repeat
    /// deadlines). A no-op for a plain key leaf.
    pub fn tick(&mut self, ctx: &DispatchContext) {
        if let Leaf::Macro(h) = self {
            h.tick(ctx.now, ctx);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match self {
            Leaf::Key(_) => None,
            Leaf::Macro(h) => h.next_deadline(),
        }
    }
}
