//! Macro engine (spec.md §4.F): parses the small task expression
//! language once at HandlerGraph build time, then runs the compiled
//! tree cooperatively off press/release signals from a combination
//! handler.

pub mod parser;
pub mod task;
pub mod vars;

use std::time::Instant;

pub use task::{CompileError, Effect};
pub use vars::MacroVars;

use parser::ParseError;
use task::Node;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MacroError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// One compiled, independently-runnable macro instance. A preset with
/// the same macro bound to several mappings compiles it once and
/// instantiates one `Macro` per active combination (each carries its
/// own timers and held-key state).
#[derive(Debug, Clone)]
pub struct Macro {
    root: Node,
}

impl Macro {
    pub fn compile(source: &str) -> Result<Self, MacroError> {
        let expr = parser::parse(source)?;
        let root = task::compile(&expr)?;
        Ok(Self { root })
    }

    pub fn press(&mut self, now: Instant, vars: &MacroVars) -> Vec<Effect> {
        self.root.press(now, vars)
    }

    pub fn release(&mut self, now: Instant, vars: &MacroVars) -> Vec<Effect> {
        self.root.release(now, vars)
    }

    pub fn tick(&mut self, now: Instant, vars: &MacroVars) -> Vec<Effect> {
        self.root.tick(now, vars)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.root.next_deadline()
    }

    /// Cancels this macro, releasing any keys it still holds (spec.md
    /// §4.F: "when a macro is asked to stop, all its descendant tasks
    /// are cancelled and any held keys are released").
    pub fn cancel(&mut self, now: Instant, vars: &MacroVars) -> Vec<Effect> {
        self.root.cancel(now, vars)
    }
}
