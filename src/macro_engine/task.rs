//! Compiles a parsed [`MacroExpr`](crate::macro_engine::parser::MacroExpr)
//! into a tree of cooperative tasks and runs it (spec.md §4.F).
//!
//! Two lifecycle signals drive the whole tree: `press` (the triggering
//! combination became complete) and `release` (it became incomplete).
//! Between those, the scheduler calls `tick` whenever a task's own timer
//! expires. Nothing here blocks; every wait is a timed suspension the
//! caller resumes by calling `tick` again at or after `next_deadline`.

use std::time::{Duration, Instant};

use super::parser::{Arg, Call, Literal, MacroExpr};
use super::vars::MacroVars;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("unknown macro task '{0}'")]
    UnknownTask(String),
    #[error("task '{task}' expects {expected}, got {got} argument(s)")]
    ArityMismatch {
        task: String,
        expected: String,
        got: usize,
    },
    #[error("task '{task}' argument '{which}' must be {expected}")]
    ArgType {
        task: String,
        which: String,
        expected: String,
    },
    #[error("task '{0}' does not take a chained input (nothing precedes it with `.`)")]
    UnexpectedChain(String),
    #[error("task '{0}' requires a chained input, e.g. `key(A).{0}()`")]
    MissingChain(String),
}

/// One observable side effect a task wants performed. The macro engine
/// never writes to a uinput device directly; the caller resolves
/// `symbol` against the process-wide symbol table and the target's
/// registry entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Key { symbol: String, down: bool },
    Mouse { dx: i32, dy: i32 },
    Wheel { amount: i32, horizontal: bool },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ModifyOp {
    Multiply(f64),
    Negate,
    Clamp(f64, f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModTapState {
    Pending,
    Tapped,
    Held,
}

/// A compiled, stateful macro task. Owns both its static configuration
/// and the mutable runtime state accrued across press/tick/release
/// calls — safe because exactly one dispatcher thread per injection
/// ever touches a given macro's tree (spec.md §5).
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Key {
        symbol: String,
        pressed: bool,
    },
    Mouse {
        dx: i32,
        dy: i32,
    },
    Wheel {
        amount: i32,
        horizontal: bool,
    },
    Set {
        var: String,
        value: f64,
    },
    AddVar {
        var: String,
        delta: f64,
    },
    Modify {
        var: String,
        op: ModifyOp,
    },
    Wait {
        duration: Duration,
        deadline: Option<Instant>,
    },
    Hold {
        body: Box<Node>,
        interval: Duration,
        next_fire: Option<Instant>,
        held: bool,
    },
    Repeat {
        body: Box<Node>,
        count: u32,
        remaining: u32,
        interval: Duration,
        next_fire: Option<Instant>,
    },
    IfTap {
        tap: Box<Node>,
        hold: Option<Box<Node>>,
        timeout: Duration,
        deadline: Option<Instant>,
        resolved: Option<bool>,
    },
    IfSingle {
        body: Box<Node>,
        timeout: Duration,
        deadline: Option<Instant>,
        resolved: bool,
    },
    ModTap {
        tap_symbol: String,
        hold_symbol: String,
        timeout: Duration,
        deadline: Option<Instant>,
        state: ModTapState,
    },
    /// The `parallel(SYM, SYM, ...)`/`hold_keys(SYM, SYM, ...)` task: a
    /// simultaneous chord, all members pressed together and released
    /// together.
    Chord {
        symbols: Vec<String>,
        pressed: bool,
    },
    /// `key_down(SYM)`: presses and keeps `SYM` down until this task (or
    /// an enclosing macro) releases, independent of its own `release`
    /// lifecycle signal — pairs with [`Node::KeyUp`] in a sequence.
    KeyDown {
        symbol: String,
        pressed: bool,
    },
    /// `key_up(SYM)`: releases `SYM` once, fire-and-forget.
    KeyUp {
        symbol: String,
        fired: bool,
    },
    /// `body.if_eq(var, value)`: runs `body` iff `var` currently equals
    /// `value`, decided at press time (no timeout).
    IfEq {
        body: Box<Node>,
        var: String,
        value: f64,
        triggered: bool,
    },
    /// Two tasks joined by `.` where the left side doesn't take the
    /// right as a body argument: run left to settlement, then run right.
    Sequence {
        a: Box<Node>,
        b: Box<Node>,
        started_b: bool,
    },
    /// Two tasks joined by `+`: both run concurrently from the same
    /// press signal.
    Parallel {
        a: Box<Node>,
        b: Box<Node>,
    },
}

impl Node {
    pub fn press(&mut self, now: Instant, vars: &MacroVars) -> Vec<Effect> {
        match self {
            Node::Key { symbol, pressed } => {
                if *pressed {
                    return vec![];
                }
                *pressed = true;
                vec![Effect::Key {
                    symbol: symbol.clone(),
                    down: true,
                }]
            }
            Node::Mouse { dx, dy } => vec![Effect::Mouse { dx: *dx, dy: *dy }],
            Node::Wheel { amount, horizontal } => vec![Effect::Wheel {
                amount: *amount,
                horizontal: *horizontal,
            }],
            Node::Set { var, value } => {
                vars.set(var, *value);
                vec![]
            }
            Node::AddVar { var, delta } => {
                vars.add(var, *delta);
                vec![]
            }
            Node::Modify { var, op } => {
                apply_modify(vars, var, *op);
                vec![]
            }
            Node::Wait { duration, deadline } => {
                *deadline = Some(now + *duration);
                vec![]
            }
            Node::Hold {
                body,
                interval,
                next_fire,
                held,
            } => {
                *held = true;
                *next_fire = Some(now + *interval);
                body.press(now, vars)
            }
            Node::Repeat {
                body,
                count,
                remaining,
                interval,
                next_fire,
            } => {
                *remaining = *count;
                if *remaining == 0 {
                    *next_fire = None;
                    return vec![];
                }
                *remaining -= 1;
                *next_fire = Some(now + *interval);
                body.press(now, vars)
            }
            Node::IfTap {
                deadline,
                timeout,
                resolved,
                ..
            } => {
                *deadline = Some(now + *timeout);
                *resolved = None;
                vec![]
            }
            Node::IfSingle {
                deadline,
                timeout,
                resolved,
                ..
            } => {
                *deadline = Some(now + *timeout);
                *resolved = false;
                vec![]
            }
            Node::ModTap {
                deadline,
                timeout,
                state,
                ..
            } => {
                *deadline = Some(now + *timeout);
                *state = ModTapState::Pending;
                vec![]
            }
            Node::Chord { symbols, pressed } => {
                if *pressed {
                    return vec![];
                }
                *pressed = true;
                symbols
                    .iter()
                    .map(|s| Effect::Key {
                        symbol: s.clone(),
                        down: true,
                    })
                    .collect()
            }
            Node::Sequence { a, b, started_b } => {
                *started_b = false;
                let mut effects = a.press(now, vars);
                if a.is_settled() {
                    *started_b = true;
                    effects.extend(b.press(now, vars));
                }
                effects
            }
            Node::Parallel { a, b } => {
                let mut effects = a.press(now, vars);
                effects.extend(b.press(now, vars));
                effects
            }
            Node::KeyDown { symbol, pressed } => {
                if *pressed {
                    return vec![];
                }
                *pressed = true;
                vec![Effect::Key {
                    symbol: symbol.clone(),
                    down: true,
                }]
            }
            Node::KeyUp { symbol, fired } => {
                if *fired {
                    return vec![];
                }
                *fired = true;
                vec![Effect::Key {
                    symbol: symbol.clone(),
                    down: false,
                }]
            }
            Node::IfEq {
                body,
                var,
                value,
                triggered,
            } => {
                *triggered = values_eq(vars.get(var), *value);
                if *triggered {
                    body.press(now, vars)
                } else {
                    vec![]
                }
            }
        }
    }

    pub fn release(&mut self, now: Instant, vars: &MacroVars) -> Vec<Effect> {
        match self {
            Node::Key { symbol, pressed } => {
                if !*pressed {
                    return vec![];
                }
                *pressed = false;
                vec![Effect::Key {
                    symbol: symbol.clone(),
                    down: false,
                }]
            }
            Node::Mouse { .. } | Node::Wheel { .. } | Node::Set { .. } | Node::AddVar { .. } | Node::Modify { .. } => {
                vec![]
            }
            Node::Wait { deadline, .. } => {
                *deadline = None;
                vec![]
            }
            Node::Hold {
                body,
                next_fire,
                held,
                ..
            } => {
                *held = false;
                *next_fire = None;
                body.release(now, vars)
            }
            Node::Repeat {
                body, next_fire, ..
            } => {
                *next_fire = None;
                body.release(now, vars)
            }
            Node::IfTap {
                tap,
                hold,
                resolved,
                deadline,
                ..
            } => match resolved {
                None => {
                    *resolved = Some(true);
                    *deadline = None;
                    let mut effects = tap.press(now, vars);
                    effects.extend(tap.release(now, vars));
                    effects
                }
                Some(true) => tap.release(now, vars),
                Some(false) => hold
                    .as_deref_mut()
                    .map(|h| h.release(now, vars))
                    .unwrap_or_default(),
            },
            Node::IfSingle {
                body,
                resolved,
                deadline,
                ..
            } => {
                if *resolved {
                    return vec![];
                }
                *resolved = true;
                *deadline = None;
                let mut effects = body.press(now, vars);
                effects.extend(body.release(now, vars));
                effects
            }
            Node::ModTap {
                tap_symbol,
                hold_symbol,
                state,
                deadline,
                ..
            } => {
                *deadline = None;
                match state {
                    ModTapState::Pending => {
                        *state = ModTapState::Tapped;
                        vec![
                            Effect::Key {
                                symbol: tap_symbol.clone(),
                                down: true,
                            },
                            Effect::Key {
                                symbol: tap_symbol.clone(),
                                down: false,
                            },
                        ]
                    }
                    ModTapState::Held => {
                        *state = ModTapState::Pending;
                        vec![Effect::Key {
                            symbol: hold_symbol.clone(),
                            down: false,
                        }]
                    }
                    ModTapState::Tapped => vec![],
                }
            }
            Node::Chord { symbols, pressed } => {
                if !*pressed {
                    return vec![];
                }
                *pressed = false;
                symbols
                    .iter()
                    .rev()
                    .map(|s| Effect::Key {
                        symbol: s.clone(),
                        down: false,
                    })
                    .collect()
            }
            Node::Sequence { a, b, started_b } => {
                let mut effects = a.release(now, vars);
                if *started_b {
                    effects.extend(b.release(now, vars));
                }
                effects
            }
            Node::Parallel { a, b } => {
                let mut effects = a.release(now, vars);
                effects.extend(b.release(now, vars));
                effects
            }
            Node::KeyDown { symbol, pressed } => {
                if !*pressed {
                    return vec![];
                }
                *pressed = false;
                vec![Effect::Key {
                    symbol: symbol.clone(),
                    down: false,
                }]
            }
            Node::KeyUp { .. } => vec![],
            Node::IfEq { body, triggered, .. } => {
                if !*triggered {
                    return vec![];
                }
                *triggered = false;
                body.release(now, vars)
            }
        }
    }

    pub fn tick(&mut self, now: Instant, vars: &MacroVars) -> Vec<Effect> {
        match self {
            Node::Key { .. }
            | Node::Mouse { .. }
            | Node::Wheel { .. }
            | Node::Set { .. }
            | Node::AddVar { .. }
            | Node::Modify { .. }
            | Node::Chord { .. }
            | Node::KeyDown { .. }
            | Node::KeyUp { .. } => vec![],
            Node::Wait { deadline, .. } => {
                if let Some(d) = *deadline {
                    if now >= d {
                        *deadline = None;
                    }
                }
                vec![]
            }
            Node::Hold {
                body,
                interval,
                next_fire,
                held,
            } => {
                if !*held {
                    return vec![];
                }
                let mut effects = body.tick(now, vars);
                if let Some(fire) = *next_fire {
                    if now >= fire {
                        effects.extend(body.release(now, vars));
                        effects.extend(body.press(now, vars));
                        *next_fire = Some(now + *interval);
                    }
                }
                effects
            }
            Node::Repeat {
                body,
                remaining,
                interval,
                next_fire,
                ..
            } => {
                let mut effects = body.tick(now, vars);
                if let Some(fire) = *next_fire {
                    if now >= fire {
                        effects.extend(body.release(now, vars));
                        if *remaining > 0 {
                            *remaining -= 1;
                            effects.extend(body.press(now, vars));
                            *next_fire = Some(now + *interval);
                        } else {
                            *next_fire = None;
                        }
                    }
                }
                effects
            }
            Node::IfTap {
                tap,
                hold,
                deadline,
                resolved,
                ..
            } => {
                if resolved.is_none() {
                    if let Some(d) = *deadline {
                        if now >= d {
                            *resolved = Some(false);
                            *deadline = None;
                            return hold
                                .as_deref_mut()
                                .map(|h| h.press(now, vars))
                                .unwrap_or_default();
                        }
                    }
                    return vec![];
                }
                match resolved {
                    Some(true) => tap.tick(now, vars),
                    Some(false) => hold.as_deref_mut().map(|h| h.tick(now, vars)).unwrap_or_default(),
                    None => unreachable!(),
                }
            }
            Node::IfSingle {
                deadline, resolved, ..
            } => {
                if !*resolved {
                    if let Some(d) = *deadline {
                        if now >= d {
                            *resolved = true;
                            *deadline = None;
                        }
                    }
                }
                vec![]
            }
            Node::ModTap {
                hold_symbol,
                deadline,
                state,
                ..
            } => {
                if *state == ModTapState::Pending {
                    if let Some(d) = *deadline {
                        if now >= d {
                            *state = ModTapState::Held;
                            *deadline = None;
                            return vec![Effect::Key {
                                symbol: hold_symbol.clone(),
                                down: true,
                            }];
                        }
                    }
                }
                vec![]
            }
            Node::Sequence { a, b, started_b } => {
                let mut effects = Vec::new();
                if !a.is_settled() {
                    effects.extend(a.tick(now, vars));
                }
                if a.is_settled() && !*started_b {
                    *started_b = true;
                    effects.extend(b.press(now, vars));
                }
                if *started_b {
                    effects.extend(b.tick(now, vars));
                }
                effects
            }
            Node::Parallel { a, b } => {
                let mut effects = a.tick(now, vars);
                effects.extend(b.tick(now, vars));
                effects
            }
            Node::IfEq { body, triggered, .. } => {
                if *triggered {
                    body.tick(now, vars)
                } else {
                    vec![]
                }
            }
        }
    }

    /// Whether this task's own triggering work has run to completion,
    /// used by [`Node::Sequence`] to decide when to start its successor.
    /// Instantaneous tasks settle the moment they're pressed; tasks with
    /// their own hold/timeout state settle only once that state resolves.
    pub fn is_settled(&self) -> bool {
        match self {
            Node::Key { .. }
            | Node::Mouse { .. }
            | Node::Wheel { .. }
            | Node::Set { .. }
            | Node::AddVar { .. }
            | Node::Modify { .. }
            | Node::Chord { .. }
            | Node::KeyDown { .. }
            | Node::KeyUp { .. } => true,
            Node::Wait { deadline, .. } => deadline.is_none(),
            Node::Hold { held, .. } => !*held,
            Node::Repeat { next_fire, .. } => next_fire.is_none(),
            Node::IfTap { resolved, tap, hold, .. } => match resolved {
                Some(true) => tap.is_settled(),
                Some(false) => hold.as_deref().map(Node::is_settled).unwrap_or(true),
                None => false,
            },
            Node::IfSingle { resolved, .. } => *resolved,
            Node::ModTap { state, .. } => *state != ModTapState::Pending,
            Node::Sequence { a, b, started_b } => *started_b && a.is_settled() && b.is_settled(),
            Node::Parallel { a, b } => a.is_settled() && b.is_settled(),
            Node::IfEq { body, triggered, .. } => !*triggered || body.is_settled(),
        }
    }

    /// The earliest time this task (or a descendant) needs another
    /// `tick` call, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self {
            Node::Key { .. }
            | Node::Mouse { .. }
            | Node::Wheel { .. }
            | Node::Set { .. }
            | Node::AddVar { .. }
            | Node::Modify { .. }
            | Node::Chord { .. }
            | Node::KeyDown { .. }
            | Node::KeyUp { .. } => None,
            Node::Wait { deadline, .. } => *deadline,
            Node::Hold { body, next_fire, .. } => earliest(*next_fire, body.next_deadline()),
            Node::Repeat { body, next_fire, .. } => earliest(*next_fire, body.next_deadline()),
            Node::IfTap {
                deadline, tap, hold, resolved, ..
            } => match resolved {
                None => *deadline,
                Some(true) => tap.next_deadline(),
                Some(false) => hold.as_deref().and_then(Node::next_deadline),
            },
            Node::IfSingle { deadline, resolved, .. } => {
                if *resolved {
                    None
                } else {
                    *deadline
                }
            }
            Node::ModTap { deadline, state, .. } => {
                if *state == ModTapState::Pending {
                    *deadline
                } else {
                    None
                }
            }
            Node::Sequence { a, b, started_b } => {
                if !*started_b {
                    a.next_deadline()
                } else {
                    earliest(a.next_deadline(), b.next_deadline())
                }
            }
            Node::Parallel { a, b } => earliest(a.next_deadline(), b.next_deadline()),
            Node::IfEq { body, triggered, .. } => {
                if *triggered {
                    body.next_deadline()
                } else {
                    None
                }
            }
        }
    }

    /// Cancels this task and all descendants, releasing any keys still
    /// held (spec.md §4.F cancellation guarantee).
    pub fn cancel(&mut self, now: Instant, vars: &MacroVars) -> Vec<Effect> {
        self.release(now, vars)
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn apply_modify(vars: &MacroVars, var: &str, op: ModifyOp) {
    let current = vars.get(var);
    let next = match op {
        ModifyOp::Multiply(factor) => current * factor,
        ModifyOp::Negate => -current,
        ModifyOp::Clamp(min, max) => current.clamp(min, max),
    };
    vars.set(var, next);
}

fn is_body_task(name: &str) -> bool {
    matches!(name, "hold" | "repeat" | "if_tap" | "if_single" | "if_eq")
}

fn values_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

struct Args<'a> {
    task: &'a str,
    items: &'a [Arg],
}

impl<'a> Args<'a> {
    fn positional(&self, idx: usize) -> Option<&'a Literal> {
        let mut seen = 0;
        for arg in self.items {
            if let Arg::Positional(lit) = arg {
                if seen == idx {
                    return Some(lit);
                }
                seen += 1;
            }
        }
        None
    }

    fn named(&self, name: &str) -> Option<&'a Literal> {
        self.items.iter().find_map(|arg| match arg {
            Arg::Named(n, lit) if n == name => Some(lit),
            _ => None,
        })
    }

    fn get(&self, idx: usize, name: &str) -> Option<&'a Literal> {
        self.named(name).or_else(|| self.positional(idx))
    }

    fn require_symbol(&self, idx: usize, name: &str) -> Result<String, CompileError> {
        match self.get(idx, name) {
            Some(Literal::Symbol(s)) => Ok(s.clone()),
            Some(Literal::Str(s)) => Ok(s.clone()),
            _ => Err(CompileError::ArgType {
                task: self.task.to_string(),
                which: name.to_string(),
                expected: "a key symbol".to_string(),
            }),
        }
    }

    fn require_int(&self, idx: usize, name: &str) -> Result<i64, CompileError> {
        match self.get(idx, name) {
            Some(Literal::Int(n)) => Ok(*n),
            Some(Literal::Float(f)) => Ok(*f as i64),
            _ => Err(CompileError::ArgType {
                task: self.task.to_string(),
                which: name.to_string(),
                expected: "an integer".to_string(),
            }),
        }
    }

    fn require_float(&self, idx: usize, name: &str) -> Result<f64, CompileError> {
        match self.get(idx, name) {
            Some(Literal::Int(n)) => Ok(*n as f64),
            Some(Literal::Float(f)) => Ok(*f),
            _ => Err(CompileError::ArgType {
                task: self.task.to_string(),
                which: name.to_string(),
                expected: "a number".to_string(),
            }),
        }
    }

    fn float_or(&self, idx: usize, name: &str, default: f64) -> f64 {
        self.require_float(idx, name).unwrap_or(default)
    }

    fn int_or(&self, idx: usize, name: &str, default: i64) -> i64 {
        self.require_int(idx, name).unwrap_or(default)
    }
}

/// Compiles one [`MacroExpr`] into an executable [`Node`] tree.
pub fn compile(expr: &MacroExpr) -> Result<Node, CompileError> {
    match expr {
        MacroExpr::Call(call) => compile_call(call, None),
        MacroExpr::Chain(prev, call) => {
            let prev_node = compile(prev)?;
            if is_body_task(&call.task) {
                compile_call(call, Some(prev_node))
            } else {
                let next = compile_call(call, None)?;
                Ok(Node::Sequence {
                    a: Box::new(prev_node),
                    b: Box::new(next),
                    started_b: false,
                })
            }
        }
        MacroExpr::Parallel(a, b) => Ok(Node::Parallel {
            a: Box::new(compile(a)?),
            b: Box::new(compile(b)?),
        }),
    }
}

fn compile_call(call: &Call, implicit_body: Option<Node>) -> Result<Node, CompileError> {
    let args = Args {
        task: &call.task,
        items: &call.args,
    };

    let require_body = |args_label: &str| -> Result<Box<Node>, CompileError> {
        implicit_body
            .clone()
            .map(Box::new)
            .ok_or_else(|| CompileError::MissingChain(args_label.to_string()))
    };

    match call.task.as_str() {
        "key" => {
            if implicit_body.is_some() {
                return Err(CompileError::UnexpectedChain("key".to_string()));
            }
            Ok(Node::Key {
                symbol: args.require_symbol(0, "symbol")?,
                pressed: false,
            })
        }
        "mouse" => {
            if implicit_body.is_some() {
                return Err(CompileError::UnexpectedChain("mouse".to_string()));
            }
            Ok(Node::Mouse {
                dx: args.require_int(0, "dx")? as i32,
                dy: args.require_int(1, "dy")? as i32,
            })
        }
        "wheel" => {
            if implicit_body.is_some() {
                return Err(CompileError::UnexpectedChain("wheel".to_string()));
            }
            Ok(Node::Wheel {
                amount: args.require_int(0, "amount")? as i32,
                horizontal: args.int_or(1, "horizontal", 0) != 0,
            })
        }
        "set" => {
            if implicit_body.is_some() {
                return Err(CompileError::UnexpectedChain("set".to_string()));
            }
            Ok(Node::Set {
                var: args.require_symbol(0, "var")?,
                value: args.require_float(1, "value")?,
            })
        }
        "add" => {
            if implicit_body.is_some() {
                return Err(CompileError::UnexpectedChain("add".to_string()));
            }
            Ok(Node::AddVar {
                var: args.require_symbol(0, "var")?,
                delta: args.require_float(1, "delta")?,
            })
        }
        "modify" => {
            if implicit_body.is_some() {
                return Err(CompileError::UnexpectedChain("modify".to_string()));
            }
            let var = args.require_symbol(0, "var")?;
            let op_name = args.require_symbol(1, "op")?;
            let op = match op_name.as_str() {
                "multiply" => ModifyOp::Multiply(args.require_float(2, "factor")?),
                "negate" => ModifyOp::Negate,
                "clamp" => ModifyOp::Clamp(
                    args.require_float(2, "min")?,
                    args.require_float(3, "max")?,
                ),
                other => {
                    return Err(CompileError::ArgType {
                        task: "modify".to_string(),
                        which: "op".to_string(),
                        expected: format!("one of multiply/negate/clamp, got '{other}'"),
                    });
                }
            };
            Ok(Node::Modify { var, op })
        }
        "wait" => {
            if implicit_body.is_some() {
                return Err(CompileError::UnexpectedChain("wait".to_string()));
            }
            let ms = args.require_int(0, "ms")?;
            Ok(Node::Wait {
                duration: Duration::from_millis(ms.max(0) as u64),
                deadline: None,
            })
        }
        "hold" => {
            let body = require_body("hold")?;
            let interval_ms = args.int_or(0, "interval_ms", 100).max(1);
            Ok(Node::Hold {
                body,
                interval: Duration::from_millis(interval_ms as u64),
                next_fire: None,
                held: false,
            })
        }
        "repeat" => {
            let body = require_body("repeat")?;
            let count = args.require_int(0, "count")?.max(0) as u32;
            let interval_ms = args.int_or(1, "interval_ms", 0).max(0);
            Ok(Node::Repeat {
                body,
                count,
                remaining: 0,
                interval: Duration::from_millis(interval_ms as u64),
                next_fire: None,
            })
        }
        "if_tap" => {
            let tap = require_body("if_tap")?;
            let hold = match args.get(0, "else") {
                Some(Literal::Symbol(s)) | Some(Literal::Str(s)) => Some(Box::new(Node::Key {
                    symbol: s.clone(),
                    pressed: false,
                })),
                Some(_) => {
                    return Err(CompileError::ArgType {
                        task: "if_tap".to_string(),
                        which: "else".to_string(),
                        expected: "a key symbol".to_string(),
                    });
                }
                None => None,
            };
            let timeout_ms = args.int_or(1, "timeout_ms", 300).max(1);
            Ok(Node::IfTap {
                tap,
                hold,
                timeout: Duration::from_millis(timeout_ms as u64),
                deadline: None,
                resolved: None,
            })
        }
        "if_single" => {
            let body = require_body("if_single")?;
            let timeout_ms = args.int_or(0, "timeout_ms", 300).max(1);
            Ok(Node::IfSingle {
                body,
                timeout: Duration::from_millis(timeout_ms as u64),
                deadline: None,
                resolved: false,
            })
        }
        "key_down" => {
            if implicit_body.is_some() {
                return Err(CompileError::UnexpectedChain("key_down".to_string()));
            }
            Ok(Node::KeyDown {
                symbol: args.require_symbol(0, "symbol")?,
                pressed: false,
            })
        }
        "key_up" => {
            if implicit_body.is_some() {
                return Err(CompileError::UnexpectedChain("key_up".to_string()));
            }
            Ok(Node::KeyUp {
                symbol: args.require_symbol(0, "symbol")?,
                fired: false,
            })
        }
        "hold_keys" => {
            if implicit_body.is_some() {
                return Err(CompileError::UnexpectedChain("hold_keys".to_string()));
            }
            if call.args.is_empty() {
                return Err(CompileError::ArityMismatch {
                    task: "hold_keys".to_string(),
                    expected: "at least one symbol".to_string(),
                    got: 0,
                });
            }
            let mut symbols = Vec::with_capacity(call.args.len());
            for (idx, arg) in call.args.iter().enumerate() {
                let literal = match arg {
                    Arg::Positional(lit) => lit,
                    Arg::Named(_, lit) => lit,
                };
                match literal {
                    Literal::Symbol(s) => symbols.push(s.clone()),
                    Literal::Str(s) => symbols.push(s.clone()),
                    _ => {
                        return Err(CompileError::ArgType {
                            task: "hold_keys".to_string(),
                            which: format!("#{idx}"),
                            expected: "a key symbol".to_string(),
                        });
                    }
                }
            }
            Ok(Node::Chord {
                symbols,
                pressed: false,
            })
        }
        "if_eq" => {
            let body = require_body("if_eq")?;
            let var = args.require_symbol(0, "var")?;
            let value = args.require_float(1, "value")?;
            Ok(Node::IfEq {
                body,
                var,
                value,
                triggered: false,
            })
        }
        "mod_tap" => {
            if implicit_body.is_some() {
                return Err(CompileError::UnexpectedChain("mod_tap".to_string()));
            }
            let tap_symbol = args.require_symbol(0, "tap_symbol")?;
            let hold_symbol = args.require_symbol(1, "hold_symbol")?;
            let timeout_ms = args.int_or(2, "timeout_ms", 200).max(1);
            Ok(Node::ModTap {
                tap_symbol,
                hold_symbol,
                timeout: Duration::from_millis(timeout_ms as u64),
                deadline: None,
                state: ModTapState::Pending,
            })
        }
        "parallel" => {
            if implicit_body.is_some() {
                return Err(CompileError::UnexpectedChain("parallel".to_string()));
            }
            if call.args.is_empty() {
                return Err(CompileError::ArityMismatch {
                    task: "parallel".to_string(),
                    expected: "at least one symbol".to_string(),
                    got: 0,
                });
            }
            let mut symbols = Vec::with_capacity(call.args.len());
            for (idx, arg) in call.args.iter().enumerate() {
                let literal = match arg {
                    Arg::Positional(lit) => lit,
                    Arg::Named(_, lit) => lit,
                };
                match literal {
                    Literal::Symbol(s) => symbols.push(s.clone()),
                    Literal::Str(s) => symbols.push(s.clone()),
                    _ => {
                        return Err(CompileError::ArgType {
                            task: "parallel".to_string(),
                            which: format!("#{idx}"),
                            expected: "a key symbol".to_string(),
                        });
                    }
                }
            }
            Ok(Node::Chord {
                symbols,
                pressed: false,
            })
        }
        other => Err(CompileError::UnknownTask(other.to_string())),
    }
}
