//! Direct analog-to-analog transform handlers (spec.md §4.E, §4.G):
//! abs→abs, abs→rel, rel→abs, rel→rel. Each applies deadzone → expo →
//! gain once per incoming event (or, for abs→rel, once per scheduler
//! tick while the source axis remains deflected).

use std::time::{Duration, Instant};

use super::{DispatchContext, DispatchOutcome};
use crate::axis::AxisTransform;
use crate::event::InputEvent;
use crate::kernel;

const TICK_PERIOD: Duration = Duration::from_millis(1000 / 60);

fn normalize_abs(value: i32, range: (i32, i32)) -> f64 {
    let (min, max) = range;
    let center = (max + min) as f64 / 2.0;
    let half = ((max - min) as f64 / 2.0).max(1.0);
    ((value as f64 - center) / half).clamp(-1.0, 1.0)
}

pub struct AbsToAbsHandler {
    transform: AxisTransform,
    source_range: (i32, i32),
    target_range: (i32, i32),
    target: String,
    output_code: u16,
    origin_hash: u64,
}

impl AbsToAbsHandler {
    pub fn new(
        transform: AxisTransform,
        source_range: (i32, i32),
        target_range: (i32, i32),
        target: String,
        output_code: u16,
        origin_hash: u64,
    ) -> Self {
        Self {
            transform,
            source_range,
            target_range,
            target,
            output_code,
            origin_hash,
        }
    }

    pub(crate) fn handle(&mut self, event: &InputEvent, ctx: &DispatchContext) -> DispatchOutcome {
        let x = normalize_abs(event.value, self.source_range);
        let (tmin, tmax) = self.target_range;
        let y = self
            .transform
            .abs_to_abs(x, tmin as f64, tmax as f64)
            .round() as i32;
        let out = InputEvent::new(kernel::EV_ABS, self.output_code, y, self.origin_hash);
        ctx.write_raw(&self.target, &out);
        DispatchOutcome::Consumed
    }
}

/// Emits relative motion every tick while the source axis is deflected
/// past its deadzone (spec.md §4.E: "per-tick emission ... scaled by
/// the rate, 60 Hz nominal").
pub struct AbsToRelHandler {
    transform: AxisTransform,
    source_range: (i32, i32),
    target: String,
    output_code: u16,
    origin_hash: u64,
    x: f64,
    carry: f64,
    next_due: Option<Instant>,
}

impl AbsToRelHandler {
    pub fn new(
        transform: AxisTransform,
        source_range: (i32, i32),
        target: String,
        output_code: u16,
        origin_hash: u64,
    ) -> Self {
        Self {
            transform,
            source_range,
            target,
            output_code,
            origin_hash,
            x: 0.0,
            carry: 0.0,
            next_due: None,
        }
    }

    pub(crate) fn handle(&mut self, event: &InputEvent, ctx: &DispatchContext) -> DispatchOutcome {
        self.x = normalize_abs(event.value, self.source_range);
        if self.transform.apply(self.x).abs() > 1e-9 {
            self.next_due.get_or_insert(ctx.now);
        } else {
            self.next_due = None;
        }
        DispatchOutcome::Consumed
    }

    pub(crate) fn tick(&mut self, ctx: &DispatchContext) -> Option<Instant> {
        let due = self.next_due?;
        if ctx.now < due {
            return Some(due);
        }
        if self.transform.apply(self.x).abs() <= 1e-9 {
            self.next_due = None;
            return None;
        }
        self.carry += self.transform.abs_to_rel_tick(self.x, 60.0);
        let whole = self.carry.trunc();
        self.carry -= whole;
        if whole as i32 != 0 {
            let out = InputEvent::new(kernel::EV_REL, self.output_code, whole as i32, self.origin_hash);
            ctx.write_raw(&self.target, &out);
        }
        self.next_due = Some(ctx.now + TICK_PERIOD);
        self.next_due
    }

    pub(crate) fn peek_deadline(&self) -> Option<Instant> {
        self.next_due
    }
}

pub struct RelToAbsHandler {
    transform: AxisTransform,
    cutoff: f64,
    target_range: (i32, i32),
    target: String,
    output_code: u16,
    origin_hash: u64,
}

impl RelToAbsHandler {
    pub fn new(
        transform: AxisTransform,
        cutoff: f64,
        target_range: (i32, i32),
        target: String,
        output_code: u16,
        origin_hash: u64,
    ) -> Self {
        Self {
            transform,
            cutoff,
            target_range,
            target,
            output_code,
            origin_hash,
        }
    }

    pub(crate) fn handle(&mut self, event: &InputEvent, ctx: &DispatchContext) -> DispatchOutcome {
        let normalized = self.transform.rel_to_abs(event.value as f64, self.cutoff);
        let (tmin, tmax) = self.target_range;
        let center = (tmax + tmin) as f64 / 2.0;
        let half = (tmax - tmin) as f64 / 2.0;
        let y = (center + normalized * half).round() as i32;
        let out = InputEvent::new(kernel::EV_ABS, self.output_code, y, self.origin_hash);
        ctx.write_raw(&self.target, &out);
        DispatchOutcome::Consumed
    }
}

pub struct RelToRelHandler {
    transform: AxisTransform,
    cutoff: f64,
    target: String,
    output_code: u16,
    origin_hash: u64,
}

impl RelToRelHandler {
    pub fn new(
        transform: AxisTransform,
        cutoff: f64,
        target: String,
        output_code: u16,
        origin_hash: u64,
    ) -> Self {
        Self {
            transform,
            cutoff,
            target,
            output_code,
            origin_hash,
        }
    }

    pub(crate) fn handle(&mut self, event: &InputEvent, ctx: &DispatchContext) -> DispatchOutcome {
        let normalized = if self.cutoff > 0.0 {
            (event.value as f64 / self.cutoff).clamp(-1.0, 1.0)
        } else {
            event.value as f64
        };
        let y = self.transform.apply(normalized);
        let scaled = (y * self.cutoff.max(1.0)).round() as i32;
        let out = InputEvent::new(kernel::EV_REL, self.output_code, scaled, self.origin_hash);
        ctx.write_raw(&self.target, &out);
        DispatchOutcome::Consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macro_engine::MacroVars;
    use crate::symbol_table::SymbolTable;
    use crate::uinput::{GlobalUinputs, Mode};

    fn ctx<'a>(registry: &'a GlobalUinputs, symbols: &'a SymbolTable, vars: &'a MacroVars) -> DispatchContext<'a> {
        DispatchContext {
            registry,
            symbols,
            vars,
            now: Instant::now(),
        }
    }

    #[test]
    fn abs_to_abs_scales_full_deflection_to_target_max() {
        let registry = GlobalUinputs::new(Mode::Introspect);
        let symbols = SymbolTable::with_defaults();
        let vars = MacroVars::new();
        let c = ctx(&registry, &symbols, &vars);

        let mut h = AbsToAbsHandler::new(
            AxisTransform::new(0.0, 0.0, 1.0),
            (-100, 100),
            (0, 255),
            "gamepad".to_string(),
            kernel::abs::ABS_RX,
            1,
        );
        let event = InputEvent::new(kernel::EV_ABS, kernel::abs::ABS_X, 100, 1);
        assert_eq!(h.handle(&event, &c), DispatchOutcome::Consumed);
    }

    #[test]
    fn abs_to_rel_emits_nothing_inside_deadzone() {
        let registry = GlobalUinputs::new(Mode::Introspect);
        let symbols = SymbolTable::with_defaults();
        let vars = MacroVars::new();
        let c = ctx(&registry, &symbols, &vars);

        let mut h = AbsToRelHandler::new(
            AxisTransform::new(0.5, 0.0, 1.0),
            (-100, 100),
            "mouse".to_string(),
            kernel::rel::REL_X,
            1,
        );
        let event = InputEvent::new(kernel::EV_ABS, kernel::abs::ABS_X, 10, 1);
        h.handle(&event, &c);
        assert!(h.peek_deadline().is_none());
    }

    #[test]
    fn abs_to_rel_arms_ticking_once_past_deadzone() {
        let registry = GlobalUinputs::new(Mode::Introspect);
        let symbols = SymbolTable::with_defaults();
        let vars = MacroVars::new();
        let c = ctx(&registry, &symbols, &vars);

        let mut h = AbsToRelHandler::new(
            AxisTransform::new(0.0, 0.0, 1.0),
            (-100, 100),
            "mouse".to_string(),
            kernel::rel::REL_X,
            1,
        );
        let event = InputEvent::new(kernel::EV_ABS, kernel::abs::ABS_X, 100, 1);
        h.handle(&event, &c);
        assert!(h.peek_deadline().is_some());
    }
}
