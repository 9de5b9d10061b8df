//! Name registries for value-functions and rule predicates.
//!
//! A registry is an explicit value handed to each [`EvalContext`], not a
//! hidden global. Names resolve late: strategies reference "sma" or a
//! user-registered predicate by name and bind positional parameters when the
//! context looks them up.

use std::collections::HashMap;
use std::rc::Rc;

use crate::domain::context::EvalContext;
use crate::domain::error::TickreplayError;
use crate::domain::indicator::Indicator;
use crate::domain::series::Series;

/// Value-producing callable: `(series, index, params, context) -> value`.
/// Absent output means "no value here", exactly like an indicator tick.
pub type ValueFn = Rc<dyn Fn(&Series, usize, &[f64], &EvalContext) -> Option<f64>>;

/// The indexed view a rule predicate receives.
pub struct RuleView<'a> {
    pub series: &'a Series,
    pub index: usize,
    pub ctx: &'a EvalContext,
}

/// Rule callable: `(indexed view, params) -> bool`.
pub type RuleFn = Rc<dyn Fn(&RuleView<'_>, &[f64]) -> bool>;

#[derive(Clone)]
pub struct FuncEntry {
    pub arity: usize,
    pub call: ValueFn,
}

#[derive(Clone)]
pub struct RuleEntry {
    pub arity: usize,
    pub call: RuleFn,
}

/// What `register_*` does when the name already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// Fail with `DuplicateName`.
    #[default]
    Reject,
    /// Replace the previous entry.
    Overwrite,
}

pub struct Registry {
    funcs: HashMap<String, FuncEntry>,
    rules: HashMap<String, RuleEntry>,
    policy: CollisionPolicy,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_policy(CollisionPolicy::Reject)
    }

    pub fn with_policy(policy: CollisionPolicy) -> Self {
        Registry {
            funcs: HashMap::new(),
            rules: HashMap::new(),
            policy,
        }
    }

    pub fn register_func(
        &mut self,
        name: &str,
        arity: usize,
        f: impl Fn(&Series, usize, &[f64], &EvalContext) -> Option<f64> + 'static,
    ) -> Result<(), TickreplayError> {
        if self.policy == CollisionPolicy::Reject && self.funcs.contains_key(name) {
            return Err(TickreplayError::DuplicateName(name.to_string()));
        }
        self.funcs.insert(
            name.to_string(),
            FuncEntry {
                arity,
                call: Rc::new(f),
            },
        );
        Ok(())
    }

    pub fn register_rule(
        &mut self,
        name: &str,
        arity: usize,
        f: impl Fn(&RuleView<'_>, &[f64]) -> bool + 'static,
    ) -> Result<(), TickreplayError> {
        if self.policy == CollisionPolicy::Reject && self.rules.contains_key(name) {
            return Err(TickreplayError::DuplicateName(name.to_string()));
        }
        self.rules.insert(
            name.to_string(),
            RuleEntry {
                arity,
                call: Rc::new(f),
            },
        );
        Ok(())
    }

    pub fn func(&self, name: &str) -> Result<FuncEntry, TickreplayError> {
        self.funcs
            .get(name)
            .cloned()
            .ok_or_else(|| TickreplayError::UnknownName(name.to_string()))
    }

    pub fn rule(&self, name: &str) -> Result<RuleEntry, TickreplayError> {
        self.rules
            .get(name)
            .cloned()
            .ok_or_else(|| TickreplayError::UnknownName(name.to_string()))
    }
}

/// First parameter as a positive whole period count.
fn period_param(params: &[f64]) -> Option<usize> {
    let p = *params.first()?;
    if p >= 1.0 && p.fract() == 0.0 {
        Some(p as usize)
    } else {
        None
    }
}

/// Registry pre-loaded with the price fields and built-in indicators.
///
/// Indicator funcs resolve through the context cache, so repeated references
/// to e.g. `sma(20)` share one instance per series. A parameter that cannot
/// build an indicator (zero window, fractional period) yields absent values
/// rather than failing mid-scan.
pub fn builtin_registry() -> Registry {
    let mut registry = Registry::new();

    let fields: [(&str, fn(&Series, usize) -> f64); 6] = [
        ("open", |s, i| s.candle(i).open),
        ("high", |s, i| s.candle(i).high),
        ("low", |s, i| s.candle(i).low),
        ("close", |s, i| s.candle(i).close),
        ("volume", |s, i| s.candle(i).volume as f64),
        ("typical", |s, i| s.candle(i).typical_price()),
    ];
    for (name, extract) in fields {
        registry
            .register_func(name, 0, move |series, index, _, _| {
                Some(extract(series, index))
            })
            .expect("fresh registry");
    }

    registry
        .register_func("sma", 1, |_, index, params, ctx| {
            let periods = period_param(params)?;
            ctx.sma(periods).ok()?.value_at(index).value
        })
        .expect("fresh registry");
    registry
        .register_func("ema", 1, |_, index, params, ctx| {
            let periods = period_param(params)?;
            ctx.ema(periods).ok()?.value_at(index).value
        })
        .expect("fresh registry");
    registry
        .register_func("wma", 1, |_, index, params, ctx| {
            let periods = period_param(params)?;
            ctx.wma(periods).ok()?.value_at(index).value
        })
        .expect("fresh registry");
    registry
        .register_func("stddev", 1, |_, index, params, ctx| {
            let periods = period_param(params)?;
            ctx.stddev(periods).ok()?.value_at(index).value
        })
        .expect("fresh registry");
    registry
        .register_func("rsi", 1, |_, index, params, ctx| {
            let periods = period_param(params)?;
            ctx.rsi(periods).ok()?.value_at(index).value
        })
        .expect("fresh registry");
    registry
        .register_func("atr", 1, |_, index, params, ctx| {
            let periods = period_param(params)?;
            ctx.atr(periods).ok()?.value_at(index).value
        })
        .expect("fresh registry");
    registry
        .register_func("obv", 0, |_, index, _, ctx| {
            ctx.obv().value_at(index).value
        })
        .expect("fresh registry");

    registry
}
