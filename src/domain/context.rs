//! Per-run memoizing evaluation context.
//!
//! A context binds one series to one registry handle and caches every
//! indicator it constructs, keyed by kind + ordered parameters. Rule trees
//! that reference the same indicator from several branches therefore share
//! a single instance. Contexts are cheap, thread-confined values; the cache
//! is released when the context drops, on every exit path.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::domain::error::TickreplayError;
use crate::domain::indicator::{
    atr, ema, obv, rsi, sma, stddev, wma, Indicator, PriceField, PriceSeries,
};
use crate::domain::registry::Registry;
use crate::domain::rule::Rule;
use crate::domain::series::Series;

/// One constructed-indicator parameter, hashable for cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKey {
    Int(i64),
    /// `f64` identity via its bit pattern.
    Bits(u64),
}

impl ParamKey {
    pub fn num(value: f64) -> Self {
        ParamKey::Bits(value.to_bits())
    }
}

impl From<usize> for ParamKey {
    fn from(value: usize) -> Self {
        ParamKey::Int(value as i64)
    }
}

/// Cache identity: indicator kind plus its ordered parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    kind: &'static str,
    params: Vec<ParamKey>,
}

impl CacheKey {
    pub fn new(kind: &'static str, params: Vec<ParamKey>) -> Self {
        CacheKey { kind, params }
    }
}

pub struct EvalContext {
    series: Rc<Series>,
    registry: Rc<Registry>,
    cache: RefCell<HashMap<CacheKey, Rc<dyn Indicator>>>,
}

impl EvalContext {
    pub fn new(series: Rc<Series>, registry: Rc<Registry>) -> Self {
        EvalContext {
            series,
            registry,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Run `f` with a context whose cache is guaranteed to be released when
    /// `f` returns or unwinds.
    pub fn scope<R>(
        series: Rc<Series>,
        registry: Rc<Registry>,
        f: impl FnOnce(&EvalContext) -> R,
    ) -> R {
        let ctx = EvalContext::new(series, registry);
        f(&ctx)
    }

    pub fn series(&self) -> &Rc<Series> {
        &self.series
    }

    pub fn registry(&self) -> &Rc<Registry> {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn cached_count(&self) -> usize {
        self.cache.borrow().len()
    }

    /// The cached indicator for `key`, constructing it on first request.
    /// At most one live instance exists per key per context.
    pub fn get_or_build(
        &self,
        key: CacheKey,
        build: impl FnOnce(Rc<Series>) -> Result<Rc<dyn Indicator>, TickreplayError>,
    ) -> Result<Rc<dyn Indicator>, TickreplayError> {
        if let Some(hit) = self.cache.borrow().get(&key) {
            return Ok(hit.clone());
        }
        let built = build(self.series.clone())?;
        self.cache.borrow_mut().insert(key, built.clone());
        Ok(built)
    }

    pub fn price(&self, field: PriceField) -> Rc<dyn Indicator> {
        let key = CacheKey::new("price", vec![ParamKey::Int(field as i64)]);
        self.get_or_build(key, |series| {
            Ok(Rc::new(PriceSeries::new(series, field)) as Rc<dyn Indicator>)
        })
        .expect("price view construction is infallible")
    }

    pub fn close(&self) -> Rc<dyn Indicator> {
        self.price(PriceField::Close)
    }

    pub fn sma(&self, periods: usize) -> Result<Rc<dyn Indicator>, TickreplayError> {
        self.get_or_build(CacheKey::new("sma", vec![periods.into()]), |series| {
            Ok(Rc::new(sma(series, periods)?) as Rc<dyn Indicator>)
        })
    }

    pub fn wma(&self, periods: usize) -> Result<Rc<dyn Indicator>, TickreplayError> {
        self.get_or_build(CacheKey::new("wma", vec![periods.into()]), |series| {
            Ok(Rc::new(wma(series, periods)?) as Rc<dyn Indicator>)
        })
    }

    pub fn stddev(&self, periods: usize) -> Result<Rc<dyn Indicator>, TickreplayError> {
        self.get_or_build(CacheKey::new("stddev", vec![periods.into()]), |series| {
            Ok(Rc::new(stddev(series, periods)?) as Rc<dyn Indicator>)
        })
    }

    pub fn ema(&self, periods: usize) -> Result<Rc<dyn Indicator>, TickreplayError> {
        self.get_or_build(CacheKey::new("ema", vec![periods.into()]), |series| {
            Ok(Rc::new(ema(series, periods)?) as Rc<dyn Indicator>)
        })
    }

    pub fn rsi(&self, periods: usize) -> Result<Rc<dyn Indicator>, TickreplayError> {
        self.get_or_build(CacheKey::new("rsi", vec![periods.into()]), |series| {
            Ok(Rc::new(rsi(series, periods)?) as Rc<dyn Indicator>)
        })
    }

    pub fn atr(&self, periods: usize) -> Result<Rc<dyn Indicator>, TickreplayError> {
        self.get_or_build(CacheKey::new("atr", vec![periods.into()]), |series| {
            Ok(Rc::new(atr(series, periods)?) as Rc<dyn Indicator>)
        })
    }

    pub fn obv(&self) -> Rc<dyn Indicator> {
        self.get_or_build(CacheKey::new("obv", vec![]), |series| {
            Ok(Rc::new(obv(series)) as Rc<dyn Indicator>)
        })
        .expect("obv construction is infallible")
    }

    /// Resolve a registered value-function and bind its parameters.
    pub fn func(
        &self,
        name: &str,
        params: Vec<f64>,
    ) -> Result<Rc<dyn Fn(&Series, usize, &EvalContext) -> Option<f64>>, TickreplayError> {
        let entry = self.registry.func(name)?;
        if entry.arity != params.len() {
            return Err(TickreplayError::parameter(format!(
                "{name} expects {} parameter(s), got {}",
                entry.arity,
                params.len()
            )));
        }
        let call = entry.call;
        Ok(Rc::new(move |series, index, ctx| {
            (*call)(series, index, &params, ctx)
        }))
    }

    /// Resolve a registered rule predicate and bind its parameters, yielding
    /// an ordinary rule leaf.
    pub fn rule(&self, name: &str, params: Vec<f64>) -> Result<Rule, TickreplayError> {
        let entry = self.registry.rule(name)?;
        if entry.arity != params.len() {
            return Err(TickreplayError::parameter(format!(
                "{name} expects {} parameter(s), got {}",
                entry.arity,
                params.len()
            )));
        }
        let call = entry.call;
        Ok(Rule::named(name, move |series, index, ctx| {
            let view = crate::domain::registry::RuleView { series, index, ctx };
            (*call)(&view, &params)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_series;
    use crate::domain::registry::builtin_registry;

    fn context(closes: &[f64]) -> EvalContext {
        EvalContext::new(make_series(closes), Rc::new(builtin_registry()))
    }

    #[test]
    fn identical_keys_share_one_instance() {
        let ctx = context(&[1.0, 2.0, 3.0, 4.0, 5.0]);

        let a = ctx.sma(3).unwrap();
        let b = ctx.sma(3).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(ctx.cached_count(), 1);
    }

    #[test]
    fn different_params_build_distinct_instances() {
        let ctx = context(&[1.0, 2.0, 3.0, 4.0, 5.0]);

        let a = ctx.sma(3).unwrap();
        let b = ctx.sma(4).unwrap();
        assert!(!Rc::ptr_eq(&a, &b));
        assert_eq!(ctx.cached_count(), 2);
    }

    #[test]
    fn different_kinds_do_not_collide() {
        let ctx = context(&[1.0, 2.0, 3.0, 4.0, 5.0]);

        let a = ctx.sma(3).unwrap();
        let b = ctx.ema(3).unwrap();
        assert!(!Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn construction_errors_surface_and_cache_nothing() {
        let ctx = context(&[1.0, 2.0]);
        assert!(ctx.sma(0).is_err());
        assert_eq!(ctx.cached_count(), 0);
    }

    #[test]
    fn scope_releases_on_return() {
        let series = make_series(&[1.0, 2.0, 3.0]);
        let registry = Rc::new(builtin_registry());

        let value = EvalContext::scope(series, registry, |ctx| {
            ctx.sma(2).unwrap().value_at(2).value
        });
        assert_eq!(value, Some(2.5));
    }

    #[test]
    fn bound_func_evaluates_through_registry() {
        let ctx = context(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let f = ctx.func("sma", vec![3.0]).unwrap();

        assert_eq!((*f)(ctx.series(), 4, &ctx), Some(4.0));
        assert_eq!((*f)(ctx.series(), 0, &ctx), None);
    }

    #[test]
    fn func_arity_mismatch_is_rejected() {
        let ctx = context(&[1.0, 2.0]);
        assert!(matches!(
            ctx.func("sma", vec![]),
            Err(TickreplayError::InvalidParameter { .. })
        ));
        assert!(matches!(
            ctx.func("close", vec![1.0]),
            Err(TickreplayError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn unknown_func_is_rejected() {
        let ctx = context(&[1.0]);
        assert!(matches!(
            ctx.func("vwap", vec![]),
            Err(TickreplayError::UnknownName(_))
        ));
    }

    #[test]
    fn bound_rule_sees_params() {
        let mut registry = builtin_registry();
        registry
            .register_rule("close_above", 1, |view, params| {
                view.series.candle(view.index).close > params[0]
            })
            .unwrap();

        let ctx = EvalContext::new(make_series(&[10.0, 20.0, 30.0]), Rc::new(registry));
        let rule = ctx.rule("close_above", vec![15.0]).unwrap();

        assert!(!rule.eval(ctx.series(), 0, &ctx));
        assert!(rule.eval(ctx.series(), 1, &ctx));
    }

    #[test]
    fn price_view_composes_with_operations() {
        use crate::domain::ops::Delta;

        let ctx = context(&[10.0, 12.0, 9.0]);
        let delta = Delta::new(ctx.close());
        assert_eq!(delta.value_at(0).value, None);
        assert_eq!(delta.value_at(1).value, Some(2.0));
        assert_eq!(delta.value_at(2).value, Some(-3.0));

        // The view itself is cached like any indicator.
        assert!(Rc::ptr_eq(&ctx.close(), &ctx.close()));
    }

    #[test]
    fn param_key_distinguishes_float_bits() {
        assert_eq!(ParamKey::num(1.0), ParamKey::num(1.0));
        assert_ne!(ParamKey::num(1.0), ParamKey::num(1.5));
        assert_ne!(ParamKey::num(1.0), ParamKey::Int(1));
    }
}
