#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::{Bar, Position};
use crate::errors::Result;
use crate::indicators::{Indicator, IndicatorSeries};
use crate::params::{ParamSpec, ParameterSet};

/// What a strategy wants done this tick.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Open a long position (or flip a short into one).
    EnterLong,
    /// Open a short position (or flip a long into one).
    EnterShort,
    /// Close whatever is open.
    Exit,
    /// Do nothing.
    Hold,
}

/// Everything a strategy may look at on one tick.
///
/// The engine builds this per bar; the strategy reads it and returns a
/// [`Decision`]. Nothing here is mutable, so a strategy cannot perturb
/// engine state. That purity is what lets the same instance drive a
/// backtest, a simulation and a live run identically.
#[derive(Debug, Clone, Copy)]
pub struct SignalContext<'a> {
    /// The bar being processed.
    pub bar: &'a Bar,
    /// Indicator values aligned to this bar. Warm-up reads as `None`.
    pub indicators: &'a IndicatorSeries,
    /// The open position, if any.
    pub position: Option<&'a Position>,
}

/// User-authored trading logic.
///
/// The engine owns the loop: it calls [`evaluate`](Strategy::evaluate) once
/// per bar (unless a protective stop already fired that tick) and applies
/// the returned [`Decision`] through the position state machine. A strategy
/// that needs indicators declares them in
/// [`indicators`](Strategy::indicators); they are instantiated fresh for
/// every run, so strategies stay reusable across runs and optimizer trials.
///
/// Plain closures work too:
///
/// ### Example
/// ```rust
/// use barloop::prelude::*;
///
/// let buy_and_hold = |ctx: &SignalContext| {
///     if ctx.position.is_none() {
///         Decision::EnterLong
///     } else {
///         Decision::Hold
///     }
/// };
/// # fn takes_strategy(_s: &impl Strategy) {}
/// takes_strategy(&buy_and_hold);
/// ```
pub trait Strategy {
    /// Label used in diagnostics.
    fn name(&self) -> &str {
        "custom"
    }

    /// Fresh instances of every indicator this strategy reads. Series
    /// entries appear in the order declared here, so
    /// [`IndicatorSeries::at`] is stable within a strategy.
    fn indicators(&self) -> Vec<Box<dyn Indicator>> {
        Vec::new()
    }

    /// The parameters this strategy accepts, if any.
    fn schema(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    /// Applies a parameter set before a run starts.
    ///
    /// The default checks the set against [`schema`](Strategy::schema) and
    /// applies nothing, which makes any non-empty set against a
    /// parameterless strategy a configuration error. Strategies with
    /// parameters override this, validate, and update themselves.
    fn configure(&mut self, params: &ParameterSet) -> Result<()> {
        params.conforms_to(&self.schema())
    }

    /// Maps one tick's context to a decision.
    fn evaluate(&self, ctx: &SignalContext<'_>) -> Decision;
}

impl<F> Strategy for F
where
    F: Fn(&SignalContext<'_>) -> Decision,
{
    fn evaluate(&self, ctx: &SignalContext<'_>) -> Decision {
        self(ctx)
    }
}

#[cfg(test)]
use crate::engine::BarBuilder;

#[cfg(test)]
fn context_bar() -> Bar {
    BarBuilder::new()
        .open(100.0)
        .high(101.0)
        .low(99.0)
        .close(100.5)
        .volume(1.0)
        .open_time(chrono::DateTime::default())
        .close_time(chrono::DateTime::default())
        .build()
        .unwrap()
}

#[cfg(test)]
#[test]
fn closures_are_strategies() {
    let strategy = |ctx: &SignalContext| {
        if ctx.bar.close() > 100.0 {
            Decision::EnterLong
        } else {
            Decision::Hold
        }
    };

    let bar = context_bar();
    let series = IndicatorSeries::default();
    let ctx = SignalContext {
        bar: &bar,
        indicators: &series,
        position: None,
    };

    assert_eq!(strategy.name(), "custom");
    assert!(strategy.indicators().is_empty());
    assert_eq!(strategy.evaluate(&ctx), Decision::EnterLong);
}

#[cfg(test)]
#[test]
fn default_configure_rejects_undeclared_parameters() {
    struct Flat;
    impl Strategy for Flat {
        fn evaluate(&self, _ctx: &SignalContext<'_>) -> Decision {
            Decision::Hold
        }
    }

    let mut strategy = Flat;
    strategy.configure(&ParameterSet::new()).unwrap();

    let err = strategy
        .configure(&ParameterSet::new().with("period", 5))
        .unwrap_err();
    assert!(matches!(err, crate::errors::Error::UnknownParameter(_)));
}
