#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use std::collections::BTreeMap;

/// One concrete strategy parameter value.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// A whole number, e.g. a lookback period.
    Int(i64),
    /// A fractional number, e.g. a threshold.
    Float(f64),
    /// A textual choice, e.g. a moving-average kind.
    Text(String),
}

impl ParamValue {
    /// The declared kind of this value.
    pub fn kind(&self) -> ParamKind {
        match self {
            Self::Int(_) => ParamKind::Int,
            Self::Float(_) => ParamKind::Float,
            Self::Text(_) => ParamKind::Text,
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

// Bare integer literals fall back to i32.
impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
        }
    }
}

/// The kind a parameter is declared as in a strategy schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Whole numbers.
    Int,
    /// Fractional numbers. Accepts an [`ParamValue::Int`] too.
    Float,
    /// Text.
    Text,
}

impl std::fmt::Display for ParamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "text",
        };
        write!(f, "{label}")
    }
}

/// One declared parameter in a strategy schema: a name and the kind of
/// value it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    /// Parameter name the strategy recognizes.
    pub name: &'static str,
    /// Kind of value it accepts.
    pub kind: ParamKind,
}

impl ParamSpec {
    /// Declares an integer parameter.
    pub fn int(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Int,
        }
    }

    /// Declares a float parameter.
    pub fn float(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Float,
        }
    }

    /// Declares a text parameter.
    pub fn text(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Text,
        }
    }

    fn accepts(&self, value: &ParamValue) -> bool {
        // Int upgrades losslessly, so float parameters take it too.
        self.kind == value.kind() || (self.kind == ParamKind::Float && value.kind() == ParamKind::Int)
    }
}

/// One concrete assignment of values to a strategy's tunable parameters.
///
/// Entries iterate in name order, so a set prints, serializes and expands
/// the same way every time. One set identifies one optimizer trial.
///
/// ### Example
/// ```rust
/// use barloop::prelude::*;
///
/// let params = ParameterSet::new().with("slow", 5).with("fast", 2);
/// assert_eq!(params.int("fast").unwrap(), 2);
/// assert_eq!(params.to_string(), "fast=2, slow=5");
/// ```
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterSet {
    values: BTreeMap<String, ParamValue>,
}

impl ParameterSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces one parameter value.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// The raw value under `name`, if present.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// The integer under `name`.
    ///
    /// ### Returns
    /// [`Error::UnknownParameter`] when absent, [`Error::InvalidParameter`]
    /// when present with a different kind.
    pub fn int(&self, name: &str) -> Result<i64> {
        match self.require(name)? {
            ParamValue::Int(value) => Ok(*value),
            other => Err(Error::InvalidParameter {
                name: name.to_string(),
                detail: format!("expected int, got {} `{other}`", other.kind()),
            }),
        }
    }

    /// The float under `name`; an integer value coerces.
    pub fn float(&self, name: &str) -> Result<f64> {
        match self.require(name)? {
            ParamValue::Float(value) => Ok(*value),
            ParamValue::Int(value) => Ok(*value as f64),
            other => Err(Error::InvalidParameter {
                name: name.to_string(),
                detail: format!("expected float, got {} `{other}`", other.kind()),
            }),
        }
    }

    /// The text under `name`.
    pub fn text(&self, name: &str) -> Result<&str> {
        match self.require(name)? {
            ParamValue::Text(value) => Ok(value),
            other => Err(Error::InvalidParameter {
                name: name.to_string(),
                detail: format!("expected text, got {} `{other}`", other.kind()),
            }),
        }
    }

    /// Number of parameters in the set.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the set holds no parameters.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Checks every entry against a declared schema: unknown names and
    /// mismatched kinds are rejected. A set may cover only part of the
    /// schema; omitted parameters keep their defaults.
    pub fn conforms_to(&self, schema: &[ParamSpec]) -> Result<()> {
        for (name, value) in self.iter() {
            let spec = schema
                .iter()
                .find(|spec| spec.name == name)
                .ok_or_else(|| Error::UnknownParameter(name.to_string()))?;
            if !spec.accepts(value) {
                return Err(Error::InvalidParameter {
                    name: name.to_string(),
                    detail: format!("expected {}, got {} `{value}`", spec.kind, value.kind()),
                });
            }
        }
        Ok(())
    }

    fn require(&self, name: &str) -> Result<&ParamValue> {
        self.values
            .get(name)
            .ok_or_else(|| Error::UnknownParameter(name.to_string()))
    }
}

impl std::fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (name, value) in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
            first = false;
        }
        Ok(())
    }
}

/// The values one parameter sweeps over in an optimizer search.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum ParamRange {
    /// Inclusive stepped integer range.
    IntRange {
        /// First value.
        start: i64,
        /// Last value, included when the step lands on it.
        end: i64,
        /// Positive step.
        step: i64,
    },
    /// Inclusive stepped float range.
    FloatRange {
        /// First value.
        start: f64,
        /// Last value, included when the step lands on it.
        end: f64,
        /// Positive step.
        step: f64,
    },
    /// An explicit list of values.
    Choice(Vec<ParamValue>),
}

impl ParamRange {
    /// An inclusive integer range with the given step.
    pub fn int(start: i64, end: i64, step: i64) -> Self {
        Self::IntRange { start, end, step }
    }

    /// An inclusive float range with the given step.
    pub fn float(start: f64, end: f64, step: f64) -> Self {
        Self::FloatRange { start, end, step }
    }

    /// An explicit list of values.
    pub fn choice(values: impl IntoIterator<Item = impl Into<ParamValue>>) -> Self {
        Self::Choice(values.into_iter().map(Into::into).collect())
    }

    fn validate(&self, name: &str) -> Result<()> {
        let fail = |detail: String| Error::InvalidRange {
            name: name.to_string(),
            detail,
        };
        match self {
            Self::IntRange { start, end, step } => {
                if *step <= 0 {
                    return Err(fail(format!("step must be positive (got {step})")));
                }
                if end < start {
                    return Err(fail(format!("bounds are reversed ({start}..{end})")));
                }
            }
            Self::FloatRange { start, end, step } => {
                if !(step.is_finite() && *step > 0.0) {
                    return Err(fail(format!("step must be positive (got {step})")));
                }
                if !start.is_finite() || !end.is_finite() {
                    return Err(fail(format!("bounds must be finite ({start}..{end})")));
                }
                if end < start {
                    return Err(fail(format!("bounds are reversed ({start}..{end})")));
                }
            }
            Self::Choice(values) => {
                if values.is_empty() {
                    return Err(fail("choice list is empty".to_string()));
                }
            }
        }
        Ok(())
    }

    /// Expands the range into its concrete values, in sweep order. Ranges
    /// that [`ParameterSpace::validate`] rejects expand to nothing.
    pub fn values(&self) -> Vec<ParamValue> {
        match self {
            Self::IntRange { start, end, step } => {
                if *step <= 0 {
                    return Vec::new();
                }
                (*start..=*end).step_by(*step as usize).map(ParamValue::Int).collect()
            }
            Self::FloatRange { start, end, step } => {
                if !(step.is_finite() && *step > 0.0) {
                    return Vec::new();
                }
                let mut values = Vec::new();
                let mut index = 0u32;
                // Multiply instead of accumulating so the endpoint is not
                // lost to rounding drift.
                loop {
                    let value = start + step * f64::from(index);
                    if value > end + step * 1e-9 {
                        break;
                    }
                    values.push(ParamValue::Float(value));
                    index += 1;
                }
                values
            }
            Self::Choice(values) => values.clone(),
        }
    }
}

/// Declared search space: one [`ParamRange`] per parameter name.
///
/// Expansion is the Cartesian product of the per-parameter values, sweeping
/// the last name (in name order) fastest, fully deterministic.
///
/// ### Example
/// ```rust
/// use barloop::prelude::*;
///
/// let space = ParameterSpace::new()
///     .with("fast", ParamRange::int(2, 3, 1))
///     .with("slow", ParamRange::int(5, 6, 1));
/// let combos = space.combinations().unwrap();
/// assert_eq!(combos.len(), 4);
/// assert_eq!(combos[0].to_string(), "fast=2, slow=5");
/// assert_eq!(combos[3].to_string(), "fast=3, slow=6");
/// ```
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterSpace {
    ranges: BTreeMap<String, ParamRange>,
}

impl ParameterSpace {
    /// Creates an empty space. At least one range must be added before use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the range swept for one parameter.
    pub fn with(mut self, name: impl Into<String>, range: ParamRange) -> Self {
        self.ranges.insert(name.into(), range);
        self
    }

    /// Checks the space is non-empty and every range can produce values.
    pub fn validate(&self) -> Result<()> {
        if self.ranges.is_empty() {
            return Err(Error::EmptyParameterSpace);
        }
        for (name, range) in &self.ranges {
            range.validate(name)?;
        }
        Ok(())
    }

    /// Expands the full grid.
    ///
    /// ### Returns
    /// Every [`ParameterSet`] in the Cartesian product, or the validation
    /// error that makes expansion meaningless.
    pub fn combinations(&self) -> Result<Vec<ParameterSet>> {
        self.validate()?;
        let mut combos = vec![ParameterSet::new()];
        for (name, range) in &self.ranges {
            let values = range.values();
            let mut next = Vec::with_capacity(combos.len() * values.len());
            for combo in &combos {
                for value in &values {
                    next.push(combo.clone().with(name.clone(), value.clone()));
                }
            }
            combos = next;
        }
        Ok(combos)
    }
}

#[cfg(test)]
#[test]
fn set_accessors_and_coercion() {
    let params = ParameterSet::new()
        .with("fast", 2)
        .with("ratio", 0.5)
        .with("kind", "sma");

    assert_eq!(params.int("fast").unwrap(), 2);
    assert_eq!(params.float("ratio").unwrap(), 0.5);
    assert_eq!(params.float("fast").unwrap(), 2.0);
    assert_eq!(params.text("kind").unwrap(), "sma");
    assert_eq!(params.len(), 3);

    assert!(matches!(
        params.int("ratio"),
        Err(Error::InvalidParameter { .. })
    ));
    assert!(matches!(
        params.int("missing"),
        Err(Error::UnknownParameter(_))
    ));
}

#[cfg(test)]
#[test]
fn display_is_name_ordered() {
    let params = ParameterSet::new().with("slow", 5).with("fast", 2);
    assert_eq!(params.to_string(), "fast=2, slow=5");
}

#[cfg(test)]
#[test]
fn conformance_checks_names_and_kinds() {
    let schema = [ParamSpec::int("fast"), ParamSpec::float("threshold")];

    ParameterSet::new().with("fast", 2).conforms_to(&schema).unwrap();
    // int into a float slot is fine
    ParameterSet::new()
        .with("threshold", 3)
        .conforms_to(&schema)
        .unwrap();

    assert!(matches!(
        ParameterSet::new().with("nope", 1).conforms_to(&schema),
        Err(Error::UnknownParameter(_))
    ));
    assert!(matches!(
        ParameterSet::new().with("fast", 0.5).conforms_to(&schema),
        Err(Error::InvalidParameter { .. })
    ));
}

#[cfg(test)]
#[test]
fn int_range_expansion() {
    assert_eq!(
        ParamRange::int(2, 10, 4).values(),
        vec![ParamValue::Int(2), ParamValue::Int(6), ParamValue::Int(10)]
    );
    assert_eq!(ParamRange::int(3, 3, 1).values(), vec![ParamValue::Int(3)]);
}

#[cfg(test)]
#[test]
fn float_range_includes_its_endpoint() {
    assert_eq!(
        ParamRange::float(0.5, 1.5, 0.5).values(),
        vec![
            ParamValue::Float(0.5),
            ParamValue::Float(1.0),
            ParamValue::Float(1.5)
        ]
    );
}

#[cfg(test)]
#[test]
fn bad_ranges_are_rejected() {
    let bad = [
        ParamRange::int(1, 5, 0),
        ParamRange::int(5, 1, 1),
        ParamRange::float(0.0, 1.0, -0.5),
        ParamRange::choice(Vec::<i64>::new()),
    ];
    for range in bad {
        let space = ParameterSpace::new().with("p", range);
        assert!(matches!(space.validate(), Err(Error::InvalidRange { .. })));
    }

    assert!(matches!(
        ParameterSpace::new().validate(),
        Err(Error::EmptyParameterSpace)
    ));
}

#[cfg(test)]
#[test]
fn cartesian_product_is_exhaustive_and_ordered() {
    let space = ParameterSpace::new()
        .with("fast", ParamRange::int(2, 3, 1))
        .with("slow", ParamRange::choice([5i64, 6]))
        .with("kind", ParamRange::choice(["sma", "ema"]));
    let combos = space.combinations().unwrap();

    assert_eq!(combos.len(), 8);
    // name order: fast, kind, slow; the last varies fastest
    assert_eq!(combos[0].to_string(), "fast=2, kind=sma, slow=5");
    assert_eq!(combos[1].to_string(), "fast=2, kind=sma, slow=6");
    assert_eq!(combos[2].to_string(), "fast=2, kind=ema, slow=5");
    assert_eq!(combos[7].to_string(), "fast=3, kind=ema, slow=6");

    // every set is unique
    for (index, combo) in combos.iter().enumerate() {
        assert!(combos[index + 1..].iter().all(|other| other != combo));
    }
}
