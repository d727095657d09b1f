use crate::errors::{Error, Result};
use chrono::{DateTime, Utc};

/// One OHLCV sample for a fixed time interval.
///
/// A bar is immutable once built and is only constructed through
/// [`BarBuilder`], which rejects inconsistent prices, non-finite values and
/// a close time earlier than the open time.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bar {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    open_time: DateTime<Utc>,
    close_time: DateTime<Utc>,
}

impl Bar {
    /// Opening price.
    pub fn open(&self) -> f64 {
        self.open
    }

    /// Highest traded price.
    pub fn high(&self) -> f64 {
        self.high
    }

    /// Lowest traded price.
    pub fn low(&self) -> f64 {
        self.low
    }

    /// Closing price.
    pub fn close(&self) -> f64 {
        self.close
    }

    /// Traded volume.
    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Start of the bar's interval. Strictly increasing within a feed.
    pub fn open_time(&self) -> DateTime<Utc> {
        self.open_time
    }

    /// End of the bar's interval.
    pub fn close_time(&self) -> DateTime<Utc> {
        self.close_time
    }
}

/// Builder for [`Bar`] with construction-time validation.
///
/// ### Example
/// ```rust
/// use barloop::prelude::*;
/// use chrono::DateTime;
///
/// let bar = BarBuilder::new()
///     .open(100.0)
///     .high(110.0)
///     .low(95.0)
///     .close(105.0)
///     .volume(1.0)
///     .open_time(DateTime::default())
///     .close_time(DateTime::default())
///     .build()
///     .unwrap();
/// assert_eq!(bar.high(), 110.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct BarBuilder {
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
    open_time: Option<DateTime<Utc>>,
    close_time: Option<DateTime<Utc>>,
}

impl BarBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the opening price.
    pub fn open(mut self, open: f64) -> Self {
        self.open = Some(open);
        self
    }

    /// Sets the highest price.
    pub fn high(mut self, high: f64) -> Self {
        self.high = Some(high);
        self
    }

    /// Sets the lowest price.
    pub fn low(mut self, low: f64) -> Self {
        self.low = Some(low);
        self
    }

    /// Sets the closing price.
    pub fn close(mut self, close: f64) -> Self {
        self.close = Some(close);
        self
    }

    /// Sets the traded volume.
    pub fn volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Sets the interval start time.
    pub fn open_time(mut self, open_time: DateTime<Utc>) -> Self {
        self.open_time = Some(open_time);
        self
    }

    /// Sets the interval end time.
    pub fn close_time(mut self, close_time: DateTime<Utc>) -> Self {
        self.close_time = Some(close_time);
        self
    }

    /// Validates the collected fields and produces the [`Bar`].
    ///
    /// ### Returns
    /// [`Error::MalformedBar`] when a field is missing, a price or the
    /// volume is not a finite non-negative number, the high is not the
    /// maximum (or the low not the minimum) of the four prices, or the
    /// close time precedes the open time.
    pub fn build(self) -> Result<Bar> {
        let field = |value: Option<f64>, name: &str| {
            value.ok_or_else(|| Error::MalformedBar(format!("missing field `{name}`")))
        };
        let open = field(self.open, "open")?;
        let high = field(self.high, "high")?;
        let low = field(self.low, "low")?;
        let close = field(self.close, "close")?;
        let volume = field(self.volume, "volume")?;
        let open_time = self
            .open_time
            .ok_or_else(|| Error::MalformedBar("missing field `open_time`".into()))?;
        let close_time = self
            .close_time
            .ok_or_else(|| Error::MalformedBar("missing field `close_time`".into()))?;

        for (value, name) in [
            (open, "open"),
            (high, "high"),
            (low, "low"),
            (close, "close"),
            (volume, "volume"),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::MalformedBar(format!(
                    "`{name}` must be finite and non-negative (got {value})"
                )));
            }
        }
        if high < open.max(close) {
            return Err(Error::MalformedBar(format!(
                "high {high} below max(open, close) {}",
                open.max(close)
            )));
        }
        if low > open.min(close) {
            return Err(Error::MalformedBar(format!(
                "low {low} above min(open, close) {}",
                open.min(close)
            )));
        }
        if close_time < open_time {
            return Err(Error::MalformedBar(format!(
                "close time {close_time} precedes open time {open_time}"
            )));
        }

        Ok(Bar {
            open,
            high,
            low,
            close,
            volume,
            open_time,
            close_time,
        })
    }
}

#[cfg(test)]
fn builder() -> BarBuilder {
    BarBuilder::new()
        .open(100.0)
        .high(110.0)
        .low(95.0)
        .close(105.0)
        .volume(1.0)
        .open_time(DateTime::default())
        .close_time(DateTime::default())
}

#[cfg(test)]
#[test]
fn build_valid_bar() {
    let bar = builder().build().unwrap();
    assert_eq!(bar.open(), 100.0);
    assert_eq!(bar.high(), 110.0);
    assert_eq!(bar.low(), 95.0);
    assert_eq!(bar.close(), 105.0);
    assert_eq!(bar.volume(), 1.0);
}

#[cfg(test)]
#[test]
fn missing_field_is_rejected() {
    let err = BarBuilder::new().open(1.0).build().unwrap_err();
    assert!(matches!(err, Error::MalformedBar(_)));
}

#[cfg(test)]
#[test]
fn high_below_close_is_rejected() {
    let err = builder().high(104.0).build().unwrap_err();
    assert!(matches!(err, Error::MalformedBar(_)));
}

#[cfg(test)]
#[test]
fn low_above_open_is_rejected() {
    let err = builder().low(101.0).build().unwrap_err();
    assert!(matches!(err, Error::MalformedBar(_)));
}

#[cfg(test)]
#[test]
fn non_finite_price_is_rejected() {
    let err = builder().close(f64::NAN).high(f64::NAN).build().unwrap_err();
    assert!(matches!(err, Error::MalformedBar(_)));
}

#[cfg(test)]
#[test]
fn negative_volume_is_rejected() {
    let err = builder().volume(-2.0).build().unwrap_err();
    assert!(matches!(err, Error::MalformedBar(_)));
}

#[cfg(test)]
#[test]
fn close_time_before_open_time_is_rejected() {
    let err = builder()
        .open_time(DateTime::from_timestamp(60, 0).unwrap())
        .close_time(DateTime::from_timestamp(0, 0).unwrap())
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::MalformedBar(_)));
}
