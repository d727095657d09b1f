#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{FillKind, FillReason, PositionSide};
use crate::errors::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// A request to enter or exit the position, handed to the execution
/// collaborator.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    /// Side of the position being opened or closed.
    pub side: PositionSide,
    /// Whether this opens or closes the position.
    pub kind: FillKind,
    /// Full position quantity; there are no partial fills.
    pub quantity: f64,
    /// The engine-computed reference price: the fill-policy price for
    /// signal fills, the triggered level for stop/take-profit fills.
    /// Synthetic executors fill exactly here; live executors may fill
    /// elsewhere and report the real price back.
    pub price: f64,
    /// Why the order is being placed.
    pub reason: FillReason,
    /// Bar time the request was raised at.
    pub time: DateTime<Utc>,
}

/// What the execution collaborator reports back for a resolved order.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedFill {
    /// The price the order actually executed at.
    pub price: f64,
}

/// Order placement capability.
///
/// Live mode plugs an exchange client in here. The contract is strict:
/// `place_order` must resolve within `timeout`, returning
/// [`Error::OrderTimeout`](crate::errors::Error::OrderTimeout) if it cannot,
/// and must never report a fill that did not happen. A returned error leaves
/// the engine's position state untouched; the failed tick is recorded and
/// the run continues.
pub trait OrderExecution {
    /// Places one order and blocks until it resolves or `timeout` elapses.
    fn place_order(&mut self, request: &OrderRequest, timeout: Duration) -> Result<ExecutedFill>;
}

/// The built-in executor backing backtest and simulation: every order fills
/// immediately at the request's reference price, with zero latency.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticExecution;

impl OrderExecution for SyntheticExecution {
    fn place_order(&mut self, request: &OrderRequest, _timeout: Duration) -> Result<ExecutedFill> {
        Ok(ExecutedFill {
            price: request.price,
        })
    }
}

#[cfg(test)]
#[test]
fn synthetic_fills_at_request_price() {
    let request = OrderRequest {
        side: PositionSide::Long,
        kind: FillKind::Entry,
        quantity: 1.5,
        price: 101.25,
        reason: FillReason::Signal,
        time: DateTime::default(),
    };
    let fill = SyntheticExecution
        .place_order(&request, Duration::from_secs(1))
        .unwrap();
    assert_eq!(fill.price, 101.25);
}
