#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Cash and inventory bookkeeping for one run.
///
/// Long entries spend cash for quantity; short entries credit the sale
/// proceeds and record the owed quantity. Equity marks the inventory to a
/// given price. Fees are charged on every fill's notional value and
/// accumulated separately.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct Account {
    // Balance the run started with
    initial_balance: f64,
    // Cash currently available
    cash: f64,
    // Quantity held long
    long_qty: f64,
    // Quantity owed from short sales
    short_qty: f64,
    // Cumulative fees paid
    fees: f64,
}

impl Account {
    /// Creates an account with the given starting cash.
    /// Zero and negative balances are rejected.
    pub fn new(balance: f64) -> Result<Self> {
        if balance <= 0.0 {
            return Err(Error::NegZeroBalance(balance));
        }

        Ok(Self {
            initial_balance: balance,
            cash: balance,
            long_qty: 0.0,
            short_qty: 0.0,
            fees: 0.0,
        })
    }

    /// Balance the run started with.
    pub fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    /// Cash currently available.
    pub fn cash(&self) -> f64 {
        self.cash
    }

    /// Fees paid to the market so far.
    pub fn fees_paid(&self) -> f64 {
        self.fees
    }

    /// Mark-to-market equity at the given price.
    pub fn equity(&self, price: f64) -> f64 {
        self.cash + self.long_qty * price - self.short_qty * price
    }

    /// Buys `qty` at `price`, charging `fee_percent` of the notional.
    /// Returns the fee charged.
    pub(crate) fn open_long(&mut self, price: f64, qty: f64, fee_percent: f64) -> Result<f64> {
        let cost = price * qty;
        let fee = cost * fee_percent / 100.0;
        let mut required = cost + fee;
        // All-in sizing derives qty from cash; a one-ulp overshoot from the
        // round trip must not reject the entry.
        if required > self.cash && required - self.cash <= self.cash * 1e-9 {
            required = self.cash;
        }
        if required > self.cash {
            return Err(Error::InsufficientFunds {
                required,
                available: self.cash,
            });
        }
        self.cash -= required;
        self.long_qty += qty;
        self.fees += fee;
        Ok(fee)
    }

    /// Sells `qty` of the long inventory at `price`. Returns the fee charged.
    pub(crate) fn close_long(&mut self, price: f64, qty: f64, fee_percent: f64) -> Result<f64> {
        if qty > self.long_qty {
            return Err(Error::Unreachable(format!(
                "closing {qty} long but holding {}",
                self.long_qty
            )));
        }
        let proceeds = price * qty;
        let fee = proceeds * fee_percent / 100.0;
        self.cash += proceeds - fee;
        self.long_qty -= qty;
        self.fees += fee;
        Ok(fee)
    }

    /// Sells `qty` short at `price`, crediting the proceeds and recording
    /// the owed quantity. Returns the fee charged.
    pub(crate) fn open_short(&mut self, price: f64, qty: f64, fee_percent: f64) -> Result<f64> {
        let proceeds = price * qty;
        let fee = proceeds * fee_percent / 100.0;
        self.cash += proceeds - fee;
        self.short_qty += qty;
        self.fees += fee;
        Ok(fee)
    }

    /// Buys back `qty` of the short inventory at `price`. Returns the fee
    /// charged. Cash may go negative here; the engine's liquidation check
    /// decides what that means for the run.
    pub(crate) fn close_short(&mut self, price: f64, qty: f64, fee_percent: f64) -> Result<f64> {
        if qty > self.short_qty {
            return Err(Error::Unreachable(format!(
                "covering {qty} short but owing {}",
                self.short_qty
            )));
        }
        let cost = price * qty;
        let fee = cost * fee_percent / 100.0;
        self.cash -= cost + fee;
        self.short_qty -= qty;
        self.fees += fee;
        Ok(fee)
    }
}

#[cfg(test)]
#[test]
fn new_account_valid_balance() {
    let account = Account::new(100.0).unwrap();
    assert_eq!(account.cash(), 100.0);
    assert_eq!(account.initial_balance(), 100.0);
    assert_eq!(account.equity(42.0), 100.0);
}

#[cfg(test)]
#[test]
fn new_account_invalid_balance() {
    let result = Account::new(0.0);
    assert!(matches!(result, Err(Error::NegZeroBalance(_))));

    let result = Account::new(-10.0);
    assert!(matches!(result, Err(Error::NegZeroBalance(_))));
}

#[cfg(test)]
#[test]
fn long_round_trip_with_fees() {
    let mut account = Account::new(100.0).unwrap();

    // buy 5 at 10, 1% fee on the 50 notional
    let fee = account.open_long(10.0, 5.0, 1.0).unwrap();
    assert_eq!(fee, 0.5);
    assert_eq!(account.cash(), 49.5);
    assert_eq!(account.equity(10.0), 99.5);

    // sell 5 at 12, 1% fee on the 60 notional
    let fee = account.close_long(12.0, 5.0, 1.0).unwrap();
    assert!((fee - 0.6).abs() < 1e-12);
    assert!((account.cash() - 108.9).abs() < 1e-12);
    assert!((account.fees_paid() - 1.1).abs() < 1e-12);
    // flat again: equity no longer depends on price
    assert_eq!(account.equity(999.0), account.cash());
}

#[cfg(test)]
#[test]
fn short_round_trip() {
    let mut account = Account::new(100.0).unwrap();

    // sell 5 short at 10
    account.open_short(10.0, 5.0, 0.0).unwrap();
    assert_eq!(account.cash(), 150.0);
    assert_eq!(account.equity(10.0), 100.0);

    // mark: price falls, equity rises
    assert_eq!(account.equity(8.0), 110.0);

    // cover at 8
    account.close_short(8.0, 5.0, 0.0).unwrap();
    assert_eq!(account.cash(), 110.0);
    assert_eq!(account.equity(8.0), 110.0);
}

#[cfg(test)]
#[test]
fn short_loss_can_overdraw_cash() {
    let mut account = Account::new(100.0).unwrap();
    account.open_short(10.0, 20.0, 0.0).unwrap();
    assert_eq!(account.cash(), 300.0);

    // price doubles against the short
    assert_eq!(account.equity(20.0), -100.0);
    account.close_short(20.0, 20.0, 0.0).unwrap();
    assert_eq!(account.cash(), -100.0);
}

#[cfg(test)]
#[test]
fn open_long_insufficient_funds() {
    let mut account = Account::new(100.0).unwrap();
    let result = account.open_long(10.0, 11.0, 0.0);
    assert!(matches!(result, Err(Error::InsufficientFunds { .. })));
    // nothing changed
    assert_eq!(account.cash(), 100.0);
    assert_eq!(account.equity(10.0), 100.0);
}

#[cfg(test)]
#[test]
fn open_long_all_in_overshoot_is_tolerated() {
    let mut account = Account::new(100.0).unwrap();
    let fee_percent = 0.1;
    // qty chosen so cost + fee lands within one ulp of the full balance
    let qty = 100.0 / (10.0 * (1.0 + fee_percent / 100.0));
    account.open_long(10.0, qty, fee_percent).unwrap();
    assert!(account.cash().abs() < 1e-9);
}

#[cfg(test)]
#[test]
fn close_more_than_held_is_a_bug() {
    let mut account = Account::new(100.0).unwrap();
    account.open_long(10.0, 2.0, 0.0).unwrap();
    assert!(matches!(
        account.close_long(10.0, 3.0, 0.0),
        Err(Error::Unreachable(_))
    ));
    assert!(matches!(
        account.close_short(10.0, 1.0, 0.0),
        Err(Error::Unreachable(_))
    ));
}
