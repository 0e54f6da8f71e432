use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque account identifier. Allocated once by the store and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountNumber(pub u64);

impl fmt::Display for AccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum AccountEventKind {
    Deposited,
    Withdrawn,
    Closed,
}

#[derive(Debug)]
pub struct AccountEvent {
    amount: Decimal,
    kind: AccountEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AccountError {
    #[error("Account does not exist")]
    AccountNotFound,
    #[error("Account is closed, no further mutations are allowed")]
    Inactive,
    #[error("Insufficient funds")]
    Overdrawn,
    #[error("Amount must not be negative")]
    InvalidAmount,
    #[error("Account cannot be closed while its balance is not zero")]
    BalanceNotZero,
    #[error("Deposit would overflow the account balance")]
    BalanceOverflow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    number: AccountNumber,
    owner: String,
    balance: Decimal,
    active: bool,
}

impl Account {
    pub fn new(number: AccountNumber, owner: impl Into<String>) -> Self {
        Self {
            number,
            owner: owner.into(),
            balance: Decimal::ZERO,
            active: true,
        }
    }

    pub fn number(&self) -> AccountNumber {
        self.number
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn apply(&mut self, event: &AccountEvent) {
        match event.kind {
            AccountEventKind::Deposited => {
                self.balance += event.amount;
            }
            AccountEventKind::Withdrawn => {
                self.balance -= event.amount;
            }
            AccountEventKind::Closed => {
                self.active = false;
            }
        }
    }

    /// Non-positive amounts are accepted and produce an event that leaves the
    /// balance untouched.
    pub fn handle_deposit(&self, amount: Decimal) -> Result<AccountEvent, AccountError> {
        if !self.active {
            return Err(AccountError::Inactive);
        }
        let amount = amount.max(Decimal::ZERO);
        if self.balance.checked_add(amount).is_none() {
            return Err(AccountError::BalanceOverflow);
        }
        Ok(AccountEvent {
            amount,
            kind: AccountEventKind::Deposited,
        })
    }

    /// Same quirk as [`Account::handle_deposit`]: non-positive amounts are a no-op.
    pub fn handle_withdraw(&self, amount: Decimal) -> Result<AccountEvent, AccountError> {
        if !self.active {
            return Err(AccountError::Inactive);
        }
        let amount = amount.max(Decimal::ZERO);
        if amount > self.balance {
            return Err(AccountError::Overdrawn);
        }
        Ok(AccountEvent {
            amount,
            kind: AccountEventKind::Withdrawn,
        })
    }

    pub fn handle_close(&self) -> Result<AccountEvent, AccountError> {
        if !self.active {
            return Err(AccountError::Inactive);
        }
        if !self.balance.is_zero() {
            return Err(AccountError::BalanceNotZero);
        }
        Ok(AccountEvent {
            amount: Decimal::ZERO,
            kind: AccountEventKind::Closed,
        })
    }
}
