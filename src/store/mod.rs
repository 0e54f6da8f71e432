use std::collections::HashSet;

use rust_decimal::Decimal;

use crate::account::{Account, AccountError, AccountNumber};

pub mod in_memory_store;

/// Sole owner of ledger state. Every method takes `&self`: implementations
/// synchronize internally so one store can be shared by any number of
/// concurrent requests.
pub trait AccountStore: Send + Sync {
    /// Opens an active account with a zero balance. Never fails.
    fn create(&self, owner: &str) -> AccountNumber;

    /// Deactivates the account. Refused when the account is unknown, already
    /// closed, or still holds money, checked in that order.
    fn close(&self, number: AccountNumber) -> bool;

    /// Snapshot of the account, closed accounts included.
    fn get(&self, number: AccountNumber) -> Option<Account>;

    fn active_numbers(&self) -> HashSet<AccountNumber>;

    /// Returns the new balance.
    fn deposit(&self, number: AccountNumber, amount: Decimal) -> Result<Decimal, AccountError>;

    /// Returns the new balance.
    fn withdraw(&self, number: AccountNumber, amount: Decimal) -> Result<Decimal, AccountError>;

    /// Moves `amount` between two accounts as one unit: either both legs are
    /// applied or neither is.
    fn transfer(
        &self,
        from: AccountNumber,
        to: AccountNumber,
        amount: Decimal,
    ) -> Result<(), AccountError>;
}
