use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tracing::debug;

use crate::account::{Account, AccountError, AccountNumber};

use super::AccountStore;

type AccountCell = Arc<Mutex<Account>>;

/// Accounts live in a table of individually locked cells. The table lock is
/// only held to look a cell up or to insert one, never while waiting on an
/// account lock that a transfer might hold.
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<AccountNumber, AccountCell>>,
    next_number: AtomicU64,
}

impl Default for InMemoryAccountStore {
    fn default() -> Self {
        Self {
            accounts: RwLock::default(),
            next_number: AtomicU64::new(1),
        }
    }
}

impl InMemoryAccountStore {
    fn cell(&self, number: AccountNumber) -> Result<AccountCell, AccountError> {
        self.accounts
            .read()
            .get(&number)
            .cloned()
            .ok_or(AccountError::AccountNotFound)
    }

    /// Snapshot of every account ever opened, ordered by number.
    pub fn accounts(&self) -> Vec<Account> {
        let cells: Vec<AccountCell> = self.accounts.read().values().cloned().collect();
        let mut accounts: Vec<Account> = cells.iter().map(|cell| cell.lock().clone()).collect();
        accounts.sort_by_key(Account::number);
        accounts
    }
}

impl AccountStore for InMemoryAccountStore {
    fn create(&self, owner: &str) -> AccountNumber {
        let number = AccountNumber(self.next_number.fetch_add(1, Ordering::Relaxed));
        let account = Account::new(number, owner);
        self.accounts
            .write()
            .insert(number, Arc::new(Mutex::new(account)));
        number
    }

    fn close(&self, number: AccountNumber) -> bool {
        let Ok(cell) = self.cell(number) else {
            debug!(%number, "close refused, unknown account");
            return false;
        };
        let mut acc = cell.lock();
        match acc.handle_close() {
            Ok(evt) => {
                acc.apply(&evt);
                true
            }
            Err(err) => {
                debug!(%number, %err, "close refused");
                false
            }
        }
    }

    fn get(&self, number: AccountNumber) -> Option<Account> {
        self.cell(number).ok().map(|cell| cell.lock().clone())
    }

    fn active_numbers(&self) -> HashSet<AccountNumber> {
        self.accounts
            .read()
            .iter()
            .filter(|(_, cell)| cell.lock().is_active())
            .map(|(number, _)| *number)
            .collect()
    }

    fn deposit(&self, number: AccountNumber, amount: Decimal) -> Result<Decimal, AccountError> {
        let cell = self.cell(number)?;
        let mut acc = cell.lock();
        let evt = acc.handle_deposit(amount)?;
        acc.apply(&evt);
        Ok(acc.balance())
    }

    fn withdraw(&self, number: AccountNumber, amount: Decimal) -> Result<Decimal, AccountError> {
        let cell = self.cell(number)?;
        let mut acc = cell.lock();
        let evt = acc.handle_withdraw(amount)?;
        acc.apply(&evt);
        Ok(acc.balance())
    }

    fn transfer(
        &self,
        from: AccountNumber,
        to: AccountNumber,
        amount: Decimal,
    ) -> Result<(), AccountError> {
        if amount < Decimal::ZERO {
            return Err(AccountError::InvalidAmount);
        }
        let from_cell = self.cell(from)?;
        let to_cell = self.cell(to)?;
        if from == to {
            return Ok(());
        }

        // both locks are taken in ascending number order
        let (mut from_acc, mut to_acc) = if from < to {
            let from_acc = from_cell.lock();
            (from_acc, to_cell.lock())
        } else {
            let to_acc = to_cell.lock();
            (from_cell.lock(), to_acc)
        };

        // validate both legs before applying either, so a refused deposit
        // leaves the withdrawal unapplied
        let withdrawn = from_acc.handle_withdraw(amount)?;
        let deposited = to_acc.handle_deposit(amount)?;
        from_acc.apply(&withdrawn);
        to_acc.apply(&deposited);
        Ok(())
    }
}
