use std::io::Write;

use anyhow::Context;
use csv::Writer;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::account::{Account, AccountNumber};

#[derive(Debug, Serialize)]
pub struct AccountRow {
    pub number: AccountNumber,
    pub owner: String,
    pub balance: Decimal,
    pub active: bool,
}

impl From<&Account> for AccountRow {
    fn from(acc: &Account) -> Self {
        Self {
            number: acc.number(),
            owner: acc.owner().to_string(),
            balance: acc.balance(),
            active: acc.is_active(),
        }
    }
}

/// Writes the closing balance sheet: a header row, then one row per account.
pub fn write_balance_sheet<W, I>(output: &mut W, rows: I) -> anyhow::Result<()>
where
    W: Write,
    I: IntoIterator<Item = AccountRow>,
{
    let mut report = Writer::from_writer(output);
    for row in rows {
        let number = row.number;
        report
            .serialize(row)
            .with_context(|| format!("Failed to report account {number}"))?;
    }
    report.flush().context("Failed to flush the account report")
}
