use std::io::Read;

use csv::{Position, ReaderBuilder, StringRecord, Trim};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{account::AccountNumber, command::Request};

use super::ReplayError;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptCommand {
    CreateAccount,
    GetAccount,
    ListActiveAccounts,
    Deposit,
    Withdraw,
    CloseAccount,
    Transfer,
}

/// One line of a command script. Which columns are required depends on the
/// command; the rest may be left empty.
#[derive(Debug, Deserialize)]
pub struct ScriptRow {
    pub command: ScriptCommand,
    pub owner: Option<String>,
    pub number: Option<AccountNumber>,
    pub to: Option<AccountNumber>,
    pub amount: Option<Decimal>,
}

impl TryFrom<ScriptRow> for Request {
    type Error = ReplayError;

    fn try_from(row: ScriptRow) -> Result<Self, Self::Error> {
        let command = row.command;
        let missing = |field: &'static str| ReplayError::MissingField { command, field };
        Ok(match command {
            ScriptCommand::CreateAccount => Request::CreateAccount {
                owner: row.owner.ok_or_else(|| missing("owner"))?,
            },
            ScriptCommand::GetAccount => Request::GetAccount {
                number: row.number.ok_or_else(|| missing("number"))?,
            },
            ScriptCommand::ListActiveAccounts => Request::ListActiveAccounts,
            ScriptCommand::Deposit => Request::Deposit {
                number: row.number.ok_or_else(|| missing("number"))?,
                amount: row.amount.ok_or_else(|| missing("amount"))?,
            },
            ScriptCommand::Withdraw => Request::Withdraw {
                number: row.number.ok_or_else(|| missing("number"))?,
                amount: row.amount.ok_or_else(|| missing("amount"))?,
            },
            ScriptCommand::CloseAccount => Request::CloseAccount {
                number: row.number.ok_or_else(|| missing("number"))?,
            },
            ScriptCommand::Transfer => Request::Transfer {
                from_number: row.number.ok_or_else(|| missing("number"))?,
                to_number: row.to.ok_or_else(|| missing("to"))?,
                amount: row.amount.ok_or_else(|| missing("amount"))?,
            },
        })
    }
}

/// Reads a command script one record at a time and turns each record into a
/// [`Request`], tagged with the line it started on. A bad record is yielded as
/// an error and reading carries on with the next one.
pub struct ScriptReader<R> {
    csv: csv::Reader<R>,
    record: StringRecord,
    failed: bool,
}

impl<R: Read> ScriptReader<R> {
    pub fn new(source: R) -> Self {
        // columns may be padded or left off entirely at the end of a row
        let csv = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(source);
        Self {
            csv,
            record: StringRecord::new(),
            failed: false,
        }
    }

    fn request(&mut self) -> Result<Request, ReplayError> {
        let headers = self.csv.headers()?;
        let row: ScriptRow = self.record.deserialize(Some(headers))?;
        Request::try_from(row)
    }
}

impl<R: Read> Iterator for ScriptReader<R> {
    type Item = (u64, Result<Request, ReplayError>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.csv.read_record(&mut self.record) {
            Ok(false) => None,
            Ok(true) => {
                let line = self.record.position().map_or(0, Position::line);
                Some((line, self.request()))
            }
            Err(err) => {
                // an I/O failure leaves nothing more to read
                self.failed = err.is_io_error();
                let line = err.position().map_or(0, Position::line);
                Some((line, Err(err.into())))
            }
        }
    }
}
