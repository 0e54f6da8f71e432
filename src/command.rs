use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::{AccountError, AccountNumber};

/// Bumped whenever the shape of [`Request`] or [`Response`] changes.
pub const PROTOCOL_VERSION: u16 = 1;

pub type CorrelationId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    CreateAccount,
    GetAccount,
    ListActiveAccounts,
    Deposit,
    Withdraw,
    CloseAccount,
    Transfer,
    Malformed,
}

/// Failure tags carried on a response. Never raised across the dispatcher boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    AccountNotFound,
    Inactive,
    Overdrawn,
    InvalidAmount,
    Malformed,
}

impl From<AccountError> for ErrorKind {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::AccountNotFound => Self::AccountNotFound,
            // BalanceNotZero only comes out of closing, which answers `closed: false`
            AccountError::Inactive | AccountError::BalanceNotZero => Self::Inactive,
            AccountError::Overdrawn => Self::Overdrawn,
            AccountError::InvalidAmount | AccountError::BalanceOverflow => Self::InvalidAmount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum Request {
    CreateAccount {
        owner: String,
    },
    GetAccount {
        number: AccountNumber,
    },
    ListActiveAccounts,
    Deposit {
        number: AccountNumber,
        amount: Decimal,
    },
    Withdraw {
        number: AccountNumber,
        amount: Decimal,
    },
    CloseAccount {
        number: AccountNumber,
    },
    Transfer {
        from_number: AccountNumber,
        to_number: AccountNumber,
        amount: Decimal,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum Response {
    CreateAccount {
        account_number: AccountNumber,
    },
    GetAccount {
        found: bool,
        owner: String,
        balance: Decimal,
        active: bool,
    },
    ListActiveAccounts {
        numbers: BTreeSet<AccountNumber>,
    },
    Deposit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_balance: Option<Decimal>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<ErrorKind>,
    },
    Withdraw {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_balance: Option<Decimal>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<ErrorKind>,
    },
    CloseAccount {
        closed: bool,
    },
    Transfer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<ErrorKind>,
    },
    /// The payload never reached the dispatcher.
    Malformed {
        reason: String,
    },
}

impl Request {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::CreateAccount { .. } => CommandKind::CreateAccount,
            Self::GetAccount { .. } => CommandKind::GetAccount,
            Self::ListActiveAccounts => CommandKind::ListActiveAccounts,
            Self::Deposit { .. } => CommandKind::Deposit,
            Self::Withdraw { .. } => CommandKind::Withdraw,
            Self::CloseAccount { .. } => CommandKind::CloseAccount,
            Self::Transfer { .. } => CommandKind::Transfer,
        }
    }
}

impl Response {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::CreateAccount { .. } => CommandKind::CreateAccount,
            Self::GetAccount { .. } => CommandKind::GetAccount,
            Self::ListActiveAccounts { .. } => CommandKind::ListActiveAccounts,
            Self::Deposit { .. } => CommandKind::Deposit,
            Self::Withdraw { .. } => CommandKind::Withdraw,
            Self::CloseAccount { .. } => CommandKind::CloseAccount,
            Self::Transfer { .. } => CommandKind::Transfer,
            Self::Malformed { .. } => CommandKind::Malformed,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Deposit { error_kind, .. }
            | Self::Withdraw { error_kind, .. }
            | Self::Transfer { error_kind } => *error_kind,
            Self::Malformed { .. } => Some(ErrorKind::Malformed),
            _ => None,
        }
    }

    /// Accounts whose state was changed by the command that produced this
    /// response. Empty for reads and for refused commands.
    pub fn changed_accounts(&self, request: &Request) -> Vec<AccountNumber> {
        if self.error_kind().is_some() {
            return Vec::new();
        }
        match (request, self) {
            (_, Self::CreateAccount { account_number }) => vec![*account_number],
            (Request::Deposit { number, .. }, Self::Deposit { .. })
            | (Request::Withdraw { number, .. }, Self::Withdraw { .. }) => vec![*number],
            (Request::CloseAccount { number }, Self::CloseAccount { closed: true }) => {
                vec![*number]
            }
            (
                Request::Transfer {
                    from_number,
                    to_number,
                    ..
                },
                Self::Transfer { .. },
            ) if from_number == to_number => vec![*from_number],
            (
                Request::Transfer {
                    from_number,
                    to_number,
                    ..
                },
                Self::Transfer { .. },
            ) => vec![*from_number, *to_number],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub version: u16,
    pub id: CorrelationId,
    pub command: Request,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub version: u16,
    /// `None` only when the request could not be decoded far enough to read it.
    pub id: Option<CorrelationId>,
    pub reply: Response,
}

impl RequestEnvelope {
    pub fn new(id: CorrelationId, command: Request) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            id,
            command,
        }
    }
}

impl ResponseEnvelope {
    pub fn reply_to(id: CorrelationId, reply: Response) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            id: Some(id),
            reply,
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            id: None,
            reply: Response::Malformed {
                reason: reason.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;

    #[test]
    fn request_wire_shape() {
        let request = Request::Transfer {
            from_number: AccountNumber(1),
            to_number: AccountNumber(2),
            amount: dec!(40.5),
        };
        let value = serde_json::to_value(RequestEnvelope::new(7, request)).unwrap();
        assert_eq!(
            value,
            json!({
                "version": 1,
                "id": 7,
                "command": {"kind": "Transfer", "fromNumber": 1, "toNumber": 2, "amount": "40.5"}
            })
        );

        let parsed: Request = serde_json::from_value(json!({"kind": "ListActiveAccounts"})).unwrap();
        assert_eq!(parsed, Request::ListActiveAccounts);
    }

    #[test]
    fn response_omits_absent_fields() {
        let value = serde_json::to_value(Response::Withdraw {
            new_balance: None,
            error_kind: Some(ErrorKind::Overdrawn),
        })
        .unwrap();
        assert_eq!(value, json!({"kind": "Withdraw", "errorKind": "Overdrawn"}));

        let value = serde_json::to_value(Response::Deposit {
            new_balance: Some(dec!(100)),
            error_kind: None,
        })
        .unwrap();
        assert_eq!(value, json!({"kind": "Deposit", "newBalance": "100"}));
    }

    #[test]
    fn changed_accounts_only_for_successful_mutations() {
        let transfer = Request::Transfer {
            from_number: AccountNumber(1),
            to_number: AccountNumber(2),
            amount: dec!(1),
        };
        let ok = Response::Transfer { error_kind: None };
        assert_eq!(
            ok.changed_accounts(&transfer),
            vec![AccountNumber(1), AccountNumber(2)]
        );
        let refused = Response::Transfer {
            error_kind: Some(ErrorKind::Overdrawn),
        };
        assert!(refused.changed_accounts(&transfer).is_empty());

        let close = Request::CloseAccount {
            number: AccountNumber(3),
        };
        assert!(
            Response::CloseAccount { closed: false }
                .changed_accounts(&close)
                .is_empty()
        );
        assert!(
            Response::GetAccount {
                found: true,
                owner: "Alice".to_string(),
                balance: Decimal::ZERO,
                active: true,
            }
            .changed_accounts(&Request::GetAccount {
                number: AccountNumber(3)
            })
            .is_empty()
        );
    }
}
