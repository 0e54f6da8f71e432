use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::{
    account::{AccountError, AccountNumber},
    codec,
    command::{ErrorKind, Request, RequestEnvelope, Response, ResponseEnvelope},
    store::AccountStore,
    updates::UpdateFeed,
};

/// Sent when a response cannot be serialized, which leaves nothing better to say.
const ENCODE_FAILURE_REPLY: &[u8] =
    br#"{"version":1,"id":null,"reply":{"kind":"Malformed","reason":"response could not be encoded"}}"#;

/// Routes each command to exactly one store operation. Holds no per-call
/// state, so clones can be handed to any number of concurrent adapters.
pub struct CommandDispatcher<S> {
    store: Arc<S>,
    updates: Option<Arc<UpdateFeed>>,
}

impl<S> Clone for CommandDispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            updates: self.updates.clone(),
        }
    }
}

impl<S> CommandDispatcher<S>
where
    S: AccountStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            updates: None,
        }
    }

    /// Publish the numbers of accounts changed by successful commands.
    pub fn with_updates(mut self, feed: Arc<UpdateFeed>) -> Self {
        self.updates = Some(feed);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Bytes in, bytes out. Undecodable payloads get a `Malformed` reply and
    /// never reach the store.
    pub fn handle(&self, payload: &[u8]) -> Vec<u8> {
        let response = match codec::decode_request(payload) {
            Ok(envelope) => self.execute(envelope),
            Err(err) => {
                warn!(%err, "malformed request");
                ResponseEnvelope::malformed(err.to_string())
            }
        };
        match codec::encode_response(&response) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(%err, "failed to encode response");
                ENCODE_FAILURE_REPLY.to_vec()
            }
        }
    }

    pub fn execute(&self, envelope: RequestEnvelope) -> ResponseEnvelope {
        debug!(id = envelope.id, kind = ?envelope.command.kind(), "executing command");
        let reply = self.dispatch(&envelope.command);
        ResponseEnvelope::reply_to(envelope.id, reply)
    }

    pub fn dispatch(&self, request: &Request) -> Response {
        let response = match request {
            Request::CreateAccount { owner } => {
                let account_number = self.store.create(owner);
                info!(%account_number, owner, "account created");
                Response::CreateAccount { account_number }
            }
            Request::GetAccount { number } => self.get_account(*number),
            Request::ListActiveAccounts => Response::ListActiveAccounts {
                numbers: self.store.active_numbers().into_iter().collect(),
            },
            Request::Deposit { number, amount } => {
                let (new_balance, error_kind) =
                    balance_outcome("deposit", *number, *amount, self.store.deposit(*number, *amount));
                Response::Deposit {
                    new_balance,
                    error_kind,
                }
            }
            Request::Withdraw { number, amount } => {
                let (new_balance, error_kind) = balance_outcome(
                    "withdraw",
                    *number,
                    *amount,
                    self.store.withdraw(*number, *amount),
                );
                Response::Withdraw {
                    new_balance,
                    error_kind,
                }
            }
            Request::CloseAccount { number } => {
                let closed = self.store.close(*number);
                if closed {
                    info!(%number, "account closed");
                } else {
                    warn!(%number, "account could not be closed");
                }
                Response::CloseAccount { closed }
            }
            Request::Transfer {
                from_number,
                to_number,
                amount,
            } => Response::Transfer {
                error_kind: self.transfer(*from_number, *to_number, *amount).err(),
            },
        };

        if let Some(feed) = &self.updates {
            for number in response.changed_accounts(request) {
                feed.publish(number);
            }
        }
        response
    }

    fn get_account(&self, number: AccountNumber) -> Response {
        match self.store.get(number) {
            Some(acc) => Response::GetAccount {
                found: true,
                owner: acc.owner().to_string(),
                balance: acc.balance(),
                active: acc.is_active(),
            },
            None => {
                warn!(%number, "requested account could not be found");
                Response::GetAccount {
                    found: false,
                    owner: String::new(),
                    balance: Decimal::ZERO,
                    active: false,
                }
            }
        }
    }

    fn transfer(
        &self,
        from: AccountNumber,
        to: AccountNumber,
        amount: Decimal,
    ) -> Result<(), ErrorKind> {
        // both endpoints must exist before the store is asked to move anything
        if self.store.get(from).is_none() || self.store.get(to).is_none() {
            warn!(%from, %to, "transfer refused, unknown endpoint");
            return Err(ErrorKind::AccountNotFound);
        }
        match self.store.transfer(from, to, amount) {
            Ok(()) => {
                info!(%from, %to, %amount, "transfer passed");
                Ok(())
            }
            Err(err) => {
                warn!(%from, %to, %amount, %err, "transfer failed");
                Err(err.into())
            }
        }
    }
}

fn balance_outcome(
    operation: &str,
    number: AccountNumber,
    amount: Decimal,
    result: Result<Decimal, AccountError>,
) -> (Option<Decimal>, Option<ErrorKind>) {
    match result {
        Ok(new_balance) => {
            info!(%number, %amount, %new_balance, "{operation} passed");
            (Some(new_balance), None)
        }
        Err(err) => {
            warn!(%number, %amount, %err, "{operation} failed");
            (None, Some(err.into()))
        }
    }
}
