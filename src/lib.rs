/// Ledger lines: account identity, balance and the active flag.
/// State is modified using events, which are created by validating a request
/// against the current account state.
pub mod account;

/// The command catalogue shared by every transport: requests, responses,
/// error tags and the versioned envelopes joining them by correlation id.
pub mod command;

/// Wire encoding of the command envelopes.
pub mod codec;

/// Account store interface, plus "in memory" implementation.
///
/// NOTE: The dispatcher only depends on the trait, so the in memory
/// implementation can be replaced with something persistent later.
pub mod store;

/// Routes decoded commands to the store and builds the replies.
pub mod dispatcher;

pub mod updates;

pub mod config;

/// Transports. Ideally these would live in their own crates, thin wrappers
/// around [`dispatcher::CommandDispatcher::handle`], but the integration tests
/// drive them directly so they stay here.
pub mod adapter;
