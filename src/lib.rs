//! Ledger and sale engine for the GRO token.
//!
//! The crate is layered the same way from the bottom up:
//!
//! * [`ledger`] — balances, total supply, the token cap and an append-only
//!   event log, with staged (all-or-nothing) mutation batches.
//! * [`sale`] — the sale state machine on top of the ledger: presale
//!   allocation with bonus and developer share, purchases, whitelisting and
//!   the request-then-withdraw protocol.
//! * [`store`] — durable JSON snapshots of the engine.
//! * [`service`] — single-writer wrapper that commits and persists calls.
//! * [`rpc`] — line-delimited JSON wire protocol, TCP server and client.
//!
//! [`address`], [`amount`] and [`config`] hold the shared vocabulary.

pub mod address;
pub mod amount;
pub mod config;
pub mod ledger;
pub mod rpc;
pub mod sale;
pub mod service;
pub mod store;

pub use address::{Address, AddressError};
pub use amount::{Amount, TOKEN_DECIMALS, TOKEN_SCALE};
pub use config::{ConfigError, SaleConfig};
pub use ledger::{LedgerError, LedgerState};
pub use sale::{first_digit, BonusRule, SaleEngine, SaleError};
pub use service::{SaleService, ServiceError};
pub use store::{SaleStore, StoreError};
