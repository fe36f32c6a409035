//! ChatRelay Billing - client for the external wallet/billing service
//!
//! Wraps the three billing operations (pre-authorize, settle, balance)
//! plus identity resolution behind the [`BillingApi`] trait, with uniform
//! retry/backoff on 5xx and network errors and typed error surfacing.

mod client;
mod error;
mod http_client;
mod retry;

pub use client::{
    BalanceInfo, BillingApi, BillingOutcome, DenyReason, HttpBillingClient, IdentityInfo,
    IdentityRequest, SettleAction,
};
pub use error::{BillingError, Result};
pub use retry::BillingRetryConfig;
