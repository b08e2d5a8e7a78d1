//! Client core for an on-chain red packet ledger: packets are created with native
//! currency, fungible tokens or non-fungible items, split into shares that other
//! accounts claim, and refunded to their creator after expiry.

pub mod action;
pub mod approval;
pub mod client;
pub mod config;
pub mod decoder;
pub mod deployment;
pub mod eligibility;
pub mod error;
pub mod expiry;
pub mod format;
pub mod gateway;
pub mod ledger;
pub mod list_sync;
pub mod orchestrator;
pub mod stats;
pub mod types;

pub mod test_helpers;
