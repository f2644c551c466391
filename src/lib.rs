pub mod asset;
pub mod capability;
pub mod config;
pub mod crypto;
pub mod detect;
pub mod download;
pub mod error;
pub mod ledger;
pub mod plan;
pub mod retry;
pub mod seal;
pub mod split;
pub mod storage;
pub mod upload;
