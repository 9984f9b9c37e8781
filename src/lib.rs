#![forbid(unsafe_code)]

//! Spreadsheet driven YouTube uploader for NewTube channels.

pub mod auth;
pub mod config;
pub mod error;
pub mod ledger;
pub mod paging;
pub mod reconcile;
pub mod sheet;
pub mod upload;
pub mod youtube;

#[cfg(test)]
mod test_support;
