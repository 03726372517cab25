//! mailsync - A protocol-agnostic mail synchronization engine
//!
//! This crate keeps local mailbox storage consistent with remote mail
//! stores: the backend contract every protocol implements, the folder and
//! message reconciliation algorithms, and a background scheduler that
//! syncs many accounts periodically.

pub mod backend;
pub mod config;
pub mod domain;
pub mod services;
pub mod storage;
