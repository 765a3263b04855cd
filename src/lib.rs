#![forbid(unsafe_code)]

//! Library behind the highlight-reel site: a small video showcase with one
//! administrator who uploads, features and deletes videos.
//!
//! The binaries only wire these modules to HTTP and the command line.

pub mod admin;
pub mod config;
pub mod error;
pub mod intake;
pub mod listing;
pub mod present;
pub mod security;
pub mod session;
pub mod store;
