//! Mediadex - channel media catalog
//!
//! Walks messaging-channel history, parses media filenames into titles,
//! merges per-title aggregates and keeps one rendered index post per
//! title up to date.

pub mod cli;
pub mod config;
pub mod db;
pub mod services;
