//! Integration test suite for the hive manager.
//!
//! These tests drive the control loop end to end against scripted terminal
//! sessions, a counting completion judge and in-memory or JSON stores.
//!
//! # Test Categories
//!
//! - `check_cycle`: whole ticks, escalation, recovery and follow-through
//! - `scheduling`: ordering, assignment, capacity and scaling
//! - `completion`: classifier cache, override rule and fallback
//!
//! # CI Compatibility
//!
//! No tmux server or AI CLI is needed; every collaborator is faked.

mod fixtures;

mod check_cycle;
mod completion;
mod scheduling;
