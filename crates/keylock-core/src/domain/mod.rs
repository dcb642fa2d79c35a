//! Domain entities for Keylock.
//!
//! This module contains pure business rules with no infrastructure
//! dependencies.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! Clean Architecture organises code into concentric layers.  The innermost
//! layer is called the **domain** (or "entities" layer).  Domain code:
//!
//! - Contains the core business rules of the application.
//! - Has **no** imports from network libraries, database drivers, or async
//!   runtimes.
//! - Can be compiled and tested on any platform without any external setup.
//!
//! Here that means: which colours a key may have, how long the keyboard is,
//! what a valid client identity looks like, and what a held lock records.

/// Keyboard state: the shared row of coloured keys.
pub mod keyboard;

/// Client identity presented at connection time.
pub mod identity;

/// Control-lock records and acquire outcomes.
pub mod lock;
