//! This library contains the fetchql query engine: a T-SQL parser, planner,
//! and streaming executor for Microsoft Dataverse. SQL text is parsed into an
//! AST, planned into a tree of pull-based plan nodes, and executed lazily
//! against a remote backend, pushing as much work as possible down to the
//! backend's FetchXML and TDS dialects and performing the remainder
//! client-side with bounded memory and cooperative cancellation.
//!
//! The [`dbs::QueryService`] façade is the main entry point. It is generic
//! over the [`backend`] traits, so the engine can be driven against the real
//! Dataverse HTTP endpoints or against the in-memory backend used by the
//! test suite.

#![allow(clippy::type_complexity)]

#[macro_use]
mod mac;

pub mod backend;
pub mod cnf;
pub mod ctx;
pub mod dbs;
pub mod err;
pub mod exe;
pub mod exp;
pub mod fnc;
pub mod meta;
pub mod plan;
pub mod sql;
pub mod syn;

pub use dbs::QueryService;
pub use err::Error;
