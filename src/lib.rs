//! aerocluster - node-side coordinator for certification-based synchronous
//! multi-master replication
//!
//! The replication provider certifies and orders write sets. This crate
//! drives the node's side of it: provider lifecycle, cluster membership,
//! state transfer, readiness, total order isolation, brute-force conflict
//! resolution and causal reads.

pub mod cli;
pub mod observability;
pub mod provider;
pub mod replication;
