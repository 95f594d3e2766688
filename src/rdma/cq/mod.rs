//! Completion queue entries.
//!
//! Completion queues themselves are backend handles (see [`Verbs::Cq`]);
//! this module only holds what is polled out of them.
//!
//! [`Verbs::Cq`]: crate::rdma::verbs::Verbs::Cq

pub use self::wc::*;

mod wc;

/// Number of entries fetched from a completion queue per poll call.
pub const POLL_BATCH: usize = 32;
