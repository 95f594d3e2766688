//! RDMA functionalities.

pub mod buf;
pub mod cq;
pub mod gid;
#[cfg(feature = "ibverbs")]
pub mod ib;
pub mod mr;
pub mod qp;
pub mod sim;
pub mod type_alias;
pub mod verbs;
