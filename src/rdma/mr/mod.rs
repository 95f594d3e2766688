//! Memory region descriptors.

mod perm;
mod remote;

pub use self::perm::*;
pub use self::remote::*;
use crate::rdma::type_alias::{LKey, RKey};

/// Registration result of a local memory region, as reported by the provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MrInfo {
    /// Start address of the registered memory area.
    pub addr: u64,
    /// Length of the registered memory area.
    pub len: usize,
    pub lkey: LKey,
    pub rkey: RKey,
}

impl MrInfo {
    /// View this local memory region as a remote memory region for RDMA access
    /// from remote peers.
    #[inline]
    pub fn as_remote(&self) -> MrRemote {
        MrRemote::new(self.addr, self.rkey)
    }
}
