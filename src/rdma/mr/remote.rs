use crate::rdma::type_alias::RKey;

/// Remote registered memory.
///
/// This structure describes a peer's memory region as advertised during the
/// handshake and does not hold any RDMA resources locally. Only the start
/// address and the remote key travel over the wire; the peer's NIC enforces
/// the bounds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MrRemote {
    pub addr: u64,
    pub rkey: RKey,
}

impl MrRemote {
    /// Create a new piece of remote registered memory data.
    pub fn new(addr: u64, rkey: RKey) -> Self {
        Self { addr, rkey }
    }

    /// Get the remote address at the given offset.
    #[inline]
    pub fn at(&self, offset: usize) -> u64 {
        self.addr + offset as u64
    }
}
