//! The capability interface between the transport and an RDMA provider.
//!
//! Everything above this trait (connection lifecycle, handshake, flow
//! control, the request protocol) is written against [`Verbs`], so it runs
//! unchanged on the in-process [`SimFabric`](crate::rdma::sim::SimFabric)
//! and, with the `ibverbs` feature, on real hardware.

use std::hint;
use std::io;

use crate::rdma::buf::RegionBuf;
use crate::rdma::cq::Wc;
use crate::rdma::gid::Gid;
use crate::rdma::mr::{MrInfo, MrRemote, Permission};
use crate::rdma::qp::{QpCaps, Transition};
use crate::rdma::type_alias::*;

/// Port state. Discriminants are those of `enum ibv_port_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PortState {
    Nop = 0,
    Down = 1,
    Init = 2,
    Armed = 3,
    Active = 4,
    ActiveDefer = 5,
}

impl From<u32> for PortState {
    fn from(state: u32) -> Self {
        match state {
            1 => PortState::Down,
            2 => PortState::Init,
            3 => PortState::Armed,
            4 => PortState::Active,
            5 => PortState::ActiveDefer,
            _ => PortState::Nop,
        }
    }
}

/// The subset of port attributes a connection needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAttr {
    pub state: PortState,
    pub lid: Lid,
}

/// RDMA provider capabilities.
///
/// Handles are plain values owned by the caller; each `destroy_*` /
/// `dealloc_*` / `dereg_*` / `close_*` consumes its handle, so a resource is
/// released at most once. Failures carry the provider's errno as an
/// [`io::Error`].
pub trait Verbs: Send {
    /// Opened device context.
    type Context: Send;
    /// Protection domain.
    type Pd: Send;
    /// Completion queue.
    type Cq: Send;
    /// Reliable-connected queue pair.
    type Qp: Send;
    /// Registered memory region.
    type Mr: Send;

    /// Names of the RDMA devices present, in enumeration order.
    fn devices(&self) -> io::Result<Vec<String>>;

    fn open_device(&self, name: &str) -> io::Result<Self::Context>;
    fn close_device(&self, ctx: Self::Context) -> io::Result<()>;

    fn query_port(&self, ctx: &Self::Context, port_num: PortNum) -> io::Result<PortAttr>;
    fn query_gid(&self, ctx: &Self::Context, port_num: PortNum, index: GidIndex) -> io::Result<Gid>;

    fn alloc_pd(&self, ctx: &Self::Context) -> io::Result<Self::Pd>;
    fn dealloc_pd(&self, pd: Self::Pd) -> io::Result<()>;

    /// Create a completion queue with at least `depth` entries.
    fn create_cq(&self, ctx: &Self::Context, depth: u32) -> io::Result<Self::Cq>;
    fn destroy_cq(&self, cq: Self::Cq) -> io::Result<()>;

    /// Create a reliable-connected queue pair in the RESET state.
    fn create_qp(
        &self,
        pd: &Self::Pd,
        send_cq: &Self::Cq,
        recv_cq: &Self::Cq,
        caps: &QpCaps,
    ) -> io::Result<Self::Qp>;
    fn destroy_qp(&self, qp: Self::Qp) -> io::Result<()>;

    fn qp_num(&self, qp: &Self::Qp) -> Qpn;

    /// Apply one state transition. The provider rejects a transition that
    /// does not start from the queue pair's current state.
    fn modify_qp(&self, qp: &Self::Qp, transition: &Transition) -> io::Result<()>;

    /// Register the whole of `buf` with the given access permissions.
    fn reg_mr(&self, pd: &Self::Pd, buf: &RegionBuf, perm: Permission) -> io::Result<Self::Mr>;
    fn dereg_mr(&self, mr: Self::Mr) -> io::Result<()>;

    fn mr_info(&self, mr: &Self::Mr) -> MrInfo;

    /// Post one RDMA WRITE of the first `len` bytes of `local` to `remote`.
    ///
    /// Posting into a full send queue fails with `ENOMEM`.
    fn post_write(
        &self,
        qp: &Self::Qp,
        local: &Self::Mr,
        len: usize,
        remote: MrRemote,
        wr_id: WrId,
        signaled: bool,
    ) -> io::Result<()>;

    /// Poll up to `wc.len()` completions, returning how many were written.
    fn poll_cq(&self, cq: &Self::Cq, wc: &mut [Wc]) -> io::Result<usize>;

    /// Called once per iteration of every busy-poll loop.
    #[inline]
    fn relax(&self) {
        hint::spin_loop();
    }
}
