//! A deterministic in-process RDMA fabric.
//!
//! Hosts attached to one [`SimFabric`] can open devices, connect queue pairs
//! and deposit one-sided writes into each other's registered
//! [`RegionBuf`]s, exactly as far as [`Verbs`] exposes. Byte visibility is
//! controlled by [`Delivery`], so a reader polling a buffer can be made to
//! observe partially landed messages.

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

pub use self::fabric::{Delivery, HostDesc, LiveCounts, SIM_PORT};
pub use self::fault::SimOp;

use self::fabric::Fabric;
use crate::rdma::buf::RegionBuf;
use crate::rdma::cq::Wc;
use crate::rdma::gid::Gid;
use crate::rdma::mr::{MrInfo, MrRemote, Permission};
use crate::rdma::qp::{QpCaps, Transition};
use crate::rdma::type_alias::*;
use crate::rdma::verbs::{PortAttr, Verbs};

mod fabric;
mod fault;

/// A simulated fabric connecting any number of hosts.
#[derive(Clone)]
pub struct SimFabric {
    inner: Arc<Mutex<Fabric>>,
}

impl Default for SimFabric {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SimFabric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimFabric")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl SimFabric {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Fabric::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Fabric> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a host with one device and a LID assigned in attach order.
    pub fn host(&self, name: &str) -> SimVerbs {
        let mut fabric = self.lock();
        let lid = fabric.host_count() as Lid + 1;
        let host = fabric.add_host(HostDesc::new(name, lid));
        SimVerbs {
            fabric: self.clone(),
            host,
        }
    }

    /// Attach a host described by `desc`.
    pub fn add_host(&self, desc: HostDesc) -> SimVerbs {
        let host = self.lock().add_host(desc);
        SimVerbs {
            fabric: self.clone(),
            host,
        }
    }

    pub fn set_delivery(&self, delivery: Delivery) {
        self.lock().set_delivery(delivery);
    }

    /// Number the next created queue pair `qpn`.
    pub fn set_next_qpn(&self, qpn: Qpn) {
        self.lock().set_next_qpn(qpn);
    }

    /// Writes posted but not yet fully landed.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight()
    }
}

/// One host's view of a [`SimFabric`].
#[derive(Clone)]
pub struct SimVerbs {
    fabric: SimFabric,
    host: usize,
}

impl fmt::Debug for SimVerbs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimVerbs").field("host", &self.name()).finish()
    }
}

impl SimVerbs {
    fn lock(&self) -> MutexGuard<'_, Fabric> {
        self.fabric.lock()
    }

    pub fn name(&self) -> String {
        self.lock().desc(self.host).name.clone()
    }

    pub fn fabric(&self) -> &SimFabric {
        &self.fabric
    }

    /// Fail the call to `op` on this host that follows `skip` successful ones.
    pub fn inject_fault(&self, op: SimOp, skip: usize) {
        self.lock().arm_fault(self.host, op, skip);
    }

    /// Resource handles this host currently holds.
    pub fn live(&self) -> LiveCounts {
        self.lock().live(self.host)
    }
}

/// Simulated device context.
#[derive(Debug)]
pub struct SimContext(u64);

/// Simulated protection domain.
#[derive(Debug)]
pub struct SimPd(u64);

/// Simulated completion queue.
#[derive(Debug)]
pub struct SimCq(u64);

/// Simulated queue pair.
#[derive(Debug)]
pub struct SimQp(Qpn);

/// Simulated memory region.
#[derive(Debug)]
pub struct SimMr(MrInfo);

impl Verbs for SimVerbs {
    type Context = SimContext;
    type Pd = SimPd;
    type Cq = SimCq;
    type Qp = SimQp;
    type Mr = SimMr;

    fn devices(&self) -> io::Result<Vec<String>> {
        self.lock().devices(self.host)
    }

    fn open_device(&self, name: &str) -> io::Result<SimContext> {
        self.lock().open_device(self.host, name).map(SimContext)
    }

    fn close_device(&self, ctx: SimContext) -> io::Result<()> {
        self.lock().close_device(self.host, ctx.0)
    }

    fn query_port(&self, ctx: &SimContext, port_num: PortNum) -> io::Result<PortAttr> {
        self.lock().query_port(self.host, ctx.0, port_num)
    }

    fn query_gid(&self, ctx: &SimContext, port_num: PortNum, index: GidIndex) -> io::Result<Gid> {
        self.lock().query_gid(self.host, ctx.0, port_num, index)
    }

    fn alloc_pd(&self, ctx: &SimContext) -> io::Result<SimPd> {
        self.lock().alloc_pd(self.host, ctx.0).map(SimPd)
    }

    fn dealloc_pd(&self, pd: SimPd) -> io::Result<()> {
        self.lock().dealloc_pd(self.host, pd.0)
    }

    fn create_cq(&self, ctx: &SimContext, depth: u32) -> io::Result<SimCq> {
        self.lock().create_cq(self.host, ctx.0, depth).map(SimCq)
    }

    fn destroy_cq(&self, cq: SimCq) -> io::Result<()> {
        self.lock().destroy_cq(self.host, cq.0)
    }

    fn create_qp(&self, pd: &SimPd, send_cq: &SimCq, recv_cq: &SimCq, caps: &QpCaps) -> io::Result<SimQp> {
        self.lock()
            .create_qp(self.host, pd.0, send_cq.0, recv_cq.0, caps)
            .map(SimQp)
    }

    fn destroy_qp(&self, qp: SimQp) -> io::Result<()> {
        self.lock().destroy_qp(self.host, qp.0)
    }

    fn qp_num(&self, qp: &SimQp) -> Qpn {
        qp.0
    }

    fn modify_qp(&self, qp: &SimQp, transition: &Transition) -> io::Result<()> {
        self.lock().modify_qp(self.host, qp.0, transition)
    }

    fn reg_mr(&self, pd: &SimPd, buf: &RegionBuf, perm: Permission) -> io::Result<SimMr> {
        self.lock().reg_mr(self.host, pd.0, buf, perm).map(SimMr)
    }

    fn dereg_mr(&self, mr: SimMr) -> io::Result<()> {
        self.lock().dereg_mr(self.host, mr.0.lkey)
    }

    fn mr_info(&self, mr: &SimMr) -> MrInfo {
        mr.0
    }

    fn post_write(
        &self,
        qp: &SimQp,
        local: &SimMr,
        len: usize,
        remote: MrRemote,
        wr_id: WrId,
        signaled: bool,
    ) -> io::Result<()> {
        self.lock()
            .post_write(self.host, qp.0, local.0.lkey, len, remote, wr_id, signaled)
    }

    fn poll_cq(&self, cq: &SimCq, wc: &mut [Wc]) -> io::Result<usize> {
        self.lock().poll_cq(self.host, cq.0, wc)
    }

    /// Advance delivery, then let the peer's thread run.
    fn relax(&self) {
        self.lock().step();
        thread::yield_now();
    }
}
