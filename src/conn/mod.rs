//! One RDMA connection: its resources, its peer, and its send path.
//!
//! A [`Connection`] owns a device context, a protection domain, a send and a
//! receive completion queue, one reliable-connected queue pair and two
//! registered buffers. The *inbound* buffer is the target of the peer's
//! writes; the *outbound* buffer is where local messages are staged before
//! being written into the peer's inbound buffer.
//!
//! Resources are either all held or all released. [`Connection::create`]
//! rolls back whatever it acquired when a step fails, and
//! [`Connection::destroy`] runs every release step even when some fail.

use std::fmt;
use std::io;

use regex::Regex;
use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::rdma::buf::RegionBuf;
use crate::rdma::gid::Gid;
use crate::rdma::mr::Permission;
use crate::rdma::type_alias::*;
use crate::rdma::verbs::{PortAttr, PortState, Verbs};

pub mod flow;
pub mod handshake;

pub use self::flow::{FlowController, TransportError};
pub use self::handshake::{HandshakeError, IdentityParseError, PeerIdentity};

/// Which end of the request protocol a connection serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Writes requests, polls for responses.
    Client,
    /// Polls for requests, writes responses.
    Server,
}

impl Role {
    /// Value of the inbound opcode slot while no message is pending.
    pub const fn empty_marker(self) -> u8 {
        match self {
            Role::Client => 0xFF,
            Role::Server => 0x00,
        }
    }
}

/// A step of [`Connection::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    DeviceList,
    OpenDevice,
    QueryPort,
    ResolveGidIndex,
    QueryGid,
    AllocPd,
    CreateSendCq,
    CreateRecvCq,
    CreateQp,
    RegisterInbound,
    RegisterOutbound,
}

/// A step of [`Connection::destroy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    Drain,
    DestroyQp,
    DeregisterInbound,
    DeregisterOutbound,
    DestroySendCq,
    DestroyRecvCq,
    DeallocPd,
    CloseDevice,
}

/// Resource setup error type.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("no RDMA device found")]
    NoDevice,

    #[error("no RDMA device matches `{0}`")]
    NoMatchingDevice(String),

    #[error("port {port} is {state:?}")]
    PortDown { port: PortNum, state: PortState },

    #[error("setup step {step:?} failed")]
    Setup {
        step: SetupStep,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration")]
    Config(#[from] ConfigError),
}

fn setup(step: SetupStep) -> impl FnOnce(io::Error) -> ResourceError {
    move |source| ResourceError::Setup { step, source }
}

/// Every step of a teardown that failed, in the order attempted.
#[derive(Debug, Error)]
pub struct TeardownError {
    pub failures: Vec<(TeardownStep, io::Error)>,
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} teardown step(s) failed:", self.failures.len())?;
        for (step, err) in &self.failures {
            write!(f, " {:?} ({})", step, err)?;
        }
        Ok(())
    }
}

/// Handles acquired so far. Also the release path of a complete set.
struct Partial<V: Verbs> {
    ctx: Option<V::Context>,
    pd: Option<V::Pd>,
    send_cq: Option<V::Cq>,
    recv_cq: Option<V::Cq>,
    qp: Option<V::Qp>,
    inbound_mr: Option<V::Mr>,
    outbound_mr: Option<V::Mr>,
}

impl<V: Verbs> Partial<V> {
    fn new() -> Self {
        Self {
            ctx: None,
            pd: None,
            send_cq: None,
            recv_cq: None,
            qp: None,
            inbound_mr: None,
            outbound_mr: None,
        }
    }

    /// Release every held handle, dependents first.
    fn release(self, verbs: &V) -> Vec<(TeardownStep, io::Error)> {
        let mut failures = Vec::new();
        let mut run = |step, res: io::Result<()>| {
            if let Err(e) = res {
                log::error!("ibcached: teardown step {:?} failed: {}", step, e);
                failures.push((step, e));
            }
        };

        if let Some(qp) = self.qp {
            run(TeardownStep::DestroyQp, verbs.destroy_qp(qp));
        }
        if let Some(mr) = self.inbound_mr {
            run(TeardownStep::DeregisterInbound, verbs.dereg_mr(mr));
        }
        if let Some(mr) = self.outbound_mr {
            run(TeardownStep::DeregisterOutbound, verbs.dereg_mr(mr));
        }
        if let Some(cq) = self.send_cq {
            run(TeardownStep::DestroySendCq, verbs.destroy_cq(cq));
        }
        if let Some(cq) = self.recv_cq {
            run(TeardownStep::DestroyRecvCq, verbs.destroy_cq(cq));
        }
        if let Some(pd) = self.pd {
            run(TeardownStep::DeallocPd, verbs.dealloc_pd(pd));
        }
        if let Some(ctx) = self.ctx {
            run(TeardownStep::CloseDevice, verbs.close_device(ctx));
        }
        failures
    }

    fn complete(self) -> Result<Handles<V>, Self> {
        match self {
            Partial {
                ctx: Some(ctx),
                pd: Some(pd),
                send_cq: Some(send_cq),
                recv_cq: Some(recv_cq),
                qp: Some(qp),
                inbound_mr: Some(inbound_mr),
                outbound_mr: Some(outbound_mr),
            } => Ok(Handles {
                ctx,
                pd,
                send_cq,
                recv_cq,
                qp,
                inbound_mr,
                outbound_mr,
            }),
            partial => Err(partial),
        }
    }
}

struct Handles<V: Verbs> {
    ctx: V::Context,
    pd: V::Pd,
    send_cq: V::Cq,
    recv_cq: V::Cq,
    qp: V::Qp,
    inbound_mr: V::Mr,
    outbound_mr: V::Mr,
}

impl<V: Verbs> From<Handles<V>> for Partial<V> {
    fn from(h: Handles<V>) -> Self {
        Self {
            ctx: Some(h.ctx),
            pd: Some(h.pd),
            send_cq: Some(h.send_cq),
            recv_cq: Some(h.recv_cq),
            qp: Some(h.qp),
            inbound_mr: Some(h.inbound_mr),
            outbound_mr: Some(h.outbound_mr),
        }
    }
}

struct Resources<V: Verbs> {
    handles: Handles<V>,
    // Dropped only after the regions over them are deregistered.
    inbound: RegionBuf,
    outbound: RegionBuf,
    device: String,
    port: PortAttr,
    gid_index: Option<GidIndex>,
    gid: Gid,
    flow: FlowController,
    peer: Option<PeerIdentity>,
}

/// Facts learned about the local port during setup.
struct Local {
    device: String,
    port: PortAttr,
    gid_index: Option<GidIndex>,
    gid: Gid,
}

/// An RDMA connection endpoint.
pub struct Connection<V: Verbs> {
    verbs: V,
    config: Config,
    role: Role,
    res: Option<Resources<V>>,
}

impl<V: Verbs> fmt::Debug for Connection<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Connection");
        s.field("role", &self.role).field("ready", &self.is_ready());
        if let Some(res) = &self.res {
            s.field("device", &res.device)
                .field("qpn", &self.verbs.qp_num(&res.handles.qp))
                .field("peer", &res.peer);
        }
        s.finish()
    }
}

impl<V: Verbs> Connection<V> {
    /// An unready connection. Nothing is acquired until [`create`](Self::create).
    pub fn new(verbs: V, config: Config, role: Role) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            verbs,
            config,
            role,
            res: None,
        })
    }

    /// [`new`](Self::new) followed by [`create`](Self::create).
    pub fn open(verbs: V, config: Config, role: Role) -> Result<Self, ResourceError> {
        let mut conn = Self::new(verbs, config, role)?;
        conn.create()?;
        Ok(conn)
    }

    /// Acquire every resource. No-op when already ready; on failure nothing
    /// stays acquired.
    pub fn create(&mut self) -> Result<(), ResourceError> {
        if self.res.is_some() {
            return Ok(());
        }

        let inbound = RegionBuf::new(self.config.buf_size);
        let outbound = RegionBuf::new(self.config.buf_size);
        inbound
            .store(0, self.role.empty_marker())
            .map_err(|e| setup(SetupStep::RegisterInbound)(io::Error::other(e)))?;

        let mut partial = Partial::new();
        let local = match self.acquire(&mut partial, &inbound, &outbound) {
            Ok(local) => local,
            Err(e) => {
                log::error!("ibcached: connection setup failed, rolling back: {}", e);
                partial.release(&self.verbs);
                return Err(e);
            }
        };
        let handles = match partial.complete() {
            Ok(handles) => handles,
            Err(partial) => {
                partial.release(&self.verbs);
                return Err(setup(SetupStep::RegisterOutbound)(io::Error::other(
                    "resource set incomplete",
                )));
            }
        };

        log::info!(
            "ibcached: {:?} connection ready on {} (qpn {:#x}, lid {:#x})",
            self.role,
            local.device,
            self.verbs.qp_num(&handles.qp),
            local.port.lid
        );
        self.res = Some(Resources {
            handles,
            inbound,
            outbound,
            device: local.device,
            port: local.port,
            gid_index: local.gid_index,
            gid: local.gid,
            flow: FlowController::new(self.config.max_send_wr, self.config.drain_budget()),
            peer: None,
        });
        Ok(())
    }

    fn pick_device(&self) -> Result<String, ResourceError> {
        let devices = self.verbs.devices().map_err(setup(SetupStep::DeviceList))?;
        if devices.is_empty() {
            return Err(ResourceError::NoDevice);
        }
        let found = match &self.config.device {
            None => devices.into_iter().next(),
            Some(pattern) => {
                let re = Regex::new(pattern).map_err(ConfigError::from)?;
                devices.into_iter().find(|name| re.is_match(name))
            }
        };
        found.ok_or_else(|| {
            ResourceError::NoMatchingDevice(self.config.device.clone().unwrap_or_default())
        })
    }

    fn acquire(
        &self,
        partial: &mut Partial<V>,
        inbound: &RegionBuf,
        outbound: &RegionBuf,
    ) -> Result<Local, ResourceError> {
        let verbs = &self.verbs;
        let port_num = self.config.port;

        let device = self.pick_device()?;
        let ctx = partial.ctx.insert(
            verbs
                .open_device(&device)
                .map_err(setup(SetupStep::OpenDevice))?,
        );

        let port = verbs
            .query_port(ctx, port_num)
            .map_err(setup(SetupStep::QueryPort))?;
        if !matches!(port.state, PortState::Active | PortState::ActiveDefer) {
            return Err(ResourceError::PortDown {
                port: port_num,
                state: port.state,
            });
        }

        let gid_index = self
            .config
            .gid_index
            .resolve()
            .map_err(setup(SetupStep::ResolveGidIndex))?;
        let gid = match gid_index {
            Some(index) => verbs
                .query_gid(ctx, port_num, index)
                .map_err(setup(SetupStep::QueryGid))?,
            None => Gid::default(),
        };
        log::debug!(
            "ibcached: opened {} port {} (lid {:#x}, gid index {:?}, gid {})",
            device,
            port_num,
            port.lid,
            gid_index,
            gid
        );

        let pd = partial
            .pd
            .insert(verbs.alloc_pd(ctx).map_err(setup(SetupStep::AllocPd))?);
        let depth = self.config.cq_depth;
        let send_cq = partial.send_cq.insert(
            verbs
                .create_cq(ctx, depth)
                .map_err(setup(SetupStep::CreateSendCq))?,
        );
        let recv_cq = partial.recv_cq.insert(
            verbs
                .create_cq(ctx, depth)
                .map_err(setup(SetupStep::CreateRecvCq))?,
        );
        let qp = verbs
            .create_qp(pd, send_cq, recv_cq, &self.config.qp_caps())
            .map_err(setup(SetupStep::CreateQp))?;
        log::debug!("ibcached: created qp {:#x}", verbs.qp_num(&qp));
        partial.qp = Some(qp);

        let inbound_mr = verbs
            .reg_mr(pd, inbound, Permission::INBOUND)
            .map_err(setup(SetupStep::RegisterInbound))?;
        let info = verbs.mr_info(&inbound_mr);
        log::debug!(
            "ibcached: inbound region addr {:#x} len {} rkey {:#x}",
            info.addr,
            info.len,
            info.rkey
        );
        partial.inbound_mr = Some(inbound_mr);
        partial.outbound_mr = Some(
            verbs
                .reg_mr(pd, outbound, Permission::OUTBOUND)
                .map_err(setup(SetupStep::RegisterOutbound))?,
        );

        Ok(Local {
            device,
            port,
            gid_index,
            gid,
        })
    }

    /// Release every resource. No-op when not ready. Every step runs even
    /// if an earlier one fails; the failures are collected.
    pub fn destroy(&mut self) -> Result<(), TeardownError> {
        let Some(mut res) = self.res.take() else {
            return Ok(());
        };

        let mut failures = Vec::new();
        if res.flow.outstanding() > 0 {
            if let Err(e) = res.flow.quiesce(&self.verbs, &res.handles.send_cq) {
                log::error!("ibcached: teardown step {:?} failed: {}", TeardownStep::Drain, e);
                let kind = match e {
                    TransportError::Drain(_) => io::ErrorKind::TimedOut,
                    _ => io::ErrorKind::Other,
                };
                failures.push((TeardownStep::Drain, io::Error::new(kind, e)));
            }
        }
        failures.extend(Partial::from(res.handles).release(&self.verbs));
        drop((res.inbound, res.outbound));

        if failures.is_empty() {
            log::info!("ibcached: {:?} connection on {} torn down", self.role, res.device);
            Ok(())
        } else {
            Err(TeardownError { failures })
        }
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.res.is_some()
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn verbs(&self) -> &V {
        &self.verbs
    }

    /// One iteration's worth of backoff inside a poll loop.
    #[inline]
    pub fn relax(&self) {
        self.verbs.relax()
    }

    /// Target of the peer's writes.
    pub fn inbound(&self) -> Option<&RegionBuf> {
        self.res.as_ref().map(|r| &r.inbound)
    }

    /// Staging area of local messages.
    pub fn outbound(&self) -> Option<&RegionBuf> {
        self.res.as_ref().map(|r| &r.outbound)
    }

    pub fn gid_index(&self) -> Option<GidIndex> {
        self.res.as_ref().and_then(|r| r.gid_index)
    }

    pub fn peer(&self) -> Option<&PeerIdentity> {
        self.res.as_ref().and_then(|r| r.peer.as_ref())
    }

    /// Signaled writes not yet seen completed.
    pub fn outstanding(&self) -> u32 {
        self.res.as_ref().map_or(0, |r| r.flow.outstanding())
    }

    /// What the peer needs in order to reach this side.
    pub fn local_identity(&self) -> Result<PeerIdentity, HandshakeError> {
        let res = self.res.as_ref().ok_or(HandshakeError::NotReady)?;
        Ok(PeerIdentity {
            qpn: self.verbs.qp_num(&res.handles.qp),
            lid: res.port.lid,
            gid: res.gid,
            remote: self.verbs.mr_info(&res.handles.inbound_mr).as_remote(),
        })
    }

    /// Bring the queue pair to RTS addressed at `peer`, and direct every
    /// subsequent [`send`](Self::send) into the peer's inbound buffer.
    pub fn connect(&mut self, peer: &PeerIdentity) -> Result<(), HandshakeError> {
        let res = self.res.as_mut().ok_or(HandshakeError::NotReady)?;
        if res.peer.is_some() {
            return Err(HandshakeError::AlreadyConnected);
        }
        handshake::bring_up(
            &self.verbs,
            &res.handles.qp,
            self.config.port,
            res.gid_index,
            peer,
        )?;
        res.peer = Some(*peer);
        log::info!(
            "ibcached: connected to qpn {:#x} lid {:#x}",
            peer.qpn,
            peer.lid
        );
        Ok(())
    }

    /// Write the first `len` bytes of the outbound buffer to the front of the
    /// peer's inbound buffer.
    pub fn send(&mut self, len: usize) -> Result<WrId, TransportError> {
        let res = self.res.as_mut().ok_or(TransportError::NotReady)?;
        let peer = res.peer.as_ref().ok_or(TransportError::NoPeer)?;
        if len > res.outbound.len() {
            return Err(TransportError::TooLong {
                len,
                capacity: res.outbound.len(),
            });
        }
        res.flow.post(
            &self.verbs,
            &res.handles.qp,
            &res.handles.send_cq,
            &res.handles.outbound_mr,
            len,
            peer.remote,
        )
    }

    /// Wait until every posted write has completed.
    pub fn quiesce(&mut self) -> Result<(), TransportError> {
        let res = self.res.as_mut().ok_or(TransportError::NotReady)?;
        res.flow.quiesce(&self.verbs, &res.handles.send_cq)
    }
}

impl<V: Verbs> Drop for Connection<V> {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            log::error!("ibcached: failed to tear down connection on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GidIndexPolicy;
    use crate::rdma::sim::{HostDesc, SimFabric, SimOp, SimVerbs};

    fn config() -> Config {
        Config {
            gid_index: GidIndexPolicy::Fixed { index: 1 },
            buf_size: 256,
            ..Config::default()
        }
    }

    #[test]
    fn create_is_idempotent() {
        let fabric = SimFabric::new();
        let verbs = fabric.host("a");
        let mut conn = Connection::open(verbs.clone(), config(), Role::Server).unwrap();
        let before = verbs.live();
        conn.create().unwrap();
        assert_eq!(verbs.live(), before);
        assert_eq!(before.mrs, 2);
        assert_eq!(before.cqs, 2);
        assert_eq!(conn.inbound().unwrap().load(0).unwrap(), 0x00);
    }

    #[test]
    fn client_inbound_is_armed() {
        let fabric = SimFabric::new();
        let conn = Connection::open(fabric.host("a"), config(), Role::Client).unwrap();
        assert_eq!(conn.inbound().unwrap().load(0).unwrap(), 0xFF);
        assert_eq!(conn.role(), Role::Client);
    }

    #[test]
    fn destroy_twice() {
        let fabric = SimFabric::new();
        let verbs = fabric.host("a");
        let mut conn = Connection::open(verbs.clone(), config(), Role::Server).unwrap();
        conn.destroy().unwrap();
        assert!(verbs.live().is_empty());
        assert!(!conn.is_ready());
        conn.destroy().unwrap();
        assert!(matches!(conn.local_identity(), Err(HandshakeError::NotReady)));
        assert!(matches!(conn.send(1), Err(TransportError::NotReady)));
    }

    #[test]
    fn failed_setup_rolls_back() {
        for op in [
            SimOp::AllocPd,
            SimOp::CreateCq,
            SimOp::CreateQp,
            SimOp::RegMr,
            SimOp::QueryGid,
        ] {
            for skip in 0..2 {
                let fabric = SimFabric::new();
                let verbs = fabric.host("a");
                verbs.inject_fault(op, skip);
                let mut conn = Connection::new(verbs.clone(), config(), Role::Client).unwrap();
                match conn.create() {
                    Ok(()) => {
                        // The op ran fewer than `skip + 1` times.
                        conn.destroy().unwrap();
                    }
                    Err(ResourceError::Setup { .. }) => assert!(!conn.is_ready()),
                    Err(e) => panic!("unexpected error {:?}", e),
                }
                assert!(verbs.live().is_empty(), "{:?}/{} leaked {:?}", op, skip, verbs.live());
            }
        }
    }

    #[test]
    fn outbound_registration_failure_names_step() {
        let fabric = SimFabric::new();
        let verbs = fabric.host("a");
        verbs.inject_fault(SimOp::RegMr, 1);
        let err = Connection::open(verbs.clone(), config(), Role::Server).unwrap_err();
        assert!(matches!(
            err,
            ResourceError::Setup {
                step: SetupStep::RegisterOutbound,
                ..
            }
        ));
        assert!(verbs.live().is_empty());
    }

    #[test]
    fn teardown_continues_past_failures() {
        let fabric = SimFabric::new();
        let verbs = fabric.host("a");
        let mut conn = Connection::open(verbs.clone(), config(), Role::Server).unwrap();
        verbs.inject_fault(SimOp::DeregMr, 0);
        let err = conn.destroy().unwrap_err();
        let steps: Vec<_> = err.failures.iter().map(|(step, _)| *step).collect();
        // The stuck region keeps its protection domain, and that keeps the
        // device open; everything else is released.
        assert_eq!(
            steps,
            [
                TeardownStep::DeregisterInbound,
                TeardownStep::DeallocPd,
                TeardownStep::CloseDevice
            ]
        );
        let live = verbs.live();
        assert_eq!((live.mrs, live.qps, live.cqs), (1, 0, 0));
        assert!(!conn.is_ready());
        conn.destroy().unwrap();
    }

    #[test]
    fn device_selection() {
        let fabric = SimFabric::new();
        let verbs = fabric.add_host(HostDesc::new("a", 7).with_devices(["sim_0", "mlx5_1"]));
        let conn = Connection::open(
            verbs.clone(),
            Config {
                device: Some("^mlx5_".into()),
                ..config()
            },
            Role::Server,
        )
        .unwrap();
        assert!(format!("{:?}", conn).contains("mlx5_1"));
        assert_eq!(conn.local_identity().unwrap().lid, 7);

        let err = Connection::open(
            verbs,
            Config {
                device: Some("^ocrdma".into()),
                ..config()
            },
            Role::Server,
        )
        .unwrap_err();
        assert!(matches!(err, ResourceError::NoMatchingDevice(p) if p == "^ocrdma"));

        let none = fabric.add_host(HostDesc::new("b", 8).with_devices(Vec::<String>::new()));
        assert!(matches!(
            Connection::open(none, config(), Role::Server),
            Err(ResourceError::NoDevice)
        ));
    }

    #[test]
    fn down_port_is_rejected() {
        let fabric = SimFabric::new();
        let verbs = fabric.add_host(HostDesc::new("a", 1).with_port_state(PortState::Down));
        let err = Connection::open(verbs.clone(), config(), Role::Server).unwrap_err();
        assert!(matches!(err, ResourceError::PortDown { port: 1, .. }));
        assert!(verbs.live().is_empty());
    }

    fn pair(fabric: &SimFabric) -> (Connection<SimVerbs>, Connection<SimVerbs>) {
        let mut a = Connection::open(fabric.host("a"), config(), Role::Client).unwrap();
        let mut b = Connection::open(fabric.host("b"), config(), Role::Server).unwrap();
        let (ia, ib) = (a.local_identity().unwrap(), b.local_identity().unwrap());
        a.connect(&ib).unwrap();
        b.connect(&ia).unwrap();
        (a, b)
    }

    #[test]
    fn send_lands_in_peer_inbound() {
        let fabric = SimFabric::new();
        let (mut a, b) = pair(&fabric);
        assert!(matches!(
            a.connect(&b.local_identity().unwrap()),
            Err(HandshakeError::AlreadyConnected)
        ));

        a.outbound().unwrap().write(0, b"\x03hello").unwrap();
        a.send(6).unwrap();
        a.quiesce().unwrap();
        assert_eq!(b.inbound().unwrap().to_vec(0, 6).unwrap(), b"\x03hello");
        assert_eq!(a.outstanding(), 0);

        assert!(matches!(
            a.send(257),
            Err(TransportError::TooLong { len: 257, capacity: 256 })
        ));
    }

    #[test]
    fn send_without_peer() {
        let fabric = SimFabric::new();
        let mut a = Connection::open(fabric.host("a"), config(), Role::Client).unwrap();
        assert!(matches!(a.send(1), Err(TransportError::NoPeer)));
    }

    #[test]
    fn drop_releases_everything() {
        let fabric = SimFabric::new();
        let va = fabric.host("a");
        let vb = fabric.host("b");
        {
            let (mut a, _b) = pair(&fabric);
            a.outbound().unwrap().write(0, &[0x03]).unwrap();
            a.send(1).unwrap();
        }
        assert!(va.live().is_empty());
        assert!(vb.live().is_empty());
    }

    #[test]
    fn lid_only_routing() {
        let fabric = SimFabric::new();
        let mut a = Connection::open(
            fabric.host("a"),
            Config {
                gid_index: GidIndexPolicy::Disabled,
                ..config()
            },
            Role::Client,
        )
        .unwrap();
        assert_eq!(a.gid_index(), None);
        assert_eq!(a.local_identity().unwrap().gid, Gid::default());

        let b = Connection::open(
            fabric.host("b"),
            Config {
                gid_index: GidIndexPolicy::Fixed { index: 9 },
                ..config()
            },
            Role::Server,
        );
        assert!(matches!(
            b,
            Err(ResourceError::Setup {
                step: SetupStep::QueryGid,
                ..
            })
        ));

        let c = Connection::open(fabric.host("c"), config(), Role::Server).unwrap();
        a.connect(&c.local_identity().unwrap()).unwrap();
    }
}
