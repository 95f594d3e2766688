use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::io;

use super::fault::{Faults, SimOp};
use crate::rdma::buf::RegionBuf;
use crate::rdma::cq::{Wc, WcStatus};
use crate::rdma::gid::Gid;
use crate::rdma::mr::{MrInfo, MrRemote, Permission};
use crate::rdma::qp::{QpCaps, QpState, Transition};
use crate::rdma::type_alias::*;
use crate::rdma::verbs::{PortAttr, PortState};

/// The only port a simulated device has.
pub const SIM_PORT: PortNum = 1;

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

/// How in-flight writes become visible in the target buffer.
///
/// Delivery happens on [`Verbs::relax`](crate::rdma::verbs::Verbs::relax)
/// and always proceeds in post order. Within the first delivered piece of a
/// write the bytes land back to front, so the opcode byte at the head of a
/// message is the last of them to appear; later pieces land front to back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Every in-flight write lands completely on the next relax.
    #[default]
    Whole,

    /// The oldest write advances by `size` bytes per relax.
    Chunked { size: usize },

    /// The oldest write lands up to `keep` bytes and stalls there. Writes
    /// no longer than `keep` complete normally.
    Torn { keep: usize },
}

/// A simulated host.
#[derive(Debug, Clone)]
pub struct HostDesc {
    pub name: String,
    pub devices: Vec<String>,
    pub lid: Lid,
    pub port_state: PortState,
    pub gids: Vec<Gid>,
}

impl HostDesc {
    /// One active device `sim_0` with four link-local GIDs derived from `lid`.
    pub fn new(name: impl Into<String>, lid: Lid) -> Self {
        let gids = (0..4u8)
            .map(|i| {
                let mut raw = [0u8; 16];
                raw[0] = 0xfe;
                raw[1] = 0x80;
                raw[12..14].copy_from_slice(&lid.to_be_bytes());
                raw[15] = i;
                Gid::from(raw)
            })
            .collect();
        Self {
            name: name.into(),
            devices: vec!["sim_0".to_owned()],
            lid,
            port_state: PortState::Active,
            gids,
        }
    }

    pub fn with_devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.devices = devices.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_port_state(mut self, state: PortState) -> Self {
        self.port_state = state;
        self
    }
}

/// Live resource handles of one host.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LiveCounts {
    pub contexts: usize,
    pub pds: usize,
    pub cqs: usize,
    pub qps: usize,
    pub mrs: usize,
}

impl LiveCounts {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

trait HostBound {
    fn host(&self) -> usize;
}

macro_rules! impl_host_bound {
    ($($ty:ty),*) => {
        $(impl HostBound for $ty {
            fn host(&self) -> usize {
                self.host
            }
        })*
    };
}

struct CtxEntry {
    host: usize,
}

struct PdEntry {
    host: usize,
    ctx: u64,
}

struct CqEntry {
    host: usize,
    ctx: u64,
    depth: usize,
    entries: VecDeque<(Qpn, Wc)>,
    overrun: bool,
}

struct QpEntry {
    host: usize,
    pd: u64,
    send_cq: u64,
    recv_cq: u64,
    caps: QpCaps,
    state: QpState,
    dest_qpn: Qpn,
    sq_inflight: u32,
}

struct MrEntry {
    host: usize,
    pd: u64,
    buf: RegionBuf,
    perm: Permission,
}

impl_host_bound!(CtxEntry, PdEntry, CqEntry, QpEntry, MrEntry);

struct PendingWrite {
    qpn: Qpn,
    wr_id: WrId,
    signaled: bool,
    rkey: RKey,
    target: RegionBuf,
    offset: usize,
    data: Vec<u8>,
    delivered: usize,
}

fn lookup<'a, K: Hash + Eq, V: HostBound>(
    map: &'a HashMap<K, V>,
    key: &K,
    host: usize,
) -> io::Result<&'a V> {
    match map.get(key) {
        Some(v) if v.host() == host => Ok(v),
        _ => Err(errno(libc::EINVAL)),
    }
}

fn lookup_mut<'a, K: Hash + Eq, V: HostBound>(
    map: &'a mut HashMap<K, V>,
    key: &K,
    host: usize,
) -> io::Result<&'a mut V> {
    match map.get_mut(key) {
        Some(v) if v.host() == host => Ok(v),
        _ => Err(errno(libc::EINVAL)),
    }
}

/// Shared state of a simulated fabric.
pub(super) struct Fabric {
    hosts: Vec<(HostDesc, Faults)>,
    next_id: u64,
    next_qpn: Qpn,
    next_key: u32,
    delivery: Delivery,
    contexts: HashMap<u64, CtxEntry>,
    pds: HashMap<u64, PdEntry>,
    cqs: HashMap<u64, CqEntry>,
    qps: HashMap<Qpn, QpEntry>,
    mrs: HashMap<u32, MrEntry>,
    pending: VecDeque<PendingWrite>,
}

impl Fabric {
    pub fn new() -> Self {
        Self {
            hosts: Vec::new(),
            next_id: 1,
            next_qpn: 0x100,
            next_key: 0x1000,
            delivery: Delivery::Whole,
            contexts: HashMap::new(),
            pds: HashMap::new(),
            cqs: HashMap::new(),
            qps: HashMap::new(),
            mrs: HashMap::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn add_host(&mut self, desc: HostDesc) -> usize {
        self.hosts.push((desc, Faults::default()));
        self.hosts.len() - 1
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn desc(&self, host: usize) -> &HostDesc {
        &self.hosts[host].0
    }

    pub fn arm_fault(&mut self, host: usize, op: SimOp, skip: usize) {
        self.hosts[host].1.arm(op, skip);
    }

    pub fn set_delivery(&mut self, delivery: Delivery) {
        self.delivery = delivery;
    }

    pub fn set_next_qpn(&mut self, qpn: Qpn) {
        self.next_qpn = qpn;
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn live(&self, host: usize) -> LiveCounts {
        fn count<K, V: HostBound>(map: &HashMap<K, V>, host: usize) -> usize {
            map.values().filter(|v| v.host() == host).count()
        }
        LiveCounts {
            contexts: count(&self.contexts, host),
            pds: count(&self.pds, host),
            cqs: count(&self.cqs, host),
            qps: count(&self.qps, host),
            mrs: count(&self.mrs, host),
        }
    }

    fn fault(&mut self, host: usize, op: SimOp) -> io::Result<()> {
        self.hosts[host].1.check(op)
    }

    fn fresh_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn devices(&mut self, host: usize) -> io::Result<Vec<String>> {
        self.fault(host, SimOp::Devices)?;
        Ok(self.desc(host).devices.clone())
    }

    pub fn open_device(&mut self, host: usize, name: &str) -> io::Result<u64> {
        self.fault(host, SimOp::OpenDevice)?;
        if !self.desc(host).devices.iter().any(|d| d == name) {
            return Err(errno(libc::ENODEV));
        }
        let id = self.fresh_id();
        self.contexts.insert(id, CtxEntry { host });
        Ok(id)
    }

    pub fn close_device(&mut self, host: usize, ctx: u64) -> io::Result<()> {
        self.fault(host, SimOp::CloseDevice)?;
        lookup(&self.contexts, &ctx, host)?;
        let busy = self.pds.values().any(|pd| pd.ctx == ctx) || self.cqs.values().any(|cq| cq.ctx == ctx);
        if busy {
            return Err(errno(libc::EBUSY));
        }
        self.contexts.remove(&ctx);
        Ok(())
    }

    pub fn query_port(&mut self, host: usize, ctx: u64, port_num: PortNum) -> io::Result<PortAttr> {
        self.fault(host, SimOp::QueryPort)?;
        lookup(&self.contexts, &ctx, host)?;
        if port_num != SIM_PORT {
            return Err(errno(libc::EINVAL));
        }
        let desc = self.desc(host);
        Ok(PortAttr {
            state: desc.port_state,
            lid: desc.lid,
        })
    }

    pub fn query_gid(&mut self, host: usize, ctx: u64, port_num: PortNum, index: GidIndex) -> io::Result<Gid> {
        self.fault(host, SimOp::QueryGid)?;
        lookup(&self.contexts, &ctx, host)?;
        if port_num != SIM_PORT {
            return Err(errno(libc::EINVAL));
        }
        self.desc(host)
            .gids
            .get(index as usize)
            .copied()
            .ok_or_else(|| errno(libc::EINVAL))
    }

    pub fn alloc_pd(&mut self, host: usize, ctx: u64) -> io::Result<u64> {
        self.fault(host, SimOp::AllocPd)?;
        lookup(&self.contexts, &ctx, host)?;
        let id = self.fresh_id();
        self.pds.insert(id, PdEntry { host, ctx });
        Ok(id)
    }

    pub fn dealloc_pd(&mut self, host: usize, pd: u64) -> io::Result<()> {
        self.fault(host, SimOp::DeallocPd)?;
        lookup(&self.pds, &pd, host)?;
        if self.qps.values().any(|qp| qp.pd == pd) || self.mrs.values().any(|mr| mr.pd == pd) {
            return Err(errno(libc::EBUSY));
        }
        self.pds.remove(&pd);
        Ok(())
    }

    pub fn create_cq(&mut self, host: usize, ctx: u64, depth: u32) -> io::Result<u64> {
        self.fault(host, SimOp::CreateCq)?;
        lookup(&self.contexts, &ctx, host)?;
        if depth == 0 {
            return Err(errno(libc::EINVAL));
        }
        let id = self.fresh_id();
        self.cqs.insert(
            id,
            CqEntry {
                host,
                ctx,
                depth: depth as usize,
                entries: VecDeque::new(),
                overrun: false,
            },
        );
        Ok(id)
    }

    pub fn destroy_cq(&mut self, host: usize, cq: u64) -> io::Result<()> {
        self.fault(host, SimOp::DestroyCq)?;
        lookup(&self.cqs, &cq, host)?;
        if self.qps.values().any(|qp| qp.send_cq == cq || qp.recv_cq == cq) {
            return Err(errno(libc::EBUSY));
        }
        self.cqs.remove(&cq);
        Ok(())
    }

    pub fn create_qp(&mut self, host: usize, pd: u64, send_cq: u64, recv_cq: u64, caps: &QpCaps) -> io::Result<Qpn> {
        self.fault(host, SimOp::CreateQp)?;
        lookup(&self.pds, &pd, host)?;
        lookup(&self.cqs, &send_cq, host)?;
        lookup(&self.cqs, &recv_cq, host)?;
        if caps.max_send_wr == 0 {
            return Err(errno(libc::EINVAL));
        }
        let qpn = self.next_qpn;
        self.next_qpn = self.next_qpn.wrapping_add(1) & 0x00ff_ffff;
        if self.qps.contains_key(&qpn) {
            return Err(errno(libc::EEXIST));
        }
        self.qps.insert(
            qpn,
            QpEntry {
                host,
                pd,
                send_cq,
                recv_cq,
                caps: *caps,
                state: QpState::Reset,
                dest_qpn: 0,
                sq_inflight: 0,
            },
        );
        Ok(qpn)
    }

    pub fn destroy_qp(&mut self, host: usize, qpn: Qpn) -> io::Result<()> {
        self.fault(host, SimOp::DestroyQp)?;
        lookup(&self.qps, &qpn, host)?;
        self.qps.remove(&qpn);
        self.pending.retain(|w| w.qpn != qpn);
        Ok(())
    }

    pub fn modify_qp(&mut self, host: usize, qpn: Qpn, transition: &Transition) -> io::Result<()> {
        self.fault(host, SimOp::ModifyQp)?;
        let gid_count = self.desc(host).gids.len();
        let qp = lookup_mut(&mut self.qps, &qpn, host)?;
        if qp.state != transition.from_state() {
            return Err(errno(libc::EINVAL));
        }
        match transition {
            Transition::Init(attr) if attr.port_num != SIM_PORT => return Err(errno(libc::EINVAL)),
            Transition::Rtr(attr) => {
                if let Some(grh) = attr.grh {
                    if grh.sgid_index as usize >= gid_count {
                        return Err(errno(libc::EINVAL));
                    }
                }
                qp.dest_qpn = attr.dest_qpn;
            }
            _ => {}
        }
        qp.state = transition.to_state();
        Ok(())
    }

    pub fn reg_mr(&mut self, host: usize, pd: u64, buf: &RegionBuf, perm: Permission) -> io::Result<MrInfo> {
        self.fault(host, SimOp::RegMr)?;
        lookup(&self.pds, &pd, host)?;
        let key = self.next_key;
        self.next_key = self.next_key.wrapping_add(1);
        self.mrs.insert(
            key,
            MrEntry {
                host,
                pd,
                buf: buf.clone(),
                perm,
            },
        );
        Ok(MrInfo {
            addr: buf.addr(),
            len: buf.len(),
            lkey: key,
            rkey: key,
        })
    }

    pub fn dereg_mr(&mut self, host: usize, key: u32) -> io::Result<()> {
        self.fault(host, SimOp::DeregMr)?;
        lookup(&self.mrs, &key, host)?;
        self.mrs.remove(&key);
        Ok(())
    }

    /// Find where a write from the peer of `dest_qpn` lands.
    fn resolve(&self, dest_qpn: Qpn, remote: MrRemote, len: usize) -> Result<(RegionBuf, usize), WcStatus> {
        let dest = match self.qps.get(&dest_qpn) {
            Some(qp) if matches!(qp.state, QpState::Rtr | QpState::Rts) => qp,
            _ => return Err(WcStatus::RetryExcErr),
        };
        let mr = match self.mrs.get(&remote.rkey) {
            Some(mr) if mr.host == dest.host && mr.pd == dest.pd => mr,
            _ => return Err(WcStatus::RemAccessErr),
        };
        if !mr.perm.contains(Permission::REMOTE_WRITE) {
            return Err(WcStatus::RemAccessErr);
        }
        let offset = remote
            .addr
            .checked_sub(mr.buf.addr())
            .and_then(|off| usize::try_from(off).ok())
            .ok_or(WcStatus::RemAccessErr)?;
        match offset.checked_add(len) {
            Some(end) if end <= mr.buf.len() => Ok((mr.buf.clone(), offset)),
            _ => Err(WcStatus::RemAccessErr),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn post_write(
        &mut self,
        host: usize,
        qpn: Qpn,
        lkey: LKey,
        len: usize,
        remote: MrRemote,
        wr_id: WrId,
        signaled: bool,
    ) -> io::Result<()> {
        self.fault(host, SimOp::PostWrite)?;
        let qp = lookup(&self.qps, &qpn, host)?;
        if qp.state != QpState::Rts {
            return Err(errno(libc::EINVAL));
        }
        if qp.sq_inflight >= qp.caps.max_send_wr {
            return Err(errno(libc::ENOMEM));
        }
        let local = lookup(&self.mrs, &lkey, host)?;
        if local.pd != qp.pd {
            return Err(errno(libc::EINVAL));
        }
        let data = local.buf.to_vec(0, len).map_err(|_| errno(libc::EINVAL))?;
        let target = self.resolve(qp.dest_qpn, remote, len);

        if let Some(qp) = self.qps.get_mut(&qpn) {
            qp.sq_inflight += 1;
        }
        match target {
            Ok((target, offset)) => self.pending.push_back(PendingWrite {
                qpn,
                wr_id,
                signaled,
                rkey: remote.rkey,
                target,
                offset,
                data,
                delivered: 0,
            }),
            Err(status) => self.complete(qpn, wr_id, signaled, 0, status),
        }
        Ok(())
    }

    /// Retire a write. Failed writes always complete and move the queue
    /// pair to the error state.
    fn complete(&mut self, qpn: Qpn, wr_id: WrId, signaled: bool, len: usize, status: WcStatus) {
        let Some(qp) = self.qps.get_mut(&qpn) else {
            return;
        };
        if status != WcStatus::Success {
            qp.state = QpState::Error;
        }
        if !signaled && status == WcStatus::Success {
            qp.sq_inflight = qp.sq_inflight.saturating_sub(1);
            return;
        }
        if let Some(cq) = self.cqs.get_mut(&qp.send_cq) {
            if cq.entries.len() >= cq.depth {
                cq.overrun = true;
            } else {
                cq.entries.push_back((qpn, Wc::new(wr_id, status, len as u32)));
            }
        }
    }

    /// Advance in-flight writes according to the delivery mode.
    pub fn step(&mut self) {
        let mode = self.delivery;
        while let Some(w) = self.pending.front_mut() {
            let len = w.data.len();
            let alive = self
                .mrs
                .get(&w.rkey)
                .is_some_and(|mr| mr.buf.same_memory(&w.target));
            if !alive {
                let (qpn, wr_id, signaled) = (w.qpn, w.wr_id, w.signaled);
                self.pending.pop_front();
                self.complete(qpn, wr_id, signaled, 0, WcStatus::RemAccessErr);
                continue;
            }

            let upto = match mode {
                Delivery::Whole => len,
                Delivery::Chunked { size } => (w.delivered + size.max(1)).min(len),
                Delivery::Torn { keep } => keep.min(len).max(w.delivered),
            };
            if upto > w.delivered {
                let piece = &w.data[w.delivered..upto];
                // Bounds were resolved at post time.
                let landed = if w.delivered == 0 {
                    w.target.write_rev(w.offset, piece)
                } else {
                    w.target.write(w.offset + w.delivered, piece)
                };
                debug_assert!(landed.is_ok());
                w.delivered = upto;
            }
            if w.delivered < len {
                return;
            }

            let (qpn, wr_id, signaled) = (w.qpn, w.wr_id, w.signaled);
            self.pending.pop_front();
            self.complete(qpn, wr_id, signaled, len, WcStatus::Success);
            if mode != Delivery::Whole {
                return;
            }
        }
    }

    pub fn poll_cq(&mut self, host: usize, cq: u64, wc: &mut [Wc]) -> io::Result<usize> {
        self.fault(host, SimOp::PollCq)?;
        let cq = lookup_mut(&mut self.cqs, &cq, host)?;
        if cq.overrun {
            return Err(errno(libc::EOVERFLOW));
        }
        let mut n = 0;
        while n < wc.len() {
            let Some((qpn, entry)) = cq.entries.pop_front() else {
                break;
            };
            if let Some(qp) = self.qps.get_mut(&qpn) {
                qp.sq_inflight = qp.sq_inflight.saturating_sub(1);
            }
            wc[n] = entry;
            n += 1;
        }
        Ok(n)
    }
}
