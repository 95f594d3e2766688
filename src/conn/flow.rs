//! Send-side completion flow control.
//!
//! Every message is one signaled RDMA WRITE. The controller counts signaled
//! writes whose completions have not been polled yet and never lets that
//! count exceed the send queue capacity: when the queue is full, it drains
//! the send completion queue before posting.

use std::io;

use thiserror::Error;

use crate::proto::poll::{spin_until, PollBudget, PollTimeout};
use crate::rdma::cq::{Wc, WcStatus, POLL_BATCH};
use crate::rdma::mr::MrRemote;
use crate::rdma::type_alias::WrId;
use crate::rdma::verbs::Verbs;

/// Error type of the send path.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection is not set up")]
    NotReady,

    #[error("connection has no peer yet")]
    NoPeer,

    #[error("message of {len} bytes exceeds the {capacity}-byte buffer")]
    TooLong { len: usize, capacity: usize },

    #[error("ibv_post_send error")]
    Post(#[source] io::Error),

    #[error("ibv_poll_cq error")]
    Poll(#[source] io::Error),

    #[error("write {wr_id} completed with error")]
    Completion {
        wr_id: WrId,
        #[source]
        status: WcStatus,
    },

    #[error("send queue did not drain")]
    Drain(#[from] PollTimeout),
}

/// Bounded outstanding-signaled-write counter.
#[derive(Debug)]
pub struct FlowController {
    capacity: u32,
    outstanding: u32,
    next_wr_id: WrId,
    drain_budget: PollBudget,
}

impl FlowController {
    /// `capacity` is the send queue depth; `drain_budget` bounds every wait
    /// for completions.
    pub fn new(capacity: u32, drain_budget: PollBudget) -> Self {
        Self {
            capacity: capacity.max(1),
            outstanding: 0,
            next_wr_id: 0,
            drain_budget,
        }
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Signaled writes posted and not yet seen completed.
    #[inline]
    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    /// Post one signaled write of the first `len` bytes of `local` to
    /// `remote`, first draining completions if the send queue is full.
    #[allow(clippy::too_many_arguments)]
    pub fn post<V: Verbs>(
        &mut self,
        verbs: &V,
        qp: &V::Qp,
        send_cq: &V::Cq,
        local: &V::Mr,
        len: usize,
        remote: MrRemote,
    ) -> Result<WrId, TransportError> {
        if self.outstanding >= self.capacity {
            self.reserve(verbs, send_cq)?;
        }

        let wr_id = self.next_wr_id;
        verbs
            .post_write(qp, local, len, remote, wr_id, true)
            .map_err(TransportError::Post)?;
        self.next_wr_id = self.next_wr_id.wrapping_add(1);
        self.outstanding += 1;
        Ok(wr_id)
    }

    /// Poll the send completion queue once, for up to `capacity` entries.
    /// Returns how many completions were retired.
    pub fn drain<V: Verbs>(&mut self, verbs: &V, send_cq: &V::Cq) -> Result<usize, TransportError> {
        let mut wc = [Wc::default(); POLL_BATCH];
        let mut retired = 0;
        let mut failed = None;

        while retired < self.capacity as usize {
            let want = (self.capacity as usize - retired).min(POLL_BATCH);
            let n = verbs
                .poll_cq(send_cq, &mut wc[..want])
                .map_err(TransportError::Poll)?;
            for c in &wc[..n] {
                if let Err(status) = c.ok() {
                    failed.get_or_insert(TransportError::Completion {
                        wr_id: c.wr_id,
                        status,
                    });
                }
            }
            retired += n;
            if n < want {
                break;
            }
        }

        self.outstanding = self.outstanding.saturating_sub(retired as u32);
        match failed {
            Some(err) => Err(err),
            None => Ok(retired),
        }
    }

    /// Wait until at least one send queue slot is free.
    fn reserve<V: Verbs>(&mut self, verbs: &V, send_cq: &V::Cq) -> Result<(), TransportError> {
        let mut failure = None;
        spin_until(
            self.drain_budget,
            || verbs.relax(),
            || match self.drain(verbs, send_cq) {
                Ok(_) if self.outstanding < self.capacity => Some(()),
                Ok(_) => None,
                Err(e) => {
                    failure = Some(e);
                    Some(())
                }
            },
        )?;
        failure.map_or(Ok(()), Err)
    }

    /// Wait until every posted write has completed.
    pub fn quiesce<V: Verbs>(&mut self, verbs: &V, send_cq: &V::Cq) -> Result<(), TransportError> {
        let mut failure = None;
        spin_until(
            self.drain_budget,
            || verbs.relax(),
            || {
                if self.outstanding == 0 {
                    return Some(());
                }
                match self.drain(verbs, send_cq) {
                    Ok(_) => (self.outstanding == 0).then_some(()),
                    Err(e) => {
                        failure = Some(e);
                        Some(())
                    }
                }
            },
        )?;
        failure.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdma::buf::RegionBuf;
    use crate::rdma::mr::Permission;
    use crate::rdma::qp::{InitAttr, QpCaps, RtrAttr, RtsAttr, Transition};
    use crate::rdma::sim::{Delivery, SimCq, SimFabric, SimMr, SimQp, SimVerbs, SIM_PORT};
    use proptest::prelude::*;

    struct Rig {
        fabric: SimFabric,
        verbs: SimVerbs,
        qp: SimQp,
        cq: SimCq,
        mr: SimMr,
        remote: MrRemote,
        _peer: (SimVerbs, SimQp, SimMr),
    }

    /// A sender with a send queue of `depth` connected to a passive peer.
    fn rig(depth: u32) -> Rig {
        let fabric = SimFabric::new();
        let caps = QpCaps::new(depth, depth, 1, 1, 0);
        let mut ends = Vec::new();
        for name in ["tx", "rx"] {
            let v = fabric.host(name);
            let ctx = v.open_device("sim_0").unwrap();
            let pd = v.alloc_pd(&ctx).unwrap();
            let cq = v.create_cq(&ctx, depth).unwrap();
            let qp = v.create_qp(&pd, &cq, &cq, &caps).unwrap();
            let buf = RegionBuf::new(64);
            let mr = v.reg_mr(&pd, &buf, Permission::INBOUND).unwrap();
            ends.push((v, qp, cq, mr));
        }
        let (rx_v, rx_qp, _, rx_mr) = ends.pop().unwrap();
        let (verbs, qp, cq, mr) = ends.pop().unwrap();
        for (v, q, peer) in [(&verbs, &qp, rx_v.qp_num(&rx_qp)), (&rx_v, &rx_qp, verbs.qp_num(&qp))] {
            v.modify_qp(q, &Transition::Init(InitAttr::new(SIM_PORT))).unwrap();
            v.modify_qp(q, &Transition::Rtr(RtrAttr::new(SIM_PORT, peer, 1))).unwrap();
            v.modify_qp(q, &Transition::Rts(RtsAttr::default())).unwrap();
        }
        let remote = rx_v.mr_info(&rx_mr).as_remote();
        Rig {
            fabric,
            verbs,
            qp,
            cq,
            mr,
            remote,
            _peer: (rx_v, rx_qp, rx_mr),
        }
    }

    #[test]
    fn full_queue_drains_before_post() {
        let r = rig(4);
        let mut flow = FlowController::new(4, PollBudget::spins(100));
        for _ in 0..4 {
            flow.post(&r.verbs, &r.qp, &r.cq, &r.mr, 8, r.remote).unwrap();
        }
        assert_eq!(flow.outstanding(), 4);

        // The fifth post must wait for completions rather than overflow.
        flow.post(&r.verbs, &r.qp, &r.cq, &r.mr, 8, r.remote).unwrap();
        assert_eq!(flow.outstanding(), 1);
        flow.quiesce(&r.verbs, &r.cq).unwrap();
        assert_eq!(flow.outstanding(), 0);
    }

    #[test]
    fn stalled_queue_times_out() {
        let r = rig(2);
        r.fabric.set_delivery(Delivery::Torn { keep: 1 });
        let mut flow = FlowController::new(2, PollBudget::spins(50));
        flow.post(&r.verbs, &r.qp, &r.cq, &r.mr, 8, r.remote).unwrap();
        flow.post(&r.verbs, &r.qp, &r.cq, &r.mr, 8, r.remote).unwrap();
        let err = flow.post(&r.verbs, &r.qp, &r.cq, &r.mr, 8, r.remote).unwrap_err();
        assert!(matches!(err, TransportError::Drain(_)));
        assert_eq!(flow.outstanding(), 2);
    }

    proptest! {
        #[test]
        fn outstanding_never_exceeds_capacity(depth in 1u32..8, ops in prop::collection::vec(any::<bool>(), 1..64)) {
            let r = rig(depth);
            let mut flow = FlowController::new(depth, PollBudget::spins(1000));
            for post in ops {
                if post {
                    flow.post(&r.verbs, &r.qp, &r.cq, &r.mr, 4, r.remote).unwrap();
                } else {
                    r.verbs.relax();
                    flow.drain(&r.verbs, &r.cq).unwrap();
                }
                prop_assert!(flow.outstanding() <= flow.capacity());
            }
        }
    }
}
