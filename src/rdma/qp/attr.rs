//! Typed attributes of the three queue pair transitions a connection goes
//! through: RESET → INIT → RTR → RTS.

use super::QpState;
use crate::rdma::gid::Gid;
use crate::rdma::mr::Permission;
use crate::rdma::type_alias::*;

/// Path MTU class. Discriminants are those of `enum ibv_mtu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Mtu {
    Mtu256 = 1,
    Mtu512 = 2,
    Mtu1024 = 3,
    Mtu2048 = 4,
    Mtu4096 = 5,
}

impl Mtu {
    /// MTU in bytes.
    pub const fn bytes(self) -> usize {
        128 << (self as u32)
    }
}

/// Global routing header attributes, used when the peer is addressed by GID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalRoute {
    pub dgid: Gid,
    pub sgid_index: GidIndex,
    pub hop_limit: u8,
    pub flow_label: u32,
    pub traffic_class: u8,
}

impl GlobalRoute {
    /// Route to `dgid` from the local GID at `sgid_index`, one hop.
    pub fn new(dgid: Gid, sgid_index: GidIndex) -> Self {
        Self {
            dgid,
            sgid_index,
            hop_limit: 1,
            flow_label: 0,
            traffic_class: 0,
        }
    }
}

/// RESET → INIT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitAttr {
    pub port_num: PortNum,
    pub pkey_index: u16,
    pub access: Permission,
}

impl InitAttr {
    pub fn new(port_num: PortNum) -> Self {
        Self {
            port_num,
            pkey_index: 0,
            access: Permission::QP_ACCESS,
        }
    }
}

/// INIT → RTR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtrAttr {
    pub path_mtu: Mtu,
    pub dest_qpn: Qpn,
    pub rq_psn: Psn,
    pub max_dest_rd_atomic: u8,
    /// Minimal RNR NAK timer; 12 is the customary default (0.64 ms).
    pub min_rnr_timer: u8,
    pub dlid: Lid,
    pub sl: u8,
    pub src_path_bits: u8,
    pub port_num: PortNum,
    pub grh: Option<GlobalRoute>,
}

impl RtrAttr {
    /// Attributes to receive from `dest_qpn` at `dlid`, without global routing.
    pub fn new(port_num: PortNum, dest_qpn: Qpn, dlid: Lid) -> Self {
        Self {
            path_mtu: Mtu::Mtu1024,
            dest_qpn,
            rq_psn: 0,
            max_dest_rd_atomic: 1,
            min_rnr_timer: 12,
            dlid,
            sl: 0,
            src_path_bits: 0,
            port_num,
            grh: None,
        }
    }

    /// Enable global routing.
    pub fn with_global_route(mut self, grh: GlobalRoute) -> Self {
        self.grh = Some(grh);
        self
    }
}

/// RTR → RTS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtsAttr {
    /// Local ACK timeout, `4.096 us * 2^timeout`.
    pub timeout: u8,
    pub retry_cnt: u8,
    /// 7 means retry infinitely on RNR NAK.
    pub rnr_retry: u8,
    pub sq_psn: Psn,
    pub max_rd_atomic: u8,
}

impl Default for RtsAttr {
    fn default() -> Self {
        Self {
            timeout: 20,
            retry_cnt: 7,
            rnr_retry: 7,
            sq_psn: 0,
            max_rd_atomic: 1,
        }
    }
}

/// One step of the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Init(InitAttr),
    Rtr(RtrAttr),
    Rts(RtsAttr),
}

impl Transition {
    /// State the queue pair must be in before the transition.
    pub fn from_state(&self) -> QpState {
        match self {
            Transition::Init(_) => QpState::Reset,
            Transition::Rtr(_) => QpState::Init,
            Transition::Rts(_) => QpState::Rtr,
        }
    }

    /// State the queue pair is in after the transition.
    pub fn to_state(&self) -> QpState {
        match self {
            Transition::Init(_) => QpState::Init,
            Transition::Rtr(_) => QpState::Rtr,
            Transition::Rts(_) => QpState::Rts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_defaults() {
        let rtr = RtrAttr::new(1, 0x1a2b, 3);
        assert_eq!(rtr.path_mtu.bytes(), 1024);
        assert_eq!(rtr.rq_psn, 0);
        assert_eq!(rtr.max_dest_rd_atomic, 1);
        assert_eq!(rtr.min_rnr_timer, 12);
        assert!(rtr.grh.is_none());

        let grh = GlobalRoute::new(Gid::from([9; 16]), 3);
        let rtr = rtr.with_global_route(grh);
        assert_eq!(rtr.grh.map(|g| (g.hop_limit, g.flow_label, g.traffic_class)), Some((1, 0, 0)));

        let rts = RtsAttr::default();
        assert_eq!((rts.timeout, rts.retry_cnt, rts.rnr_retry), (20, 7, 7));
        assert_eq!((rts.sq_psn, rts.max_rd_atomic), (0, 1));

        assert_eq!(InitAttr::new(1).access, Permission::QP_ACCESS);
    }

    #[test]
    fn transitions_chain() {
        let steps = [
            Transition::Init(InitAttr::new(1)),
            Transition::Rtr(RtrAttr::new(1, 1, 1)),
            Transition::Rts(RtsAttr::default()),
        ];
        let mut state = QpState::Reset;
        for step in steps {
            assert_eq!(step.from_state(), state);
            state = step.to_state();
        }
        assert_eq!(state, QpState::Rts);
    }
}
