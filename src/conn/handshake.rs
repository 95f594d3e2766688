//! Peer identity and the queue pair state machine driven by it.

use std::fmt;
use std::io;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rdma::gid::{Gid, GidParseError};
use crate::rdma::mr::MrRemote;
use crate::rdma::qp::{GlobalRoute, InitAttr, QpState, RtrAttr, RtsAttr, Transition};
use crate::rdma::type_alias::*;
use crate::rdma::verbs::Verbs;

/// Everything a peer needs to write into this side's inbound buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub qpn: Qpn,
    pub lid: Lid,
    pub gid: Gid,
    pub remote: MrRemote,
}

/// Handshake line parsing error type.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityParseError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("unexpected trailing field `{0}`")]
    TrailingField(String),

    #[error("field `{field}` is not a valid number")]
    Number {
        field: &'static str,
        #[source]
        source: ParseIntError,
    },

    #[error("field `gid` is not a valid GID")]
    Gid(#[from] GidParseError),
}

impl fmt::Display for PeerIdentity {
    /// `<qpn:08x> <lid:04x> <gid:base64> <addr> <rkey>`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x} {:04x} {} {} {}",
            self.qpn,
            self.lid,
            self.gid.to_base64(),
            self.remote.addr,
            self.remote.rkey
        )
    }
}

impl FromStr for PeerIdentity {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.split_whitespace();
        let mut next = |name| fields.next().ok_or(IdentityParseError::MissingField(name));
        let number = |field, source| IdentityParseError::Number { field, source };

        let qpn = Qpn::from_str_radix(next("qpn")?, 16).map_err(|e| number("qpn", e))?;
        let lid = Lid::from_str_radix(next("lid")?, 16).map_err(|e| number("lid", e))?;
        let gid = Gid::from_base64(next("gid")?)?;
        let addr = next("addr")?.parse::<u64>().map_err(|e| number("addr", e))?;
        let rkey = next("rkey")?.parse::<RKey>().map_err(|e| number("rkey", e))?;
        if let Some(extra) = fields.next() {
            return Err(IdentityParseError::TrailingField(extra.to_owned()));
        }

        Ok(Self {
            qpn,
            lid,
            gid,
            remote: MrRemote::new(addr, rkey),
        })
    }
}

/// Handshake error type.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("connection is not set up")]
    NotReady,

    #[error("connection is already bound to a peer")]
    AlreadyConnected,

    #[error("queue pair transition to {state:?} rejected")]
    Transition {
        state: QpState,
        #[source]
        source: io::Error,
    },
}

/// Bring `qp` from RESET to RTS, addressed at `peer`. With `sgid_index`
/// set, the peer is reached through its GID.
pub(crate) fn bring_up<V: Verbs>(
    verbs: &V,
    qp: &V::Qp,
    port_num: PortNum,
    sgid_index: Option<GidIndex>,
    peer: &PeerIdentity,
) -> Result<(), HandshakeError> {
    let mut rtr = RtrAttr::new(port_num, peer.qpn, peer.lid);
    if let Some(index) = sgid_index {
        rtr = rtr.with_global_route(GlobalRoute::new(peer.gid, index));
    }

    for step in [
        Transition::Init(InitAttr::new(port_num)),
        Transition::Rtr(rtr),
        Transition::Rts(RtsAttr::default()),
    ] {
        verbs
            .modify_qp(qp, &step)
            .map_err(|source| HandshakeError::Transition {
                state: step.to_state(),
                source,
            })?;
        log::debug!("ibcached: qp {:#x} -> {:?}", verbs.qp_num(qp), step.to_state());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> PeerIdentity {
        let mut raw = [0u8; 16];
        raw[..2].copy_from_slice(&[0xfe, 0x80]);
        raw[8..].copy_from_slice(&[0x02, 0x1b, 0x21, 0xff, 0xfe, 0x4a, 0x3c, 0x01]);
        PeerIdentity {
            qpn: 0x1a2b,
            lid: 0x0003,
            gid: Gid::from(raw),
            remote: MrRemote::new(140_000_000_000_000, 0x1234),
        }
    }

    #[test]
    fn line_format() {
        assert_eq!(
            identity().to_string(),
            "00001a2b 0003 /oAAAAAAAAACGyH//ko8AQ== 140000000000000 4660"
        );
    }

    #[test]
    fn parsed_fields_equal_serialized_fields() {
        let id = identity();
        let parsed: PeerIdentity = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.qpn, 0x1a2b);
        assert_eq!(parsed.lid, 0x0003);

        let spaced = format!("  {}\t", id.to_string().replace(' ', "   "));
        assert_eq!(spaced.parse::<PeerIdentity>().unwrap(), id);
    }

    #[test]
    fn malformed_lines() {
        let line = identity().to_string();
        let fields: Vec<_> = line.split(' ').collect();

        assert_eq!(
            fields[..3].join(" ").parse::<PeerIdentity>(),
            Err(IdentityParseError::MissingField("addr"))
        );
        assert_eq!(
            format!("{} extra", line).parse::<PeerIdentity>(),
            Err(IdentityParseError::TrailingField("extra".into()))
        );
        assert!(matches!(
            line.replacen("00001a2b", "xyz", 1).parse::<PeerIdentity>(),
            Err(IdentityParseError::Number { field: "qpn", .. })
        ));
        assert!(matches!(
            line.replacen("/oAA", "*oAA", 1).parse::<PeerIdentity>(),
            Err(IdentityParseError::Gid(_))
        ));
    }
}
