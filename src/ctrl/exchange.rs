//! The `setup_ib` handshake over a control channel.

use std::io::{self, Read, Write};

use thiserror::Error;

use super::channel::LineChannel;
use super::command::{Command, CommandError, REPLY_ERROR, SETUP_IB};
use crate::conn::{Connection, HandshakeError, IdentityParseError, PeerIdentity};
use crate::rdma::verbs::Verbs;

/// Handshake exchange error type.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("control channel error")]
    Io(#[from] io::Error),

    #[error("peer rejected the handshake")]
    Rejected,

    #[error("malformed handshake reply")]
    Reply(#[from] IdentityParseError),

    #[error("malformed handshake request")]
    Request(#[from] CommandError),

    #[error("handshake failed")]
    Handshake(#[from] HandshakeError),
}

/// Parse a `setup_ib` reply. The keyword is optional.
pub fn parse_reply(line: &str) -> Result<PeerIdentity, ExchangeError> {
    let line = line.trim();
    if line == REPLY_ERROR {
        return Err(ExchangeError::Rejected);
    }
    let fields = match line.split_once(char::is_whitespace) {
        Some((SETUP_IB, rest)) => rest,
        _ => line,
    };
    Ok(fields.parse()?)
}

/// Client side: send this side's identity, read the peer's, and bring the
/// queue pair up towards it.
pub fn initiate<S, V>(
    channel: &mut LineChannel<S>,
    conn: &mut Connection<V>,
) -> Result<PeerIdentity, ExchangeError>
where
    S: Read + Write,
    V: Verbs,
{
    let local = conn.local_identity()?;
    channel.send_line(&Command::SetupIb(local).to_string())?;
    let peer = parse_reply(&channel.expect_line()?)?;
    conn.connect(&peer)?;
    log::debug!("ibcached: handshake with {} complete", peer);
    Ok(peer)
}

/// Server side: bring the queue pair up towards `peer`, taken from a
/// received `setup_ib` command, and reply with this side's identity. The
/// reply is `ERROR` if the queue pair cannot be brought up.
pub fn respond<S, V>(
    channel: &mut LineChannel<S>,
    conn: &mut Connection<V>,
    peer: &PeerIdentity,
) -> Result<(), ExchangeError>
where
    S: Read + Write,
    V: Verbs,
{
    let outcome = conn
        .local_identity()
        .and_then(|local| conn.connect(peer).map(|_| local));
    match outcome {
        Ok(local) => {
            channel.send_line(&Command::SetupIb(local).to_string())?;
            Ok(())
        }
        Err(e) => {
            channel.send_line(REPLY_ERROR)?;
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, GidIndexPolicy};
    use crate::conn::Role;
    use crate::rdma::sim::SimFabric;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn config() -> Config {
        Config {
            gid_index: GidIndexPolicy::Fixed { index: 0 },
            buf_size: 128,
            ..Config::default()
        }
    }

    #[test]
    fn reply_forms() {
        let line = "00001a2b 0003 AAAAAAAAAAAAAAAAAAAAAA== 4096 9";
        let bare = parse_reply(line).unwrap();
        assert_eq!(parse_reply(&format!("setup_ib {}", line)).unwrap(), bare);
        assert_eq!(bare.qpn, 0x1a2b);
        assert!(matches!(parse_reply("ERROR"), Err(ExchangeError::Rejected)));
        assert!(matches!(parse_reply("setup_ib 1"), Err(ExchangeError::Reply(_))));
    }

    #[test]
    fn handshake_over_tcp() {
        let fabric = SimFabric::new();
        fabric.set_next_qpn(0x1a2b);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server_verbs = fabric.host("server");
        let mut conn = Connection::open(fabric.host("client"), config(), Role::Client).unwrap();
        let server = thread::spawn(move || -> anyhow::Result<PeerIdentity> {
            let mut conn = Connection::open(server_verbs, config(), Role::Server)?;
            let mut ch = LineChannel::new(listener.accept()?.0);
            let Command::SetupIb(peer) = ch.expect_line()?.parse()? else {
                anyhow::bail!("expected setup_ib");
            };
            respond(&mut ch, &mut conn, &peer)?;
            assert_eq!(conn.peer(), Some(&peer));
            Ok(peer)
        });

        let mut ch = LineChannel::<TcpStream>::connect(addr, 10).unwrap();
        let local = conn.local_identity().unwrap();
        let peer = initiate(&mut ch, &mut conn).unwrap();

        // The server parsed exactly what the client serialized.
        let seen = server.join().unwrap().unwrap();
        assert_eq!(seen, local);
        assert_eq!(seen.qpn, 0x1a2b);
        assert_eq!(seen.lid, 2);
        assert_eq!(conn.peer(), Some(&peer));
    }
}
