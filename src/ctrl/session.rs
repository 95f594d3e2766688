//! Server-side control sessions.

use std::io::{self, Read, Write};
use std::thread::{self, JoinHandle};

use super::channel::LineChannel;
use super::command::{Command, REPLY_ERROR, REPLY_OK};
use super::exchange::{respond, ExchangeError};
use crate::config::Config;
use crate::conn::{Connection, PeerIdentity, Role};
use crate::kv::{DispatchError, DispatchLoop, DispatchStats, Store};
use crate::rdma::verbs::Verbs;

type LoopHandle = JoinHandle<Result<DispatchStats, DispatchError>>;

/// How a control session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer sent `shutdown`.
    Shutdown,
    /// The peer closed the control channel.
    Closed,
}

/// Answers control commands and runs one dispatch loop thread per
/// connection it sets up.
pub struct Session<V, S> {
    verbs: V,
    config: Config,
    store: S,
    loops: Vec<LoopHandle>,
    finished: Vec<Result<DispatchStats, DispatchError>>,
}

impl<V, S> Session<V, S>
where
    V: Verbs + Clone + 'static,
    S: Store + Clone + Send + 'static,
{
    pub fn new(verbs: V, config: Config, store: S) -> Self {
        Self {
            verbs,
            config,
            store,
            loops: Vec::new(),
            finished: Vec::new(),
        }
    }

    /// Dispatch loops still running.
    pub fn active(&self) -> usize {
        self.loops.iter().filter(|h| !h.is_finished()).count()
    }

    /// Answer commands on `channel` until the peer shuts the session down or
    /// goes away.
    pub fn serve<C: Read + Write>(&mut self, channel: &mut LineChannel<C>) -> io::Result<SessionEnd> {
        loop {
            let Some(line) = channel.recv_line()? else {
                return Ok(SessionEnd::Closed);
            };
            let command = match line.parse::<Command>() {
                Ok(command) => command,
                Err(e) => {
                    log::warn!("ibcached: bad control command {:?}: {}", line, e);
                    channel.send_line(REPLY_ERROR)?;
                    continue;
                }
            };

            match command {
                Command::SetupIb(peer) => self.setup(channel, &peer)?,
                Command::DisconnectIb => {
                    self.reap();
                    channel.send_line(REPLY_OK)?;
                }
                Command::Shutdown => {
                    channel.send_line(REPLY_OK)?;
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
    }

    fn setup<C: Read + Write>(&mut self, channel: &mut LineChannel<C>, peer: &PeerIdentity) -> io::Result<()> {
        let mut conn = match Connection::open(self.verbs.clone(), self.config.clone(), Role::Server) {
            Ok(conn) => conn,
            Err(e) => {
                log::error!("ibcached: cannot set up connection for peer {}: {}", peer, e);
                return channel.send_line(REPLY_ERROR);
            }
        };
        if let Err(e) = respond(channel, &mut conn, peer) {
            log::error!("ibcached: handshake with peer {} failed: {}", peer, e);
            return match e {
                ExchangeError::Io(e) => Err(e),
                _ => Ok(()),
            };
        }

        let store = self.store.clone();
        self.loops.push(thread::spawn(move || {
            let dispatch = DispatchLoop::new(conn, store)?;
            dispatch.run()
        }));
        Ok(())
    }

    /// Collect the results of dispatch loops that have ended.
    fn reap(&mut self) {
        let (done, running): (Vec<_>, Vec<_>) = self.loops.drain(..).partition(|h| h.is_finished());
        self.loops = running;
        for handle in done {
            self.finished.push(joined(handle));
        }
    }

    /// Wait for every dispatch loop and return the result of each. Loops
    /// already collected by `disconnect_ib` come first.
    pub fn join(mut self) -> Vec<Result<DispatchStats, DispatchError>> {
        let mut results = std::mem::take(&mut self.finished);
        results.extend(self.loops.drain(..).map(joined));
        results
    }
}

fn joined(handle: LoopHandle) -> Result<DispatchStats, DispatchError> {
    let result = handle.join().unwrap_or_else(|_| {
        log::error!("ibcached: dispatch loop panicked");
        Err(DispatchError::Panicked)
    });
    if let Err(e) = &result {
        log::warn!("ibcached: dispatch loop ended with error: {}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GidIndexPolicy;
    use crate::kv::{MemStore, Shared};
    use crate::rdma::sim::SimFabric;
    use std::net::{TcpListener, TcpStream};

    #[test]
    fn command_replies() {
        let fabric = SimFabric::new();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = Config {
            gid_index: GidIndexPolicy::Disabled,
            ..Config::default()
        };
        let mut session = Session::new(fabric.host("server"), config, Shared::new(MemStore::default()));
        let server = thread::spawn(move || {
            let mut ch = LineChannel::new(listener.accept().unwrap().0);
            let end = session.serve(&mut ch).unwrap();
            (end, session.active())
        });

        let mut ch = LineChannel::<TcpStream>::connect(addr, 10).unwrap();
        for (line, reply) in [
            ("hello", REPLY_ERROR),
            ("setup_ib 1 2 3", REPLY_ERROR),
            ("disconnect_ib", REPLY_OK),
            ("shutdown", REPLY_OK),
        ] {
            ch.send_line(line).unwrap();
            assert_eq!(ch.expect_line().unwrap(), reply, "reply to {:?}", line);
        }
        assert_eq!(server.join().unwrap(), (SessionEnd::Shutdown, 0));
    }
}
