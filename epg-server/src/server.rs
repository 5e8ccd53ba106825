//! Select loop (§5): one `mio::Poll` over the listening socket and every
//! client connection. Mirrors the teacher's `mio::Poll`/`Token`/`Events`
//! shape, bridged onto this crate's std-socket-based transport (which also
//! has to support Unix-domain sockets, so it can't use `mio::net::*`
//! directly) via `EventedFd` over the raw descriptor.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::AsRawFd;

use mio::unix::EventedFd;
use mio::{Events, Poll, PollOpt, Ready, Token};

use epg_core::error::IoError;
use epg_db::{ContextManager, DumpBlockType, TimescaleQueue};
use epg_proto::transport::{self, ConnState, Listener, PumpEvent};

use crate::session::{ServerSession, StatsSnapshot};

const LISTENER_TOKEN: Token = Token(0);

/// Caps message completions drained from one session per iteration, so one
/// fast/malicious peer can't starve the others (§5).
const MAX_PUMPS_PER_SESSION: u32 = 50;

pub struct Server {
    listener: Listener,
    poll: Poll,
    events: Events,
    sessions: HashMap<Token, ServerSession>,
    next_token: usize,
}

impl Server {
    pub fn new(listener: Listener) -> io::Result<Server> {
        let poll = Poll::new()?;
        poll.register(
            &EventedFd(&listener.as_raw_fd()),
            LISTENER_TOKEN,
            Ready::readable(),
            PollOpt::edge(),
        )?;
        Ok(Server {
            listener,
            poll,
            events: Events::with_capacity(1024),
            sessions: HashMap::new(),
            next_token: 1,
        })
    }

    fn alloc_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// One iteration of the select loop: block for up to `timeout_ms`
    /// waiting for readiness, accept any pending connections, then pump
    /// every session's I/O and advance its dump cursor by one step.
    pub fn run_once(
        &mut self,
        timeout_ms: u64,
        cx: &mut ContextManager,
        acq_current_cni: Option<u16>,
        stats: &StatsSnapshot,
        now: u32,
    ) -> io::Result<()> {
        self.poll
            .poll(&mut self.events, Some(std::time::Duration::from_millis(timeout_ms)))?;

        let mut readable_tokens: Vec<Token> = Vec::new();
        let mut accept_ready = false;
        for event in self.events.iter() {
            if event.token() == LISTENER_TOKEN {
                accept_ready = true;
            } else {
                readable_tokens.push(event.token());
            }
        }

        if accept_ready {
            self.accept_pending(now)?;
        }

        let mut dead = Vec::new();
        for (token, session) in self.sessions.iter_mut() {
            let readable = readable_tokens.contains(token);
            if Self::pump_session(session, readable, now).is_err() {
                dead.push(*token);
                continue;
            }
            for _ in 0..MAX_PUMPS_PER_SESSION {
                if session.conn.is_closed() {
                    break;
                }
                match session.step_dump(cx, acq_current_cni) {
                    Some(framed) => session.conn.enqueue(framed),
                    None => break,
                }
            }
            for framed in session.periodic_tick(now, stats) {
                session.conn.enqueue(framed);
            }
            if session.conn.is_closed() || (session.close_after_flush && !session.conn.wants_write()) {
                dead.push(*token);
            }
        }

        for token in dead {
            if let Some(session) = self.sessions.remove(&token) {
                if let Some(socket) = session.conn.socket() {
                    let _ = self.poll.deregister(&EventedFd(&socket.as_raw_fd()));
                }
            }
        }
        Ok(())
    }

    /// Applies a freshly acquired block to every connected session's live
    /// forward filter (§4.10), queueing the framed `BLOCK_IND` on whichever
    /// sessions accept it.
    pub fn broadcast_block(&mut self, cni: u16, dump_type: DumpBlockType, payload: &[u8]) {
        for session in self.sessions.values_mut() {
            if let Some(framed) = session.on_new_block(cni, dump_type, payload) {
                session.conn.enqueue(framed);
            }
        }
    }

    /// Forwards a VPS/PDC label change to every session that requested it
    /// (§4.10).
    pub fn broadcast_vps_pdc(&mut self, cni: u16, pil: u32) {
        for session in self.sessions.values_mut() {
            if let Some(framed) = session.on_vps_pdc(cni, pil) {
                session.conn.enqueue(framed);
            }
        }
    }

    /// Drains `tq` and forwards the batch as `TSC_IND` to every session with
    /// timescale reporting enabled (§4.4, §4.10). A no-op when nobody has
    /// asked for it, so the queue keeps accumulating instead of being
    /// silently discarded.
    pub fn broadcast_timescale(&mut self, tq: &mut TimescaleQueue) {
        if !self.sessions.values().any(|s| s.wants_timescale()) {
            return;
        }
        let batches = tq.pop_all();
        if batches.is_empty() {
            return;
        }
        for (netwop, _) in &batches {
            tq.unlock(*netwop);
        }
        for session in self.sessions.values_mut() {
            if let Some(framed) = session.build_timescale_ind(&batches) {
                session.conn.enqueue(framed);
            }
        }
    }

    fn accept_pending(&mut self, now: u32) -> io::Result<()> {
        loop {
            match transport::accept(&self.listener) {
                Ok(socket) => {
                    let token = self.alloc_token();
                    self.poll.register(
                        &EventedFd(&socket.as_raw_fd()),
                        token,
                        Ready::readable() | Ready::writable(),
                        PollOpt::edge(),
                    )?;
                    let conn = ConnState::new(socket);
                    self.sessions.insert(token, ServerSession::new(conn, now));
                }
                Err(IoError::Wait) => break,
                Err(_) => break,
            }
        }
        Ok(())
    }

    /// Drains every message currently available on one session's socket,
    /// dispatching each through `ServerSession::handle_message`. Write
    /// always takes precedence over read inside `ConnState::pump` itself
    /// (§4.2), so this only needs to loop until `Idle`.
    fn pump_session(session: &mut ServerSession, readable: bool, now: u32) -> Result<(), IoError> {
        loop {
            if session.conn.check_timeout(now) {
                session.conn.close();
                return Err(IoError::Timeout);
            }
            match session.conn.pump(readable) {
                Ok(PumpEvent::Idle) => return Ok(()),
                Ok(PumpEvent::PeerClosed) => return Ok(()),
                Ok(PumpEvent::Message { header, mut body }) => {
                    let msg_type = match session.codec().check(&header, &mut body) {
                        Ok(t) => t,
                        Err(_) => {
                            session.conn.close();
                            return Err(IoError::Fatal(io::Error::new(
                                io::ErrorKind::InvalidData,
                                "protocol violation",
                            )));
                        }
                    };
                    match session.handle_message(msg_type, &body, now) {
                        Ok(replies) => {
                            for framed in replies {
                                session.conn.enqueue(framed);
                            }
                        }
                        Err(_) => {
                            session.conn.close();
                            return Err(IoError::Fatal(io::Error::new(
                                io::ErrorKind::InvalidData,
                                "protocol violation",
                            )));
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
