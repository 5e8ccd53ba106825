//! Client session (CL, §4.11): the connect/forward handshake mirror of the
//! server session, plus the retry timer and stats-queueing-until-drained
//! behaviour described for GUI-facing clients.

use std::collections::VecDeque;

use byteorder::{ByteOrder, NativeEndian};
use epg_core::error::{IoError, ProtocolError};
use epg_db::dump::{decode_ai_block, decode_pi_block};
use epg_db::{AppInfo, DumpBlockType, ProgrammeItem, TscEntry};
use epg_proto::codec::Codec;
use epg_proto::message::{
    MsgType, CONNECT_BODY_LEN, ENDIAN_MAGIC, PROTOCOL_COMPAT_VERSION, SERVICE_MAGIC,
    STATS_REQ_TIMESCALE, STATS_REQ_VPS_PDC,
};
use epg_proto::message::{StatsVariant, STATS_INITIAL_SCHEMA, STATS_UPDATE_SCHEMA};
use epg_proto::transport::ConnState;

/// Retry delay after a connection attempt fails (§4.11).
pub const RETRY_DELAY_SECS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Off,
    WaitConnect,
    WaitConCnf,
    WaitFwdCnf,
    WaitBlocks,
    Error,
    Retry,
}

/// Decoded `STATS_IND` payload, independent of the wire sub-variant.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClientStats {
    pub acq_mode: u8,
    pub cni: u16,
    pub ai_min: u32,
    pub ai_avg: u32,
    pub ai_max: u32,
    pub ttx_pkg_got: u32,
    pub ttx_pkg_lost: u32,
    pub epg_blocks_got: u32,
    pub epg_blocks_dropped: u32,
    pub epg_pages_per_min: u32,
}

/// Application-facing events produced by message handling (GUI events, in
/// the original's terms).
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// `FORWARD_CNF` arrived: the acquisition provider currently in use.
    StatsUpdate { acq_cni: u16 },
    BlockAi { cni: u16, ai: AppInfo },
    BlockPi { pi: ProgrammeItem },
    ForwardIndicated { cni: u16 },
    VpsPdc { cni: u16, pil: u32 },
    Timescale(Vec<TscEntry>),
    DumpComplete,
    Stats(ClientStats),
    Disconnected,
}

pub struct ClientSession {
    pub conn: ConnState,
    codec: Codec,
    pub state: State,
    requested_provs: Vec<(u16, u32)>,
    wants_timescale: bool,
    wants_vps: bool,
    /// Block events handed to the caller but not yet acknowledged via
    /// [`ClientSession::notify_blocks_consumed`]. `STATS_IND` must wait for
    /// this to reach zero, since the counters it reports may describe
    /// blocks still in flight to the application (§4.11).
    outstanding_blocks: usize,
    pending_stats: VecDeque<Vec<u8>>,
    pub retry_at: Option<u32>,
    last_io_time: u32,
}

impl ClientSession {
    pub fn new(conn: ConnState, requested_provs: Vec<(u16, u32)>, now: u32) -> ClientSession {
        ClientSession {
            conn,
            codec: Codec::new(false),
            state: State::WaitConnect,
            requested_provs,
            wants_timescale: false,
            wants_vps: false,
            outstanding_blocks: 0,
            pending_stats: VecDeque::new(),
            retry_at: None,
            last_io_time: now,
        }
    }

    pub fn request_timescale(&mut self, on: bool) {
        self.wants_timescale = on;
    }

    pub fn request_vps(&mut self, on: bool) {
        self.wants_vps = on;
    }

    /// Called once the socket becomes writable after `connect` (§4.2):
    /// sends `CONNECT_REQ` and moves to `WAIT_CON_CNF`.
    pub fn begin_handshake(&mut self) {
        if self.state != State::WaitConnect {
            return;
        }
        let mut body = Vec::with_capacity(CONNECT_BODY_LEN);
        body.extend_from_slice(SERVICE_MAGIC.as_slice());
        body.extend_from_slice(&ENDIAN_MAGIC.to_ne_bytes());
        body.push(PROTOCOL_COMPAT_VERSION.0);
        body.push(PROTOCOL_COMPAT_VERSION.1);
        body.push(PROTOCOL_COMPAT_VERSION.2);
        let mut buf4 = [0u8; 4];
        NativeEndian::write_u32(&mut buf4, 1); // sw_version
        body.extend_from_slice(&buf4);
        NativeEndian::write_u32(&mut buf4, std::process::id());
        body.extend_from_slice(&buf4);
        body.push(1); // compat32
        body.push(1); // utf8
        if let Ok(framed) = self.codec.build(MsgType::ConnectReq, &body) {
            self.conn.enqueue(framed);
        }
        self.state = State::WaitConCnf;
    }

    /// `check_timeout` mirror for the client side (§4.11): 60s in any
    /// non-idle state, enforced by the caller via `ConnState::check_timeout`
    /// already; this additionally governs the 20s reconnect backoff.
    pub fn ready_to_retry(&self, now: u32) -> bool {
        self.state == State::Retry && self.retry_at.map(|t| now >= t).unwrap_or(true)
    }

    pub fn enter_retry(&mut self, now: u32) {
        self.conn.close();
        self.state = State::Retry;
        self.retry_at = Some(now + RETRY_DELAY_SECS);
    }

    pub fn handle_message(
        &mut self,
        msg_type: MsgType,
        body: &[u8],
        now: u32,
    ) -> Result<Vec<ClientEvent>, ProtocolError> {
        self.last_io_time = now;

        if msg_type == MsgType::CloseInd {
            self.conn.close();
            return Ok(vec![ClientEvent::Disconnected]);
        }

        match (self.state, msg_type) {
            (State::WaitConCnf, MsgType::ConnectCnf) => self.on_connect_cnf(body),
            (State::WaitFwdCnf, MsgType::ForwardCnf) => self.on_forward_cnf(body),
            (State::WaitBlocks, MsgType::ForwardInd) => self.on_forward_ind(body),
            (State::WaitBlocks, MsgType::BlockInd) => self.on_block_ind(body),
            (State::WaitBlocks, MsgType::VpsPdcInd) => self.on_vps_pdc_ind(body),
            (State::WaitBlocks, MsgType::TscInd) => self.on_tsc_ind(body),
            (State::WaitBlocks, MsgType::DumpInd) => Ok(vec![ClientEvent::DumpComplete]),
            (State::WaitBlocks, MsgType::StatsInd) => self.on_stats_ind(body),
            _ => Err(ProtocolError::BadType),
        }
    }

    fn on_connect_cnf(&mut self, body: &[u8]) -> Result<Vec<ClientEvent>, ProtocolError> {
        if body.len() != CONNECT_BODY_LEN {
            return Err(ProtocolError::BadLength);
        }
        if &body[0..20] != SERVICE_MAGIC.as_slice() {
            return Err(ProtocolError::BadMagic);
        }
        let peer_version = (body[22], body[23], body[24]);
        let compat32 = body[33];
        if peer_version != PROTOCOL_COMPAT_VERSION || compat32 == 0 {
            self.conn.close();
            self.state = State::Error;
            return Err(ProtocolError::BadMagic);
        }

        let mut body_out = Vec::with_capacity(2 + 6 * self.requested_provs.len());
        body_out.extend_from_slice(&(self.requested_provs.len() as u16).to_ne_bytes());
        for (cni, mtime) in &self.requested_provs {
            body_out.extend_from_slice(&cni.to_ne_bytes());
            let mut buf4 = [0u8; 4];
            NativeEndian::write_u32(&mut buf4, *mtime);
            body_out.extend_from_slice(&buf4);
        }
        if let Ok(framed) = self.codec.build(MsgType::ForwardReq, &body_out) {
            self.conn.enqueue(framed);
        }

        if self.wants_timescale || self.wants_vps {
            let mut flags = 0u8;
            if self.wants_timescale {
                flags |= STATS_REQ_TIMESCALE;
            }
            if self.wants_vps {
                flags |= STATS_REQ_VPS_PDC;
            }
            if let Ok(framed) = self.codec.build(MsgType::StatsReq, &[flags]) {
                self.conn.enqueue(framed);
            }
        }

        self.state = State::WaitFwdCnf;
        Ok(Vec::new())
    }

    fn on_forward_cnf(&mut self, body: &[u8]) -> Result<Vec<ClientEvent>, ProtocolError> {
        if body.len() != 2 {
            return Err(ProtocolError::BadLength);
        }
        let acq_cni = u16::from_ne_bytes([body[0], body[1]]);
        self.state = State::WaitBlocks;
        Ok(vec![ClientEvent::StatsUpdate { acq_cni }])
    }

    fn on_forward_ind(&mut self, body: &[u8]) -> Result<Vec<ClientEvent>, ProtocolError> {
        if body.len() != 2 {
            return Err(ProtocolError::BadLength);
        }
        let cni = u16::from_ne_bytes([body[0], body[1]]);
        Ok(vec![ClientEvent::ForwardIndicated { cni }])
    }

    fn on_block_ind(&mut self, body: &[u8]) -> Result<Vec<ClientEvent>, ProtocolError> {
        if body.is_empty() {
            return Err(ProtocolError::BadLength);
        }
        let dump_type = match body[0] {
            0 => DumpBlockType::Ai,
            1 => DumpBlockType::Pi,
            2 => DumpBlockType::ExpiredPi,
            _ => return Err(ProtocolError::BadType),
        };
        let payload = &body[1..];
        self.outstanding_blocks += 1;
        match dump_type {
            DumpBlockType::Ai => {
                let ai = decode_ai_block(payload).ok_or(ProtocolError::BadLength)?;
                Ok(vec![ClientEvent::BlockAi { cni: ai.cni, ai }])
            }
            DumpBlockType::Pi => {
                let pi = decode_pi_block(payload).ok_or(ProtocolError::BadLength)?;
                Ok(vec![ClientEvent::BlockPi { pi }])
            }
            DumpBlockType::ExpiredPi => Ok(Vec::new()),
        }
    }

    fn on_vps_pdc_ind(&mut self, body: &[u8]) -> Result<Vec<ClientEvent>, ProtocolError> {
        if body.len() != 6 {
            return Err(ProtocolError::BadLength);
        }
        let cni = u16::from_ne_bytes([body[0], body[1]]);
        let pil = NativeEndian::read_u32(&body[2..6]);
        Ok(vec![ClientEvent::VpsPdc { cni, pil }])
    }

    fn on_tsc_ind(&mut self, body: &[u8]) -> Result<Vec<ClientEvent>, ProtocolError> {
        let entries = TscEntry::parse_body(body).ok_or(ProtocolError::BadLength)?;
        Ok(vec![ClientEvent::Timescale(entries)])
    }

    /// `STATS_IND` is queued rather than surfaced immediately: the counters
    /// it reports may describe blocks the application hasn't drained yet
    /// (§4.11). It's released by [`ClientSession::notify_blocks_consumed`].
    fn on_stats_ind(&mut self, body: &[u8]) -> Result<Vec<ClientEvent>, ProtocolError> {
        if body.is_empty() {
            return Err(ProtocolError::BadLength);
        }
        self.pending_stats.push_back(body.to_vec());
        if self.outstanding_blocks == 0 {
            return Ok(self.drain_pending_stats());
        }
        Ok(Vec::new())
    }

    /// Call once the application has finished consuming the block events
    /// returned by the last `handle_message` batch. Releases any `STATS_IND`
    /// that had been waiting on them.
    pub fn notify_blocks_consumed(&mut self, count: usize) -> Vec<ClientEvent> {
        self.outstanding_blocks = self.outstanding_blocks.saturating_sub(count);
        if self.outstanding_blocks == 0 {
            self.drain_pending_stats()
        } else {
            Vec::new()
        }
    }

    fn drain_pending_stats(&mut self) -> Vec<ClientEvent> {
        let mut out = Vec::new();
        while let Some(body) = self.pending_stats.pop_front() {
            if let Some(stats) = decode_stats(&body) {
                out.push(ClientEvent::Stats(stats));
            }
        }
        out
    }
}

fn decode_stats(body: &[u8]) -> Option<ClientStats> {
    if body.is_empty() {
        return None;
    }
    match body[0] {
        v if v == StatsVariant::Minimal as u8 => Some(ClientStats {
            acq_mode: *body.get(1)?,
            ..ClientStats::default()
        }),
        v if v == StatsVariant::Initial as u8 => {
            if body.len() != STATS_INITIAL_SCHEMA.body_len {
                return None;
            }
            Some(ClientStats {
                acq_mode: body[1],
                cni: u16::from_ne_bytes([body[2], body[3]]),
                ai_min: NativeEndian::read_u32(&body[4..8]),
                ai_avg: NativeEndian::read_u32(&body[8..12]),
                ai_max: NativeEndian::read_u32(&body[12..16]),
                ..ClientStats::default()
            })
        }
        v if v == StatsVariant::Update as u8 => {
            if body.len() != STATS_UPDATE_SCHEMA.body_len {
                return None;
            }
            Some(ClientStats {
                acq_mode: body[1],
                cni: u16::from_ne_bytes([body[2], body[3]]),
                ai_min: NativeEndian::read_u32(&body[4..8]),
                ai_avg: NativeEndian::read_u32(&body[8..12]),
                ai_max: NativeEndian::read_u32(&body[12..16]),
                ttx_pkg_got: NativeEndian::read_u32(&body[16..20]),
                ttx_pkg_lost: NativeEndian::read_u32(&body[20..24]),
                epg_blocks_got: NativeEndian::read_u32(&body[24..28]),
                epg_blocks_dropped: NativeEndian::read_u32(&body[28..32]),
                epg_pages_per_min: NativeEndian::read_u32(&body[32..36]),
            })
        }
        _ => None,
    }
}

/// Folds an `IoError` from the net transport into a retry/error transition
/// (§4.11): any I/O failure while connecting or mid-stream drops to `RETRY`.
pub fn on_io_error(session: &mut ClientSession, err: &IoError, now: u32) {
    if err.has_failed() {
        session.enter_retry(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epg_proto::transport::Socket;
    use std::os::unix::net::UnixStream;

    fn session() -> ClientSession {
        let (a, _b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        ClientSession::new(ConnState::new(Socket::Unix(a)), vec![(0x0d94, 1_000)], 0)
    }

    fn connect_cnf_body() -> Vec<u8> {
        let mut body = vec![0u8; CONNECT_BODY_LEN];
        body[0..20].copy_from_slice(SERVICE_MAGIC.as_slice());
        body[20..22].copy_from_slice(&ENDIAN_MAGIC.to_ne_bytes());
        body[22] = PROTOCOL_COMPAT_VERSION.0;
        body[23] = PROTOCOL_COMPAT_VERSION.1;
        body[24] = PROTOCOL_COMPAT_VERSION.2;
        body[33] = 1; // compat32
        body
    }

    #[test]
    fn begin_handshake_enqueues_connect_req_and_advances_state() {
        let mut s = session();
        s.begin_handshake();
        assert_eq!(s.state, State::WaitConCnf);
        assert!(s.conn.wants_write());
    }

    #[test]
    fn connect_cnf_mismatch_enters_error() {
        let mut s = session();
        s.state = State::WaitConCnf;
        let mut body = connect_cnf_body();
        body[33] = 0; // not 32-bit compatible
        assert!(s.handle_message(MsgType::ConnectCnf, &body, 0).is_err());
        assert_eq!(s.state, State::Error);
    }

    #[test]
    fn connect_cnf_accepted_sends_forward_req_and_advances() {
        let mut s = session();
        s.state = State::WaitConCnf;
        let body = connect_cnf_body();
        let events = s.handle_message(MsgType::ConnectCnf, &body, 0).unwrap();
        assert!(events.is_empty());
        assert_eq!(s.state, State::WaitFwdCnf);
        assert!(s.conn.wants_write());
    }

    #[test]
    fn forward_cnf_emits_stats_update_and_enters_wait_blocks() {
        let mut s = session();
        s.state = State::WaitFwdCnf;
        let body = 0x0d94u16.to_ne_bytes();
        let events = s.handle_message(MsgType::ForwardCnf, &body, 0).unwrap();
        assert_eq!(events, vec![ClientEvent::StatsUpdate { acq_cni: 0x0d94 }]);
        assert_eq!(s.state, State::WaitBlocks);
    }

    #[test]
    fn tsc_ind_decodes_its_entries() {
        let mut s = session();
        s.state = State::WaitBlocks;
        let entry = epg_db::TscEntry {
            start_off_mins: 5,
            duration_mins: 30,
            netwop: 0,
            flags: Default::default(),
            block_idx: 1,
            concat_count: 1,
        };
        let events = s.handle_message(MsgType::TscInd, &entry.to_wire_bytes(), 0).unwrap();
        assert_eq!(events, vec![ClientEvent::Timescale(vec![entry])]);
    }

    #[test]
    fn tsc_ind_with_truncated_entry_is_rejected() {
        let mut s = session();
        s.state = State::WaitBlocks;
        assert_eq!(
            s.handle_message(MsgType::TscInd, &[0u8; 5], 0),
            Err(ProtocolError::BadLength)
        );
    }

    #[test]
    fn stats_ind_is_queued_until_blocks_are_consumed() {
        let mut s = session();
        s.state = State::WaitBlocks;

        let mut block_body = vec![1u8]; // Pi
        block_body.extend_from_slice(&epg_db::dump::encode_pi_block(&sample_pi()));
        s.handle_message(MsgType::BlockInd, &block_body, 0).unwrap();

        let stats_body = vec![StatsVariant::Minimal as u8, 2];
        let events = s.handle_message(MsgType::StatsInd, &stats_body, 0).unwrap();
        assert!(events.is_empty(), "stats must wait for the block to be consumed");

        let released = s.notify_blocks_consumed(1);
        assert_eq!(released.len(), 1);
        assert!(matches!(released[0], ClientEvent::Stats(_)));
    }

    fn sample_pi() -> ProgrammeItem {
        ProgrammeItem {
            netwop_no: 0,
            block_no: 1,
            start_time: 100,
            stop_time: 200,
            parental_rating: 0,
            editorial_rating: 0,
            themes: Default::default(),
            sort_criteria: Default::default(),
            features: Default::default(),
            pil: epg_db::Pil::NONE,
            title: "Test".into(),
            description: None,
            merge_sources: None,
            version_ok: true,
        }
    }

    #[test]
    fn retry_waits_out_the_backoff_delay() {
        let mut s = session();
        s.enter_retry(100);
        assert!(!s.ready_to_retry(110));
        assert!(s.ready_to_retry(120));
    }
}
