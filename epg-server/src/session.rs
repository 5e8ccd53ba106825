//! Server session (SS, §4.10): per-client dump progress, forward filter and
//! stats cadence, layered on the shared net transport and wire codec.

use std::collections::VecDeque;

use byteorder::{ByteOrder, NativeEndian};
use epg_core::error::ProtocolError;
use epg_db::{ContextManager, DumpBlockType, FailMode, TscEntry};
use epg_db::dump::{encode_ai_block, encode_pi_block};
use epg_proto::codec::Codec;
use epg_proto::message::{
    MsgType, CONNECT_BODY_LEN, ENDIAN_MAGIC, ENDIAN_MAGIC_SWAPPED, PROTOCOL_COMPAT_VERSION,
    SERVICE_MAGIC, STATS_REQ_TIMESCALE, STATS_REQ_VPS_PDC,
};
use epg_proto::message::{StatsVariant, STATS_INITIAL_SCHEMA, STATS_UPDATE_SCHEMA};
use epg_proto::transport::ConnState;

const SW_VERSION: u32 = 1;
const NO_RECEPTION_INTERVAL_SECS: u32 = 15;

/// Lifecycle states per client (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    WaitConReq,
    WaitFwdReq,
    DumpRequested,
    DumpAcq,
    Forward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsCadence {
    Done,
    Initial,
    Update,
}

/// Live acquisition counters, supplied by the caller (the daemon binary owns
/// acquisition state; this session only formats what it's handed).
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
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

struct DumpCursor {
    cni: u16,
    ai_sent: bool,
    /// `None` once a per-provider dump has nothing further to send; `Some`
    /// holds the remaining PI still to stream, oldest-start-time first.
    remaining: VecDeque<epg_db::ProgrammeItem>,
    /// The acq-provider-not-in-client's-set case only sends AI (§4.10: "dump
    /// only AI + OI#0"); this simplified db model has no separate OI#0
    /// network-summary block, so AI alone stands in for it.
    ai_only: bool,
}

pub struct ServerSession {
    pub conn: ConnState,
    codec: Codec,
    pub state: State,
    client_provs: Vec<(u16, u32)>,
    pending_dump: VecDeque<u16>,
    cursor: Option<DumpCursor>,
    pub stats_cadence: StatsCadence,
    wants_vps: bool,
    wants_timescale: bool,
    last_vps: Option<(u16, u32)>,
    last_reception: u32,
    last_no_reception_sent: u32,
    /// Set once the session should be closed after its write queue drains
    /// (the text-mode `ACQSTAT`/`PID` query path, §4.1).
    pub close_after_flush: bool,
}

impl ServerSession {
    pub fn new(conn: ConnState, now: u32) -> ServerSession {
        ServerSession {
            conn,
            codec: Codec::new(false),
            state: State::WaitConReq,
            client_provs: Vec::new(),
            pending_dump: VecDeque::new(),
            cursor: None,
            stats_cadence: StatsCadence::Done,
            wants_vps: false,
            wants_timescale: false,
            last_vps: None,
            last_reception: now,
            last_no_reception_sent: now,
            close_after_flush: false,
        }
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn wants_timescale(&self) -> bool {
        self.wants_timescale
    }

    /// Dispatches one fully-reassembled message (§4.10). Returns framed
    /// reply bytes the caller should enqueue on `self.conn`, in order.
    pub fn handle_message(
        &mut self,
        msg_type: MsgType,
        body: &[u8],
        now: u32,
    ) -> Result<Vec<Vec<u8>>, ProtocolError> {
        self.last_reception = now;

        if msg_type == MsgType::CloseInd {
            self.conn.close();
            return Ok(Vec::new());
        }

        match (self.state, msg_type) {
            (State::WaitConReq, MsgType::ConnectReq) => self.on_connect_req(body),
            (State::WaitFwdReq, MsgType::ForwardReq) => self.on_forward_req(body),
            (_, MsgType::StatsReq) if self.state != State::WaitConReq => {
                self.on_stats_req(body)
            }
            _ => Err(ProtocolError::BadType),
        }
    }

    fn on_connect_req(&mut self, body: &[u8]) -> Result<Vec<Vec<u8>>, ProtocolError> {
        if body == b"ACQSTAT" || body == b"PID" {
            let text = if body == b"PID" {
                format!("PID {}\n", std::process::id())
            } else {
                "Acq mode: unknown\n".to_string()
            };
            self.close_after_flush = true;
            let framed = self
                .codec
                .build(MsgType::ConqueryCnf, text.as_bytes())
                .map_err(|_| ProtocolError::BadLength)?;
            return Ok(vec![framed]);
        }

        if body.len() != CONNECT_BODY_LEN {
            return Err(ProtocolError::BadLength);
        }
        if &body[0..20] != SERVICE_MAGIC.as_slice() {
            return Err(ProtocolError::BadMagic);
        }
        let raw_endian = u16::from_ne_bytes([body[20], body[21]]);
        let swap = match raw_endian {
            ENDIAN_MAGIC => false,
            ENDIAN_MAGIC_SWAPPED => true,
            _ => return Err(ProtocolError::BadMagic),
        };
        let peer_version = (body[22], body[23], body[24]);
        if peer_version != PROTOCOL_COMPAT_VERSION {
            return Err(ProtocolError::BadMagic);
        }
        self.codec = Codec::new(swap);

        let mut reply = Vec::with_capacity(CONNECT_BODY_LEN);
        reply.extend_from_slice(SERVICE_MAGIC.as_slice());
        reply.extend_from_slice(&ENDIAN_MAGIC.to_ne_bytes());
        reply.push(PROTOCOL_COMPAT_VERSION.0);
        reply.push(PROTOCOL_COMPAT_VERSION.1);
        reply.push(PROTOCOL_COMPAT_VERSION.2);
        let mut buf4 = [0u8; 4];
        NativeEndian::write_u32(&mut buf4, SW_VERSION);
        reply.extend_from_slice(&buf4);
        NativeEndian::write_u32(&mut buf4, std::process::id());
        reply.extend_from_slice(&buf4);
        reply.push(1); // compat32
        reply.push(1); // utf8

        self.state = State::WaitFwdReq;
        let framed = self
            .codec
            .build(MsgType::ConnectCnf, &reply)
            .map_err(|_| ProtocolError::BadLength)?;
        Ok(vec![framed])
    }

    fn on_forward_req(&mut self, body: &[u8]) -> Result<Vec<Vec<u8>>, ProtocolError> {
        if body.len() < 2 {
            return Err(ProtocolError::BadLength);
        }
        let count = u16::from_ne_bytes([body[0], body[1]]) as usize;
        if body.len() != 2 + 6 * count {
            return Err(ProtocolError::BadLength);
        }
        let mut provs = Vec::with_capacity(count);
        for i in 0..count {
            let off = 2 + i * 6;
            let cni = u16::from_ne_bytes([body[off], body[off + 1]]);
            let mtime = NativeEndian::read_u32(&body[off + 2..off + 6]);
            provs.push((cni, mtime));
        }
        self.client_provs = provs;
        self.pending_dump = self.client_provs.iter().map(|(cni, _)| *cni).collect();
        self.state = State::DumpRequested;

        let mut reply = Vec::with_capacity(2);
        reply.extend_from_slice(&0u16.to_ne_bytes());
        let framed = self
            .codec
            .build(MsgType::ForwardCnf, &reply)
            .map_err(|_| ProtocolError::BadLength)?;
        Ok(vec![framed])
    }

    fn on_stats_req(&mut self, body: &[u8]) -> Result<Vec<Vec<u8>>, ProtocolError> {
        if body.len() != 1 {
            return Err(ProtocolError::BadLength);
        }
        self.wants_timescale = body[0] & STATS_REQ_TIMESCALE != 0;
        self.wants_vps = body[0] & STATS_REQ_VPS_PDC != 0;
        Ok(Vec::new())
    }

    /// Advances the dump cursor by at most one unit of work (one block or
    /// one `FORWARD_IND`), so the select loop never blocks on a single slow
    /// client (§4.10, §5).
    pub fn step_dump(
        &mut self,
        cx: &mut ContextManager,
        acq_current_cni: Option<u16>,
    ) -> Option<Vec<u8>> {
        match self.state {
            State::DumpRequested => self.step_dump_requested(cx, acq_current_cni),
            State::DumpAcq => self.step_dump_acq(cx, acq_current_cni),
            _ => None,
        }
    }

    fn step_dump_requested(
        &mut self,
        cx: &mut ContextManager,
        acq_current_cni: Option<u16>,
    ) -> Option<Vec<u8>> {
        if self.cursor.is_none() {
            loop {
                let cni = match self.pending_dump.pop_front() {
                    Some(c) => c,
                    None => {
                        self.begin_acq_dump(acq_current_cni);
                        return None;
                    }
                };
                let client_mtime = self
                    .client_provs
                    .iter()
                    .find(|(c, _)| *c == cni)
                    .map(|(_, m)| *m)
                    .unwrap_or(0);
                let newer = match cx.peek(cni) {
                    Some(ctx) => ctx.last_acq_time > client_mtime,
                    None => false,
                };
                if !newer {
                    continue;
                }
                cx.open(cni, FailMode::RetNull);
                let remaining = cx
                    .get(cni)
                    .map(|ctx| ctx.iter().cloned().collect())
                    .unwrap_or_default();
                self.cursor = Some(DumpCursor {
                    cni,
                    ai_sent: false,
                    remaining,
                    ai_only: false,
                });
                break;
            }
        }

        let finished_cni = self.drain_cursor_step();
        if let Some(cni) = finished_cni {
            cx.close(cni, true);
            return Some(self.build_forward_ind(cni));
        }
        self.poll_current_block(cx)
    }

    fn begin_acq_dump(&mut self, acq_current_cni: Option<u16>) {
        let in_filter = acq_current_cni
            .map(|cni| self.client_provs.iter().any(|(c, _)| *c == cni))
            .unwrap_or(true);
        if acq_current_cni.is_some() && !in_filter {
            self.state = State::DumpAcq;
        } else {
            self.state = State::Forward;
        }
    }

    fn step_dump_acq(
        &mut self,
        cx: &mut ContextManager,
        acq_current_cni: Option<u16>,
    ) -> Option<Vec<u8>> {
        if self.cursor.is_none() {
            let cni = acq_current_cni?;
            cx.open(cni, FailMode::RetDummy);
            self.cursor = Some(DumpCursor {
                cni,
                ai_sent: false,
                remaining: VecDeque::new(),
                ai_only: true,
            });
        }

        let finished_cni = self.drain_cursor_step();
        if let Some(cni) = finished_cni {
            cx.close(cni, true);
            self.state = State::Forward;
            let forward_ind = self.build_forward_ind(cni);
            return Some(forward_ind);
        }
        self.poll_current_block(cx)
    }

    /// Returns `Some(cni)` once the active cursor has nothing left to send.
    fn drain_cursor_step(&mut self) -> Option<u16> {
        let done = match &self.cursor {
            Some(c) => c.ai_sent && (c.ai_only || c.remaining.is_empty()),
            None => true,
        };
        if done {
            self.cursor.take().map(|c| c.cni)
        } else {
            None
        }
    }

    fn poll_current_block(&mut self, cx: &ContextManager) -> Option<Vec<u8>> {
        let cursor = self.cursor.as_mut()?;
        if !cursor.ai_sent {
            cursor.ai_sent = true;
            let cni = cursor.cni;
            let ai = cx.get(cni).map(|ctx| ctx.app_info.clone())?;
            return Some(self.build_block_ind_ai(&ai));
        }
        let pi = cursor.remaining.pop_front()?;
        Some(self.build_block_ind_pi(&pi))
    }

    fn build_forward_ind(&self, cni: u16) -> Vec<u8> {
        let body = cni.to_ne_bytes();
        self.codec
            .build(MsgType::ForwardInd, &body)
            .unwrap_or_default()
    }

    fn build_block_ind_ai(&self, ai: &epg_db::AppInfo) -> Vec<u8> {
        let mut body = vec![DumpBlockType::Ai as u8];
        body.extend_from_slice(&encode_ai_block(ai));
        self.codec
            .build(MsgType::BlockInd, &body)
            .unwrap_or_default()
    }

    fn build_block_ind_pi(&self, pi: &epg_db::ProgrammeItem) -> Vec<u8> {
        let mut body = vec![DumpBlockType::Pi as u8];
        body.extend_from_slice(&encode_pi_block(pi));
        self.codec
            .build(MsgType::BlockInd, &body)
            .unwrap_or_default()
    }

    /// Applies the live forward filter (§4.10) to a freshly produced block
    /// from acquisition, returning the framed `BLOCK_IND` if it should be
    /// sent to this client.
    pub fn on_new_block(
        &mut self,
        cni: u16,
        dump_type: DumpBlockType,
        payload: &[u8],
    ) -> Option<Vec<u8>> {
        if self.state != State::Forward {
            return None;
        }
        let in_filter = self.client_provs.iter().any(|(c, _)| *c == cni);
        let is_ai = matches!(dump_type, DumpBlockType::Ai);
        if !(in_filter || is_ai) {
            return None;
        }
        if is_ai {
            self.stats_cadence = StatsCadence::Update;
        }
        let mut body = vec![dump_type as u8];
        body.extend_from_slice(payload);
        self.codec.build(MsgType::BlockInd, &body).ok()
    }

    /// VPS/PDC forwarding (§4.10): only when requested and the label changed.
    pub fn on_vps_pdc(&mut self, cni: u16, pil: u32) -> Option<Vec<u8>> {
        if self.state != State::Forward || !self.wants_vps {
            return None;
        }
        if self.last_vps == Some((cni, pil)) {
            return None;
        }
        self.last_vps = Some((cni, pil));
        let mut body = [0u8; 6];
        body[0..2].copy_from_slice(&cni.to_ne_bytes());
        NativeEndian::write_u32(&mut body[2..6], pil);
        self.codec.build(MsgType::VpsPdcInd, &body).ok()
    }

    /// Timescale forwarding (§4.4, §4.10): only when requested, and only
    /// once there's something to send. `batches` is shared across every
    /// session (one timescale queue per daemon, not per client), so this
    /// just formats whatever the caller already drained.
    pub fn build_timescale_ind(&self, batches: &[(u8, Vec<TscEntry>)]) -> Option<Vec<u8>> {
        if self.state != State::Forward || !self.wants_timescale {
            return None;
        }
        let mut body = Vec::new();
        for (_, entries) in batches {
            for entry in entries {
                body.extend_from_slice(&entry.to_wire_bytes());
            }
        }
        if body.is_empty() {
            return None;
        }
        self.codec.build(MsgType::TscInd, &body).ok()
    }

    /// Periodic 1 Hz housekeeping (§4.10, §5): the 15-second no-reception
    /// stats fallback and any pending cadence-driven `STATS_IND`.
    pub fn periodic_tick(&mut self, now: u32, stats: &StatsSnapshot) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        if self.state != State::Forward {
            return out;
        }

        if self.stats_cadence != StatsCadence::Done {
            let variant = match self.stats_cadence {
                StatsCadence::Initial => StatsVariant::Initial,
                StatsCadence::Update => StatsVariant::Update,
                StatsCadence::Done => unreachable!(),
            };
            if let Ok(msg) = self.build_stats_message(variant, stats) {
                out.push(msg);
            }
            self.stats_cadence = StatsCadence::Done;
            self.last_no_reception_sent = now;
        } else if now.saturating_sub(self.last_reception) >= NO_RECEPTION_INTERVAL_SECS
            && now.saturating_sub(self.last_no_reception_sent) >= NO_RECEPTION_INTERVAL_SECS
        {
            if let Ok(msg) = self.build_stats_message(StatsVariant::Minimal, stats) {
                out.push(msg);
            }
            self.last_no_reception_sent = now;
        }
        out
    }

    fn build_stats_message(
        &self,
        variant: StatsVariant,
        stats: &StatsSnapshot,
    ) -> Result<Vec<u8>, ProtocolError> {
        let body = match variant {
            StatsVariant::Minimal => vec![StatsVariant::Minimal as u8, stats.acq_mode],
            StatsVariant::Initial => {
                let mut body = vec![0u8; STATS_INITIAL_SCHEMA.body_len];
                body[0] = StatsVariant::Initial as u8;
                body[1] = stats.acq_mode;
                body[2..4].copy_from_slice(&stats.cni.to_ne_bytes());
                NativeEndian::write_u32(&mut body[4..8], stats.ai_min);
                NativeEndian::write_u32(&mut body[8..12], stats.ai_avg);
                NativeEndian::write_u32(&mut body[12..16], stats.ai_max);
                body
            }
            StatsVariant::Update => {
                let mut body = vec![0u8; STATS_UPDATE_SCHEMA.body_len];
                body[0] = StatsVariant::Update as u8;
                body[1] = stats.acq_mode;
                body[2..4].copy_from_slice(&stats.cni.to_ne_bytes());
                NativeEndian::write_u32(&mut body[4..8], stats.ai_min);
                NativeEndian::write_u32(&mut body[8..12], stats.ai_avg);
                NativeEndian::write_u32(&mut body[12..16], stats.ai_max);
                NativeEndian::write_u32(&mut body[16..20], stats.ttx_pkg_got);
                NativeEndian::write_u32(&mut body[20..24], stats.ttx_pkg_lost);
                NativeEndian::write_u32(&mut body[24..28], stats.epg_blocks_got);
                NativeEndian::write_u32(&mut body[28..32], stats.epg_blocks_dropped);
                NativeEndian::write_u32(&mut body[32..36], stats.epg_pages_per_min);
                body
            }
        };
        self.codec
            .build(MsgType::StatsInd, &body)
            .map_err(|_| ProtocolError::BadLength)
    }
}

/// Decodes a peer's `ACQSTAT`/`PID` text query heuristically, used by the
/// select loop to skip the usual `CONNECT_REQ` framing when a short text
/// body precedes it on the wire.
pub fn is_text_query(body: &[u8]) -> bool {
    body == b"ACQSTAT" || body == b"PID"
}

#[cfg(test)]
mod tests {
    use super::*;
    use epg_proto::transport::Socket;
    use std::os::unix::net::UnixStream;

    fn session() -> ServerSession {
        let (a, _b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        ServerSession::new(ConnState::new(Socket::Unix(a)), 0)
    }

    fn connect_req_body(swap_marker: u16) -> Vec<u8> {
        let mut body = vec![0u8; CONNECT_BODY_LEN];
        body[0..20].copy_from_slice(SERVICE_MAGIC.as_slice());
        body[20..22].copy_from_slice(&swap_marker.to_ne_bytes());
        body[22] = PROTOCOL_COMPAT_VERSION.0;
        body[23] = PROTOCOL_COMPAT_VERSION.1;
        body[24] = PROTOCOL_COMPAT_VERSION.2;
        body
    }

    #[test]
    fn connect_req_with_bad_magic_is_rejected() {
        let mut s = session();
        let mut body = connect_req_body(ENDIAN_MAGIC);
        body[0] = b'X';
        assert_eq!(
            s.handle_message(MsgType::ConnectReq, &body, 0),
            Err(ProtocolError::BadMagic)
        );
    }

    #[test]
    fn connect_req_advances_to_wait_fwd_req() {
        let mut s = session();
        let body = connect_req_body(ENDIAN_MAGIC);
        let replies = s.handle_message(MsgType::ConnectReq, &body, 0).unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(s.state, State::WaitFwdReq);
    }

    #[test]
    fn connect_req_detects_swapped_peer() {
        let mut s = session();
        let body = connect_req_body(ENDIAN_MAGIC_SWAPPED);
        s.handle_message(MsgType::ConnectReq, &body, 0).unwrap();
        assert!(s.codec.swap);
    }

    #[test]
    fn acqstat_text_query_replies_and_marks_close() {
        let mut s = session();
        let replies = s
            .handle_message(MsgType::ConnectReq, b"PID", 0)
            .unwrap();
        assert_eq!(replies.len(), 1);
        assert!(s.close_after_flush);
    }

    #[test]
    fn forward_req_parses_cni_mtime_pairs_and_enters_dump_requested() {
        let mut s = session();
        s.state = State::WaitFwdReq;
        let mut body = vec![0u8; 2 + 6 * 2];
        body[0..2].copy_from_slice(&2u16.to_ne_bytes());
        body[2..4].copy_from_slice(&0x0d94u16.to_ne_bytes());
        NativeEndian::write_u32(&mut body[4..8], 1_000);
        body[8..10].copy_from_slice(&0x0dc1u16.to_ne_bytes());
        NativeEndian::write_u32(&mut body[10..14], 2_000);
        let replies = s.handle_message(MsgType::ForwardReq, &body, 0).unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(s.state, State::DumpRequested);
        assert_eq!(s.client_provs, vec![(0x0d94, 1_000), (0x0dc1, 2_000)]);
    }

    #[test]
    fn dump_skips_providers_not_newer_than_client_mtime() {
        let mut cx = ContextManager::new("/nonexistent/path/for/test");
        cx.open(0x1234, FailMode::RetCreate);
        cx.get_mut(0x1234).unwrap().last_acq_time = 500;
        cx.close(0x1234, true);

        let mut s = session();
        s.state = State::DumpRequested;
        s.client_provs = vec![(0x1234, 1_000)]; // client already has newer data
        s.pending_dump = [0x1234].into_iter().collect();

        let msg = s.step_dump(&mut cx, None);
        assert!(msg.is_none());
        assert_eq!(s.state, State::Forward);
    }

    #[test]
    fn dump_streams_ai_then_pi_then_emits_forward_ind() {
        let mut cx = ContextManager::new("/nonexistent/path/for/test");
        cx.open(0x1234, FailMode::RetCreate);
        {
            let ctx = cx.get_mut(0x1234).unwrap();
            ctx.last_acq_time = 2_000;
            ctx.insert_pi(sample_pi(), 2_000);
        }
        cx.close(0x1234, true);

        let mut s = session();
        s.state = State::DumpRequested;
        s.client_provs = vec![(0x1234, 0)];
        s.pending_dump = [0x1234].into_iter().collect();

        let ai_msg = s.step_dump(&mut cx, None);
        assert!(ai_msg.is_some());
        let pi_msg = s.step_dump(&mut cx, None);
        assert!(pi_msg.is_some());
        let forward_ind = s.step_dump(&mut cx, None);
        assert!(forward_ind.is_some());
        assert_eq!(s.state, State::Forward);
    }

    fn sample_pi() -> epg_db::ProgrammeItem {
        epg_db::ProgrammeItem {
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
    fn live_block_outside_filter_and_not_ai_is_dropped() {
        let mut s = session();
        s.state = State::Forward;
        s.client_provs = vec![(0x1234, 0)];
        let msg = s.on_new_block(0x5678, DumpBlockType::Pi, &[]);
        assert!(msg.is_none());
    }

    #[test]
    fn live_ai_block_always_forwards_and_sets_update_cadence() {
        let mut s = session();
        s.state = State::Forward;
        s.client_provs = vec![(0x1234, 0)];
        let msg = s.on_new_block(0x5678, DumpBlockType::Ai, &[1, 2, 3]);
        assert!(msg.is_some());
        assert_eq!(s.stats_cadence, StatsCadence::Update);
    }

    #[test]
    fn vps_pdc_only_forwards_on_change_when_requested() {
        let mut s = session();
        s.state = State::Forward;
        s.wants_vps = true;
        assert!(s.on_vps_pdc(0x1234, 99).is_some());
        assert!(s.on_vps_pdc(0x1234, 99).is_none());
        assert!(s.on_vps_pdc(0x1234, 100).is_some());
    }

    #[test]
    fn no_reception_fallback_fires_after_15s_idle() {
        let mut s = session();
        s.state = State::Forward;
        s.last_reception = 0;
        s.last_no_reception_sent = 0;
        let stats = StatsSnapshot::default();
        assert!(s.periodic_tick(10, &stats).is_empty());
        assert!(!s.periodic_tick(16, &stats).is_empty());
    }

    fn tsc_entry(netwop: u8) -> epg_db::TscEntry {
        epg_db::TscEntry {
            start_off_mins: 0,
            duration_mins: 30,
            netwop,
            flags: Default::default(),
            block_idx: 1,
            concat_count: 1,
        }
    }

    #[test]
    fn timescale_ind_suppressed_unless_requested_and_forwarding() {
        let mut s = session();
        let batches = vec![(0u8, vec![tsc_entry(0)])];
        assert!(s.build_timescale_ind(&batches).is_none());

        s.state = State::Forward;
        assert!(s.build_timescale_ind(&batches).is_none(), "wants_timescale still false");

        s.wants_timescale = true;
        assert!(s.build_timescale_ind(&batches).is_some());
    }

    #[test]
    fn timescale_ind_omitted_when_batches_empty() {
        let mut s = session();
        s.state = State::Forward;
        s.wants_timescale = true;
        assert!(s.build_timescale_ind(&[]).is_none());
    }
}
