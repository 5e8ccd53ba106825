//! The daemon's single-threaded run loop (§5): drives acquisition from
//! either a demo capture or (absent real hardware, which stays out of
//! scope) a permanently-passive null driver, merges into the context
//! cache, and feeds both into the server select loop every iteration.

use std::collections::VecDeque;
use std::path::PathBuf;

use slog::{info, Logger};

use epg_acq::{AcqScope, AcquisitionMaster, PassiveReason, Statistics, TuneError, TuneResult, TunerControl};
use epg_acq::{DecoderEvent, SlicerType, TeletextDecoder, TunerDriver};
use epg_db::dump::{encode_ai_block, encode_pi_block};
use epg_db::{ContextManager, DumpBlockType, FailMode};
use epg_proto::transport::{self, Listener};
use epg_server::{Server, StatsSnapshot};

use crate::demo::DemoRecord;
use crate::shutdown;

/// No real VBI driver is in scope; this always reports "no tuner" so the
/// acquisition master immediately settles into forced-passive mode.
struct NullTunerDriver;

impl TunerDriver for NullTunerDriver {
    fn configure(&mut self, _card_idx: u32, _input: u32, _priority: u8) -> Result<(), TuneError> {
        Err(TuneError::NoTuner)
    }
    fn tune(&mut self, _input: u32, _freq: u32) -> Result<TuneResult, TuneError> {
        Ok(TuneResult { ok: true, is_tuner: false })
    }
    fn query_channel(&self) -> (u32, u32, bool) {
        (0, 0, false)
    }
    fn select_slicer(&mut self, _slicer: SlicerType) {}
    fn start_acq(&mut self) -> Result<(), TuneError> {
        Ok(())
    }
    fn stop_acq(&mut self) {}
    fn check_card_params(&self, _card_idx: u32) -> bool {
        false
    }
    fn query_channel_token(&self) -> bool {
        false
    }
}

struct NullDecoder;

impl TeletextDecoder for NullDecoder {
    fn start(&mut self, _page: u16, _app_id: u8, _wait_for_ai: bool) {}
    fn stop(&mut self) {}
    fn process_packets(&mut self) -> Vec<DecoderEvent> {
        Vec::new()
    }
    fn check_slicer_quality(&self) -> bool {
        true
    }
    fn get_mip_page_no(&self) -> Option<u16> {
        None
    }
    fn get_cni_and_pil(&self) -> Option<(u16, u32)> {
        None
    }
}

pub struct Options {
    pub dbdir: PathBuf,
    pub demo_file: Option<PathBuf>,
    pub acqpassive: bool,
    pub card: u32,
    pub use_tcp: bool,
    pub bind_addr: String,
    pub port: u16,
}

pub fn run(opts: Options, log: Logger) -> std::io::Result<()> {
    shutdown::install();

    let mut cx = ContextManager::new(opts.dbdir.clone());
    let _ = cx.scan_dir();

    let mut am = AcquisitionMaster::new(AcqScope::Local);
    let mut bq = epg_db::BlockQueue::new();
    let mut tq = epg_db::TimescaleQueue::new();
    let mut stats = Statistics::new();
    let mut tuner = TunerControl::new(opts.card, true);
    let mut driver: Box<dyn TunerDriver> = Box::new(NullTunerDriver);
    let mut decoder: Box<dyn TeletextDecoder> = Box::new(NullDecoder);

    let mut demo_queue: VecDeque<DemoRecord> = VecDeque::new();
    if let Some(path) = &opts.demo_file {
        match crate::demo::load(path) {
            Ok(records) => demo_queue = records.into_iter().collect(),
            Err(e) => info!(log, "failed to load demo file"; "path" => %path.display(), "error" => %e),
        }
    }

    if opts.acqpassive {
        info!(log, "forced passive mode via -acqpassive");
    }

    let now = epg_core::time::timestamp_secs();
    am.start(&mut bq, &mut tq, now);
    let reason = tuner.tune(driver.as_mut(), 0, 0, now);
    if let Some(reason) = reason {
        log_passive_reason(&log, reason);
    }

    let listener: Listener = transport::listen(opts.use_tcp, &opts.bind_addr, opts.port)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "bind failed"))?;
    let mut server = Server::new(listener)?;

    info!(log, "daemon started"; "pid" => std::process::id());

    loop {
        if shutdown::requested() {
            info!(log, "shutdown requested, exiting");
            break;
        }

        let now = epg_core::time::timestamp_secs();

        for event in decoder.process_packets() {
            dispatch_decoder_event(&mut am, &mut cx, &mut bq, &mut stats, &mut server, event, now);
        }

        if let Some(record) = demo_queue.pop_front() {
            apply_demo_record(&mut am, &mut cx, &mut bq, &mut tq, &mut server, record, now);
        }

        let (blocks, overflowing) = am.drain_phase(&mut bq);
        if overflowing {
            info!(log, "block queue overflow");
        }
        for block in blocks {
            apply_acquired_block(&mut cx, &mut server, &mut tq, am.current_cni, block, now);
        }

        if am.idle_tick(&mut cx, now) {
            tuner.maybe_escalate_slicer(driver.as_mut(), decoder.check_slicer_quality(), now);
        }

        server.broadcast_timescale(&mut tq);

        let snapshot = build_stats_snapshot(&stats, am.current_cni, now);
        server.run_once(250, &mut cx, am.current_cni, &snapshot, now)?;
    }

    Ok(())
}

fn log_passive_reason(log: &Logger, reason: PassiveReason) {
    let reason_str = match reason {
        PassiveReason::NoTuner => "no-tuner",
        PassiveReason::NoFreq => "no-freq",
        PassiveReason::AccessDevice => "access-device",
    };
    info!(log, "forced passive"; "reason" => reason_str);
}

fn dispatch_decoder_event(
    am: &mut AcquisitionMaster,
    cx: &mut ContextManager,
    bq: &mut epg_db::BlockQueue,
    stats: &mut Statistics,
    server: &mut Server,
    event: DecoderEvent,
    now: u32,
) {
    match event {
        DecoderEvent::Bi { app_id } => am.on_bi(app_id),
        DecoderEvent::Ai { cni } => {
            stats.on_ai(now);
            am.on_ai(cni, cx, bq, now);
        }
        DecoderEvent::ChannelChange => {
            let ui_selected = am.current_cni;
            am.channel_change(true, ui_selected, bq, now);
        }
        DecoderEvent::VpsPdc { cni, pil } => {
            server.broadcast_vps_pdc(cni, pil);
        }
    }
}

fn apply_demo_record(
    am: &mut AcquisitionMaster,
    cx: &mut ContextManager,
    bq: &mut epg_db::BlockQueue,
    tq: &mut epg_db::TimescaleQueue,
    server: &mut Server,
    record: DemoRecord,
    now: u32,
) {
    match record {
        DemoRecord::Ai(ai) => {
            let cni = ai.cni;
            am.on_ai(cni, cx, bq, now);
            if let Some(ctx) = cx.get_mut(cni) {
                ctx.app_info = ai.clone();
                ctx.last_acq_time = now;
            }
            server.broadcast_block(cni, DumpBlockType::Ai, &encode_ai_block(&ai));
        }
        DemoRecord::Pi { cni, pi } => {
            if cx.get(cni).is_none() {
                cx.open(cni, FailMode::RetCreate);
            }
            let payload = encode_pi_block(&pi);
            if let Some(ctx) = cx.get_mut(cni) {
                ctx.insert_pi(pi.clone(), now);
                tq.add_pi(ctx, &pi, false);
            }
            server.broadcast_block(cni, DumpBlockType::Pi, &payload);
        }
    }
}

fn apply_acquired_block(
    cx: &mut ContextManager,
    server: &mut Server,
    tq: &mut epg_db::TimescaleQueue,
    current_cni: Option<u16>,
    block: epg_db::Block,
    now: u32,
) {
    let cni = match current_cni {
        Some(cni) => cni,
        None => return,
    };
    match block.kind {
        epg_db::BlockKind::Generic(epg_db::GenericBlockType::Ai) => {
            if let Some(ai) = epg_db::dump::decode_ai_block(&block.payload) {
                if let Some(ctx) = cx.get_mut(cni) {
                    ctx.app_info = ai.clone();
                    ctx.last_acq_time = now;
                }
                server.broadcast_block(cni, DumpBlockType::Ai, &block.payload);
            }
        }
        epg_db::BlockKind::Generic(epg_db::GenericBlockType::Pi) => {
            if let Some(pi) = epg_db::dump::decode_pi_block(&block.payload) {
                if let Some(ctx) = cx.get_mut(cni) {
                    ctx.insert_pi(pi.clone(), now);
                    tq.add_pi(ctx, &pi, false);
                }
                server.broadcast_block(cni, DumpBlockType::Pi, &block.payload);
            }
        }
        _ => {}
    }
}

fn build_stats_snapshot(stats: &Statistics, current_cni: Option<u16>, _now: u32) -> StatsSnapshot {
    StatsSnapshot {
        acq_mode: 0,
        cni: current_cni.unwrap_or(0),
        ai_min: stats.ai_min(),
        ai_avg: stats.ai_avg(),
        ai_max: stats.ai_max(),
        ttx_pkg_got: stats.ttx_pkg_got,
        ttx_pkg_lost: stats.ttx_pkg_lost,
        epg_blocks_got: stats.epg_blocks_got,
        epg_blocks_dropped: stats.epg_blocks_dropped,
        epg_pages_per_min: stats.pages_per_min(60),
    }
}
