//! Acquisition master (AM): the top-level state machine dispatching BI/AI
//! callbacks and driving periodic housekeeping (spec §4.9).

use epg_db::{Block, BlockKind, BlockQueue, ContextManager, FailMode, GenericBlockType, TimescaleQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Off,
    WaitBi,
    WaitAi,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcqScope {
    /// Local acquisition: expects a BI block before AI (§4.9).
    Local,
    /// Network mode: the daemon guarantees BI was already consumed, so
    /// `WAIT_BI` is skipped entirely.
    Network,
}

const IDLE_DUMP_INTERVAL_SECS: u32 = 60;
const IDLE_STALE_AFTER_SETTLE_SECS: u32 = 60;

pub struct AcquisitionMaster {
    pub state: State,
    pub scope: AcqScope,
    pub current_cni: Option<u16>,
    pub app_id: u8,
    last_dump_time: u32,
    last_ai_time: u32,
    last_channel_change: u32,
    dirty: bool,
}

/// Outcome of dispatching an AI callback (§4.9), for the caller to act on
/// (switch the CX entry, trigger cycle scheduling, etc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiOutcome {
    AdoptedProvider,
    MergedIntoCurrent,
    ChannelChanged,
    Rejected,
}

impl AcquisitionMaster {
    pub fn new(scope: AcqScope) -> AcquisitionMaster {
        AcquisitionMaster {
            state: State::Off,
            scope,
            current_cni: None,
            app_id: 0,
            last_dump_time: 0,
            last_ai_time: 0,
            last_channel_change: 0,
            dirty: false,
        }
    }

    /// Initialises decoder, BQ and TQ and enters the first wait state
    /// (§4.9). The caller has already picked the initial provider (§4.7)
    /// and tuned (§4.8).
    pub fn start(&mut self, bq: &mut BlockQueue, tq: &mut TimescaleQueue, now: u32) {
        bq.clear();
        tq.clear();
        self.last_channel_change = now;
        self.state = match self.scope {
            AcqScope::Local => State::WaitBi,
            AcqScope::Network => State::WaitAi,
        };
    }

    /// BI callback: extracts and retains the application id; never
    /// persisted (§4.9).
    pub fn on_bi(&mut self, app_id: u8) {
        if self.state == State::WaitBi {
            self.app_id = app_id;
            self.state = State::WaitAi;
        }
    }

    /// AI callback dispatch per §4.9's four cases.
    pub fn on_ai(&mut self, cni: u16, cx: &mut ContextManager, bq: &mut BlockQueue, now: u32) -> AiOutcome {
        if cni == 0 {
            return AiOutcome::Rejected;
        }
        self.last_ai_time = now;
        self.dirty = true;

        match self.current_cni {
            None => {
                self.current_cni = Some(cni);
                cx.open(cni, FailMode::RetCreate);
                self.state = State::Running;
                AiOutcome::AdoptedProvider
            }
            Some(current) if current == cni => {
                self.state = State::Running;
                AiOutcome::MergedIntoCurrent
            }
            Some(_) => {
                self.current_cni = Some(cni);
                bq.clear();
                cx.open(cni, FailMode::RetCreate);
                self.last_channel_change = now;
                self.state = match self.scope {
                    AcqScope::Local => State::WaitBi,
                    AcqScope::Network => State::Running,
                };
                AiOutcome::ChannelChanged
            }
        }
    }

    /// Triggered by the decoder's page-header discontinuity detector
    /// (§4.9): resets stream state and optionally swaps the acquisition
    /// db back to the UI's selection.
    pub fn channel_change(&mut self, want_db_switch: bool, ui_selected_cni: Option<u16>, bq: &mut BlockQueue, now: u32) {
        bq.clear();
        if want_db_switch {
            self.current_cni = ui_selected_cni;
        }
        self.last_channel_change = now;
        self.last_ai_time = now;
        self.state = State::WaitBi;
    }

    /// Periodic idle tick (§4.9): dumps to disk every 60s if dirty, and
    /// reports whether the cycle should advance because no AI arrived
    /// within 60s of the channel settling.
    pub fn idle_tick(&mut self, cx: &mut ContextManager, now: u32) -> bool {
        if self.dirty && now.saturating_sub(self.last_dump_time) >= IDLE_DUMP_INTERVAL_SECS {
            if let Some(cni) = self.current_cni {
                let _ = cx.flush(cni);
            }
            self.last_dump_time = now;
            self.dirty = false;
        }

        let settled = now.saturating_sub(self.last_channel_change) >= IDLE_STALE_AFTER_SETTLE_SECS;
        let stale = now.saturating_sub(self.last_ai_time) >= IDLE_STALE_AFTER_SETTLE_SECS;
        settled && stale
    }

    /// Processes queued blocks per the three-phase policy of §4.9,
    /// applying queue-overflow backpressure at the 250-block threshold.
    /// Returns the BI/AI blocks that still need full decoding by the
    /// caller (this master only tracks phase gating, not block decoding).
    pub fn drain_phase(&self, bq: &mut BlockQueue) -> (Vec<Block>, bool) {
        let overflowing = bq.is_overflowing();
        let mut taken = Vec::new();
        match self.state {
            State::WaitBi => {
                while let Some(block) = bq.pop_by_kind(BlockKind::Generic(GenericBlockType::Bi)) {
                    taken.push(block);
                }
            }
            State::WaitAi => {
                while let Some(block) = bq.pop_by_kind(BlockKind::Generic(GenericBlockType::Ai)) {
                    taken.push(block);
                }
            }
            State::Running => {
                while let Some(block) = bq.pop() {
                    taken.push(block);
                }
            }
            State::Off => {}
        }
        (taken, overflowing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cx() -> ContextManager {
        ContextManager::new("/nonexistent/path/for/test")
    }

    #[test]
    fn start_enters_wait_bi_for_local_scope() {
        let mut am = AcquisitionMaster::new(AcqScope::Local);
        let mut bq = BlockQueue::new();
        let mut tq = TimescaleQueue::new();
        am.start(&mut bq, &mut tq, 0);
        assert_eq!(am.state, State::WaitBi);
    }

    #[test]
    fn network_scope_skips_wait_bi() {
        let mut am = AcquisitionMaster::new(AcqScope::Network);
        let mut bq = BlockQueue::new();
        let mut tq = TimescaleQueue::new();
        am.start(&mut bq, &mut tq, 0);
        assert_eq!(am.state, State::WaitAi);
    }

    #[test]
    fn first_ai_adopts_provider() {
        let mut am = AcquisitionMaster::new(AcqScope::Local);
        let mut bq = BlockQueue::new();
        let mut tq = TimescaleQueue::new();
        am.start(&mut bq, &mut tq, 0);
        am.on_bi(7);
        let mut cx = cx();
        let outcome = am.on_ai(0x1234, &mut cx, &mut bq, 10);
        assert_eq!(outcome, AiOutcome::AdoptedProvider);
        assert_eq!(am.state, State::Running);
        assert_eq!(am.current_cni, Some(0x1234));
    }

    #[test]
    fn ai_with_cni_zero_is_rejected() {
        let mut am = AcquisitionMaster::new(AcqScope::Local);
        let mut bq = BlockQueue::new();
        let mut cx = cx();
        assert_eq!(am.on_ai(0, &mut cx, &mut bq, 0), AiOutcome::Rejected);
    }

    #[test]
    fn different_cni_triggers_channel_change() {
        let mut am = AcquisitionMaster::new(AcqScope::Local);
        let mut bq = BlockQueue::new();
        let mut cx = cx();
        am.on_ai(0x1234, &mut cx, &mut bq, 0);
        let outcome = am.on_ai(0x5678, &mut cx, &mut bq, 5);
        assert_eq!(outcome, AiOutcome::ChannelChanged);
        assert_eq!(am.current_cni, Some(0x5678));
        assert_eq!(am.state, State::WaitBi);
    }

    #[test]
    fn idle_tick_reports_stale_after_60s_without_ai() {
        let mut am = AcquisitionMaster::new(AcqScope::Local);
        let mut cx = cx();
        am.last_channel_change = 0;
        am.last_ai_time = 0;
        assert!(!am.idle_tick(&mut cx, 30));
        assert!(am.idle_tick(&mut cx, 61));
    }

    #[test]
    fn drain_phase_only_takes_bi_blocks_in_wait_bi() {
        let mut am = AcquisitionMaster::new(AcqScope::Local);
        let mut bq = BlockQueue::new();
        bq.push(Block { kind: BlockKind::Generic(GenericBlockType::Bi), netwop_no: 0, page: 0, payload: Vec::new() });
        bq.push(Block { kind: BlockKind::Generic(GenericBlockType::Ai), netwop_no: 0, page: 0, payload: Vec::new() });
        let (taken, overflowing) = am.drain_phase(&mut bq);
        assert_eq!(taken.len(), 1);
        assert_eq!(bq.count(), 1);
        assert!(!overflowing);
    }
}
