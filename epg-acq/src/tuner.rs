//! Tuner control (TC): channel selection, forced-passive fallbacks, and
//! slicer escalation (spec §4.8).

use epg_core::TuneError;

use crate::driver::{SlicerType, TunerDriver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Passive,
    FollowUi,
    FollowMerged,
    Cyclic,
    External,
    Network,
    /// Transient: tuning was refused (§4.8).
    ForcedPassive(PassiveReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassiveReason {
    NoTuner,
    NoFreq,
    AccessDevice,
}

const SLICER_QUIET_PERIOD_SECS: u32 = 20;

pub struct TunerControl {
    pub mode: Mode,
    pub input_source: u32,
    pub slicer_type: SlicerType,
    pub auto_slicer: bool,
    last_channel_change: u32,
}

impl TunerControl {
    pub fn new(input_source: u32, auto_slicer: bool) -> TunerControl {
        TunerControl {
            mode: Mode::Passive,
            input_source,
            slicer_type: SlicerType::Simple,
            auto_slicer,
            last_channel_change: 0,
        }
    }

    /// Tunes to `freq`/`cni` via the driver, applying the forced-passive
    /// fallbacks of §4.8.
    pub fn tune(&mut self, driver: &mut dyn TunerDriver, freq: u32, cni: u16, now: u32) -> Option<PassiveReason> {
        if freq == 0 && cni != 0 {
            self.mode = Mode::ForcedPassive(PassiveReason::NoFreq);
            return Some(PassiveReason::NoFreq);
        }

        match driver.tune(self.input_source, freq) {
            Ok(result) if !result.is_tuner => {
                self.mode = Mode::ForcedPassive(PassiveReason::NoTuner);
                Some(PassiveReason::NoTuner)
            }
            Ok(result) if !result.ok => {
                self.mode = Mode::ForcedPassive(PassiveReason::AccessDevice);
                Some(PassiveReason::AccessDevice)
            }
            Ok(_) => {
                self.on_channel_change(driver, now);
                None
            }
            Err(TuneError::DeviceBusy) => {
                self.mode = Mode::ForcedPassive(PassiveReason::AccessDevice);
                Some(PassiveReason::AccessDevice)
            }
            Err(TuneError::NoTuner) => {
                self.mode = Mode::ForcedPassive(PassiveReason::NoTuner);
                Some(PassiveReason::NoTuner)
            }
            Err(TuneError::NoFreq) => {
                self.mode = Mode::ForcedPassive(PassiveReason::NoFreq);
                Some(PassiveReason::NoFreq)
            }
        }
    }

    fn on_channel_change(&mut self, driver: &mut dyn TunerDriver, now: u32) {
        self.last_channel_change = now;
        if self.auto_slicer {
            self.slicer_type = SlicerType::Simple;
            driver.select_slicer(self.slicer_type);
        }
    }

    /// After a 20s quiet period, if stream quality is poor and the
    /// current slicer isn't the best, escalate to the next slicer (§4.8).
    pub fn maybe_escalate_slicer(&mut self, driver: &mut dyn TunerDriver, stream_quality_ok: bool, now: u32) -> bool {
        if now.saturating_sub(self.last_channel_change) < SLICER_QUIET_PERIOD_SECS {
            return false;
        }
        if stream_quality_ok {
            return false;
        }
        match self.slicer_type.next() {
            Some(next) => {
                self.slicer_type = next;
                driver.select_slicer(next);
                true
            }
            None => false,
        }
    }
}
