//! Cycle scheduler (CY): per-provider phase progression (spec §4.7).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NowNext,
    Stream1,
    Stream2,
    Monitor,
}

/// Acquisition mode, determining the starting phase (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcqMode {
    Cyclic012,
    Cyclic02,
    Cyclic12,
    Cyclic2,
    FollowUi,
    FollowMerged,
}

impl AcqMode {
    pub fn starting_phase(self) -> Phase {
        match self {
            AcqMode::Cyclic012 | AcqMode::Cyclic02 => Phase::NowNext,
            AcqMode::Cyclic12 => Phase::Stream1,
            AcqMode::Cyclic2 | AcqMode::FollowUi | AcqMode::FollowMerged => Phase::Stream2,
        }
    }
}

/// What happens once a provider's final phase is exhausted (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPhase {
    StopAcquisition,
    StayInMonitor,
}

const VARIANCE_HISTORY_LEN: usize = 5;
const NOWNEXT_ELAPSED_SECS: u32 = 5 * 60;
const STREAM1_ELAPSED_SECS: u32 = 12 * 60;
const STREAM2_ELAPSED_SECS: u32 = 35 * 60;

/// Per-AI sample used to evaluate advance criteria and variance (§4.7).
#[derive(Debug, Clone, Copy, Default)]
pub struct AiSample {
    pub now_repetition_count: u32,
    pub ai_count: u32,
    pub stream1_quote_percent: u8,
    pub stream2_quote_percent: u8,
    pub average_repetition: f64,
    pub net_block_counts: [u32; 8],
    pub net_block_count_len: usize,
}

/// Per-provider cycle state, including the variance history ring (§3).
pub struct CycleState {
    pub phase: Phase,
    pub provider_index: usize,
    pub phase_start: u32,
    variance_history: Vec<f64>,
}

impl CycleState {
    pub fn new(mode: AcqMode) -> CycleState {
        CycleState { phase: mode.starting_phase(), provider_index: 0, phase_start: 0, variance_history: Vec::new() }
    }

    fn push_variance(&mut self, variance: f64) {
        if self.variance_history.len() >= VARIANCE_HISTORY_LEN {
            self.variance_history.remove(0);
        }
        self.variance_history.push(variance);
    }

    fn variance_is_stable(&self) -> bool {
        if self.variance_history.len() < VARIANCE_HISTORY_LEN {
            return false;
        }
        let max = self.variance_history.iter().cloned().fold(f64::MIN, f64::max);
        let min = self.variance_history.iter().cloned().fold(f64::MAX, f64::min);
        max - min < 0.01
    }

    /// Normalised standard deviation of per-network block counts against
    /// their mean (§4.7).
    fn sample_variance(sample: &AiSample) -> f64 {
        let n = sample.net_block_count_len;
        if n == 0 {
            return 0.0;
        }
        let counts = &sample.net_block_counts[..n];
        let mean = counts.iter().sum::<u32>() as f64 / n as f64;
        if mean == 0.0 {
            return 0.0;
        }
        let variance =
            counts.iter().map(|&c| (c as f64 - mean).powi(2)).sum::<f64>() / n as f64;
        variance.sqrt() / mean
    }

    /// Evaluates the current phase's advance criteria against a fresh AI
    /// sample and the elapsed time since the phase started; returns
    /// whether the scheduler should advance (§4.7 table).
    pub fn on_ai_sample(&mut self, sample: &AiSample, now: u32) -> bool {
        let variance = Self::sample_variance(sample);
        self.push_variance(variance);
        let elapsed = now.saturating_sub(self.phase_start);

        match self.phase {
            Phase::NowNext => {
                sample.now_repetition_count >= 2
                    || (sample.ai_count >= 5 && sample.now_repetition_count == 0)
                    || elapsed >= NOWNEXT_ELAPSED_SECS
            }
            Phase::Stream1 => {
                (sample.stream1_quote_percent >= 33 && variance < 0.25 && self.variance_is_stable())
                    || sample.average_repetition >= 1.1
                    || elapsed >= STREAM1_ELAPSED_SECS
            }
            Phase::Stream2 => {
                let combined_quote = sample.stream1_quote_percent.min(sample.stream2_quote_percent);
                (combined_quote >= 33 && variance < 0.25 && self.variance_is_stable())
                    || sample.average_repetition >= 1.1
                    || elapsed >= STREAM2_ELAPSED_SECS
            }
            Phase::Monitor => {
                let combined_quote = sample.stream1_quote_percent.min(sample.stream2_quote_percent);
                (combined_quote >= 33 && variance < 0.25 && self.variance_is_stable())
                    || sample.average_repetition >= 1.1
            }
        }
    }

    /// Steps to the next phase, or the next provider after wrapping, or
    /// loops in MONITOR forever per `stop_phase` (§4.7).
    pub fn advance(&mut self, provider_count: usize, stop_phase: StopPhase, now: u32) -> AdvanceOutcome {
        match self.phase {
            Phase::NowNext => {
                self.phase = Phase::Stream1;
                self.phase_start = now;
                self.variance_history.clear();
                AdvanceOutcome::NextPhase
            }
            Phase::Stream1 => {
                self.phase = Phase::Stream2;
                self.phase_start = now;
                self.variance_history.clear();
                AdvanceOutcome::NextPhase
            }
            Phase::Stream2 => {
                self.phase = Phase::Monitor;
                self.phase_start = now;
                self.variance_history.clear();
                AdvanceOutcome::NextPhase
            }
            Phase::Monitor => {
                if self.provider_index + 1 < provider_count {
                    self.provider_index += 1;
                    self.phase = Phase::NowNext;
                    self.phase_start = now;
                    self.variance_history.clear();
                    AdvanceOutcome::NextProvider
                } else {
                    match stop_phase {
                        StopPhase::StopAcquisition => AdvanceOutcome::Stop,
                        StopPhase::StayInMonitor => {
                            self.phase_start = now;
                            AdvanceOutcome::StayInMonitor
                        }
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    NextPhase,
    NextProvider,
    StayInMonitor,
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_phase_matches_mode() {
        assert_eq!(AcqMode::Cyclic012.starting_phase(), Phase::NowNext);
        assert_eq!(AcqMode::Cyclic12.starting_phase(), Phase::Stream1);
        assert_eq!(AcqMode::FollowUi.starting_phase(), Phase::Stream2);
    }

    #[test]
    fn nownext_advances_on_repetition_count() {
        let mut state = CycleState::new(AcqMode::Cyclic012);
        let sample = AiSample { now_repetition_count: 2, ..Default::default() };
        assert!(state.on_ai_sample(&sample, 10));
    }

    #[test]
    fn nownext_advances_on_elapsed_time() {
        let mut state = CycleState::new(AcqMode::Cyclic012);
        let sample = AiSample::default();
        assert!(!state.on_ai_sample(&sample, 10));
        assert!(state.on_ai_sample(&sample, NOWNEXT_ELAPSED_SECS + 1));
    }

    #[test]
    fn advance_wraps_providers_then_hits_stop_phase() {
        let mut state = CycleState::new(AcqMode::Cyclic2);
        state.phase = Phase::Monitor;
        state.provider_index = 0;
        let outcome = state.advance(1, StopPhase::StopAcquisition, 100);
        assert_eq!(outcome, AdvanceOutcome::Stop);
    }

    #[test]
    fn advance_moves_to_next_provider_before_stopping() {
        let mut state = CycleState::new(AcqMode::Cyclic2);
        state.phase = Phase::Monitor;
        let outcome = state.advance(3, StopPhase::StopAcquisition, 100);
        assert_eq!(outcome, AdvanceOutcome::NextProvider);
        assert_eq!(state.provider_index, 1);
        assert_eq!(state.phase, Phase::NowNext);
    }

    #[test]
    fn full_cycle_reaches_monitor_within_bounded_samples() {
        let mut state = CycleState::new(AcqMode::Cyclic012);
        let mut now = 0u32;
        let mut iterations = 0;
        while state.phase != Phase::Monitor && iterations < 20 {
            let sample = AiSample { now_repetition_count: 2, average_repetition: 2.0, ..Default::default() };
            if state.on_ai_sample(&sample, now) {
                state.advance(1, StopPhase::StayInMonitor, now);
            }
            now += 60;
            iterations += 1;
        }
        assert_eq!(state.phase, Phase::Monitor);
    }
}
