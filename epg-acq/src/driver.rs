//! Driver boundary traits (spec §6): the tuner hardware and the teletext
//! packet decoder are external collaborators, not specified here beyond
//! their signatures. `FakeTuner`/`FakeDecoder` in this crate's tests are
//! the only stand-ins; no real VBI or decoding code lives in this crate.

use epg_core::TuneError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlicerType {
    Simple,
    Fullres,
    Digital,
}

impl SlicerType {
    /// Escalation order used by tuner control (§4.8): simplest first.
    pub const ORDER: [SlicerType; 3] = [SlicerType::Simple, SlicerType::Fullres, SlicerType::Digital];

    pub fn next(self) -> Option<SlicerType> {
        let pos = Self::ORDER.iter().position(|&s| s == self)?;
        Self::ORDER.get(pos + 1).copied()
    }
}

/// Result of a tune attempt (§4.8): whether it succeeded and whether the
/// selected input is a tuner at all.
#[derive(Debug, Clone, Copy)]
pub struct TuneResult {
    pub ok: bool,
    pub is_tuner: bool,
}

/// The VBI/tuner hardware boundary (§6).
pub trait TunerDriver {
    fn configure(&mut self, card_idx: u32, input: u32, priority: u8) -> Result<(), TuneError>;
    fn tune(&mut self, input: u32, freq: u32) -> Result<TuneResult, TuneError>;
    fn query_channel(&self) -> (u32, u32, bool);
    fn select_slicer(&mut self, slicer: SlicerType);
    fn start_acq(&mut self) -> Result<(), TuneError>;
    fn stop_acq(&mut self);
    fn check_card_params(&self, card_idx: u32) -> bool;
    fn query_channel_token(&self) -> bool;
}

/// An event the decoder reports to the acquisition master (§9 design note:
/// a stream of events rather than embedded function-pointer callbacks).
#[derive(Debug, Clone)]
pub enum DecoderEvent {
    Bi { app_id: u8 },
    Ai { cni: u16 },
    ChannelChange,
    VpsPdc { cni: u16, pil: u32 },
}

/// The teletext packet decoder boundary (§6).
pub trait TeletextDecoder {
    fn start(&mut self, page: u16, app_id: u8, wait_for_ai: bool);
    fn stop(&mut self);
    /// Processes pending packets, returning decoder events observed.
    fn process_packets(&mut self) -> Vec<DecoderEvent>;
    fn check_slicer_quality(&self) -> bool;
    fn get_mip_page_no(&self) -> Option<u16>;
    fn get_cni_and_pil(&self) -> Option<(u16, u32)>;
}
