//! Cycle scheduler, tuner control, and the top-level acquisition master
//! that ties them to the context cache and block/timescale queues
//! (spec §4.7, §4.8, §4.9).

pub mod cycle;
pub mod driver;
pub mod master;
pub mod stats;
pub mod tuner;

pub use cycle::{AcqMode, AdvanceOutcome, AiSample, CycleState, Phase, StopPhase};
pub use driver::{DecoderEvent, SlicerType, TeletextDecoder, TuneResult, TunerDriver};
pub use master::{AcqScope, AcquisitionMaster, AiOutcome, State as MasterState};
pub use stats::{Statistics, VpsPdcLabel};
pub use tuner::{Mode as TunerMode, PassiveReason, TunerControl};
