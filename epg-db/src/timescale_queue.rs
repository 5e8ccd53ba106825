//! Timescale queue (TQ): buffers per-network PI timing summaries until a
//! contiguous run can be flushed as `TSC_IND` (spec §4.4).

use std::collections::HashMap;
use std::convert::TryInto;

use crate::db_context::DbContext;
use crate::pi::ProgrammeItem;

crate::pi::bitflags_like! {
    /// Per-entry status bits, mirrored onto the wire byte-for-byte.
    pub struct TscFlags: u8 {
        const EXPIRED        = 0x01;
        const MISSING        = 0x02;
        const LAST           = 0x04;
        const DEFECTIVE      = 0x08;
        const CUR_VERSION    = 0x10;
        const HAS_SHORT_INFO = 0x40;
        const HAS_LONG_INFO  = 0x80;
    }
}

/// One `TSC_IND` entry: a PI (or a run of adjacent PI collapsed together)
/// summarized as an offset/duration pair relative to its buffer's
/// `base_time`, matching `epg_proto::message::TSC_ENTRY_SCHEMA` byte for
/// byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TscEntry {
    pub start_off_mins: u16,
    pub duration_mins: u16,
    pub netwop: u8,
    pub flags: TscFlags,
    pub block_idx: u32,
    pub concat_count: u16,
}

impl TscEntry {
    /// Host-order wire bytes, `epg_proto::message::TSC_ENTRY_LEN` long.
    pub fn to_wire_bytes(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[0..2].copy_from_slice(&self.start_off_mins.to_ne_bytes());
        out[2..4].copy_from_slice(&self.duration_mins.to_ne_bytes());
        out[4] = self.netwop;
        out[5] = self.flags.bits();
        out[6..10].copy_from_slice(&self.block_idx.to_ne_bytes());
        out[10..12].copy_from_slice(&self.concat_count.to_ne_bytes());
        out
    }

    /// Inverse of [`to_wire_bytes`](Self::to_wire_bytes): `bytes` must
    /// already be in host order (the transport layer swaps on receipt when
    /// the peer's endianness differs).
    pub fn from_wire_bytes(bytes: &[u8; 12]) -> TscEntry {
        TscEntry {
            start_off_mins: u16::from_ne_bytes([bytes[0], bytes[1]]),
            duration_mins: u16::from_ne_bytes([bytes[2], bytes[3]]),
            netwop: bytes[4],
            flags: TscFlags::from_bits_truncate(bytes[5]),
            block_idx: u32::from_ne_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
            concat_count: u16::from_ne_bytes([bytes[10], bytes[11]]),
        }
    }

    /// Splits a `TSC_IND` body into its entries; `None` if it isn't an
    /// exact multiple of the 12-byte wire entry.
    pub fn parse_body(body: &[u8]) -> Option<Vec<TscEntry>> {
        if body.len() % 12 != 0 {
            return None;
        }
        Some(
            body.chunks_exact(12)
                .map(|chunk| TscEntry::from_wire_bytes(chunk.try_into().unwrap()))
                .collect(),
        )
    }
}

/// Cap on entries buffered per network before the oldest are dropped
/// (§4.4: "at most 150 entries per network").
pub const TSC_BUFFER_CAP: usize = 150;

/// Per-network ring of recent timescale entries. `locked` marks a buffer
/// that has been handed to a forwarding session and must not be mutated
/// until that session acknowledges the flush (§4.4, §4.10).
#[derive(Debug, Default)]
pub struct TscBuffer {
    entries: Vec<TscEntry>,
    pub base_time: u32,
    pub locked: bool,
}

impl TscBuffer {
    /// Appends one PI's timing, collapsing it into the previous entry when
    /// it's an immediate, same-network, same-flags continuation (§4.4:
    /// "adjacent identical-status entries are concatenated").
    fn push_merging(&mut self, start_time: u32, stop_time: u32, netwop: u8, flags: TscFlags, block_idx: u32) {
        if self.entries.is_empty() {
            self.base_time = start_time;
        }
        let start_off_mins = mins_since(self.base_time, start_time);
        let duration_mins = mins_since(start_time, stop_time);

        // `LAST` is a positional marker (is this the newest known PI on the
        // network?), not a content attribute, so it's excluded from the
        // match test below and simply unioned onto whichever entry ends up
        // newest: two content-identical PI shouldn't split into separate
        // entries just because only the second one currently holds it.
        let content_flags = |f: TscFlags| TscFlags::from_bits_truncate(f.bits() & !TscFlags::LAST.bits());

        if let Some(last) = self.entries.last_mut() {
            let last_stop = self.base_time as u64
                + (last.start_off_mins as u64 + last.duration_mins as u64) * 60;
            if last.netwop == netwop
                && content_flags(last.flags) == content_flags(flags)
                && last_stop == start_time as u64
            {
                last.duration_mins = last.duration_mins.saturating_add(duration_mins);
                last.concat_count = last.concat_count.saturating_add(1);
                last.flags = last.flags.union(flags);
                return;
            }
        }

        if self.entries.len() >= TSC_BUFFER_CAP {
            self.entries.remove(0);
        }
        self.entries.push(TscEntry {
            start_off_mins,
            duration_mins,
            netwop,
            flags,
            block_idx,
            concat_count: 1,
        });
    }

    pub fn entries(&self) -> &[TscEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn drain(&mut self) -> Vec<TscEntry> {
        std::mem::take(&mut self.entries)
    }
}

fn mins_since(base: u32, t: u32) -> u16 {
    (t.saturating_sub(base) / 60).min(u16::MAX as u32) as u16
}

/// Keeps one [`TscBuffer`] per network, keyed by `netwop_no`.
#[derive(Debug, Default)]
pub struct TimescaleQueue {
    buffers: HashMap<u8, TscBuffer>,
}

impl TimescaleQueue {
    pub fn new() -> TimescaleQueue {
        TimescaleQueue::default()
    }

    /// Derives this PI's status flags against `dbc` and folds it into its
    /// network's buffer. `stream` distinguishes the normal vs. SWO PI
    /// stream but doesn't otherwise change how an entry is built, since
    /// `ProgrammeItem` already carries a single resolved `version_ok` bit
    /// for whichever stream produced it.
    pub fn add_pi(&mut self, dbc: &DbContext, pi: &ProgrammeItem, _stream: bool) {
        if !pi.has_valid_times() {
            let buffer = self.buffers.entry(pi.netwop_no).or_default();
            if !buffer.locked {
                buffer.push_merging(pi.start_time, pi.start_time, pi.netwop_no, TscFlags::DEFECTIVE, pi.block_no as u32);
            }
            return;
        }

        let mut flags = TscFlags::empty();
        if pi.stop_time <= dbc.last_acq_time {
            flags.insert(TscFlags::EXPIRED);
        }
        if pi.version_ok {
            flags.insert(TscFlags::CUR_VERSION);
        }
        if !pi.title.is_empty() {
            flags.insert(TscFlags::HAS_SHORT_INFO);
        }
        if pi.description.is_some() {
            flags.insert(TscFlags::HAS_LONG_INFO);
        }

        // Chain neighbors, approximated by time rather than identity since a
        // PI handed in here may or may not already be linked into `dbc`.
        let later_exists = dbc
            .iter_network(pi.netwop_no)
            .any(|other| other.start_time > pi.start_time);
        if !later_exists {
            flags.insert(TscFlags::LAST);
        }
        let prev_stop = dbc
            .iter_network(pi.netwop_no)
            .filter(|other| other.stop_time <= pi.start_time)
            .map(|other| other.stop_time)
            .max();
        let gap_before = match prev_stop {
            Some(stop) => stop < pi.start_time,
            None => pi.start_time > 0,
        };
        if gap_before {
            flags.insert(TscFlags::MISSING);
        }

        let buffer = self.buffers.entry(pi.netwop_no).or_default();
        if buffer.locked {
            return;
        }
        buffer.push_merging(pi.start_time, pi.stop_time, pi.netwop_no, flags, pi.block_no as u32);
    }

    /// Rebuilds every network's buffer from `dbc`'s full PI chain, in
    /// `(start_time, netwop_no)` order (`DbContext::iter`'s natural order),
    /// used when timescale forwarding is (re)enabled mid-acquisition.
    pub fn add_all(&mut self, dbc: &DbContext) {
        for pi in dbc.iter() {
            self.add_pi(dbc, pi, false);
        }
    }

    pub fn buffer(&self, netwop_no: u8) -> Option<&TscBuffer> {
        self.buffers.get(&netwop_no)
    }

    pub fn has_elems(&self) -> bool {
        self.buffers.values().any(|b| !b.is_empty())
    }

    /// Locks `netwop_no`'s buffer and returns its entries for forwarding;
    /// the buffer stays locked until [`unlock`](Self::unlock) is called
    /// once the forwarding session acknowledges receipt.
    pub fn pop_buffer(&mut self, netwop_no: u8) -> Option<Vec<TscEntry>> {
        let buffer = self.buffers.get_mut(&netwop_no)?;
        if buffer.locked || buffer.is_empty() {
            return None;
        }
        buffer.locked = true;
        Some(buffer.drain())
    }

    /// Pops every network with pending entries, for batching one `TSC_IND`
    /// burst across all networks (§4.4).
    pub fn pop_all(&mut self) -> Vec<(u8, Vec<TscEntry>)> {
        let netwops: Vec<u8> = self
            .buffers
            .iter()
            .filter(|(_, b)| !b.locked && !b.is_empty())
            .map(|(&n, _)| n)
            .collect();
        netwops
            .into_iter()
            .filter_map(|n| self.pop_buffer(n).map(|entries| (n, entries)))
            .collect()
    }

    pub fn unlock(&mut self, netwop_no: u8) {
        if let Some(buffer) = self.buffers.get_mut(&netwop_no) {
            buffer.locked = false;
        }
    }

    pub fn unlock_all(&mut self) {
        for buffer in self.buffers.values_mut() {
            buffer.locked = false;
        }
    }

    /// Called when a network's CNI is reassigned (channel retune onto a
    /// different provider): stale timing entries no longer apply (§4.4).
    pub fn clear_network(&mut self, netwop_no: u8) {
        self.buffers.remove(&netwop_no);
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AppInfo;
    use crate::db_context::DbKind;
    use crate::pi::{CodeSet, Features, Pil};

    fn ai() -> AppInfo {
        AppInfo { cni: 0, service_name: String::new(), networks: Vec::new(), version: 0, version_swo: 0 }
    }

    fn pi(netwop_no: u8, start: u32, stop: u32, block_no: u16) -> ProgrammeItem {
        ProgrammeItem {
            netwop_no,
            block_no,
            start_time: start,
            stop_time: stop,
            parental_rating: 0,
            editorial_rating: 0,
            themes: CodeSet::new(),
            sort_criteria: CodeSet::new(),
            features: Features::empty(),
            pil: Pil::NONE,
            title: "Show".into(),
            description: None,
            merge_sources: None,
            version_ok: true,
        }
    }

    #[test]
    fn adjacent_same_status_entries_are_concatenated() {
        let mut dbc = DbContext::new(DbKind::Acquired, ai());
        dbc.insert_pi(pi(0, 0, 1800, 1), 0);
        dbc.insert_pi(pi(0, 1800, 3600, 2), 0);
        let mut q = TimescaleQueue::new();
        q.add_all(&dbc);
        let entries = q.buffer(0).unwrap().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].duration_mins, 60);
        assert_eq!(entries[0].concat_count, 2);
    }

    #[test]
    fn gap_between_entries_starts_a_new_entry_and_sets_missing() {
        let mut dbc = DbContext::new(DbKind::Acquired, ai());
        dbc.insert_pi(pi(0, 0, 1800, 1), 0);
        dbc.insert_pi(pi(0, 3600, 5400, 2), 0);
        let mut q = TimescaleQueue::new();
        q.add_all(&dbc);
        let entries = q.buffer(0).unwrap().entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[1].flags.contains(TscFlags::MISSING));
    }

    #[test]
    fn buffer_caps_at_150_entries_fifo() {
        let mut dbc = DbContext::new(DbKind::Acquired, ai());
        let mut q = TimescaleQueue::new();
        for i in 0..(TSC_BUFFER_CAP + 10) {
            let start = (i as u32) * 7200;
            let pi = pi(0, start, start + 1800, i as u16);
            dbc.insert_pi(pi.clone(), 0);
            q.add_pi(&dbc, &pi, false);
        }
        assert_eq!(q.buffer(0).unwrap().len(), TSC_BUFFER_CAP);
    }

    #[test]
    fn locked_buffer_rejects_new_entries_until_unlocked() {
        let mut dbc = DbContext::new(DbKind::Acquired, ai());
        let mut q = TimescaleQueue::new();
        let a = pi(1, 0, 1800, 1);
        dbc.insert_pi(a.clone(), 0);
        q.add_pi(&dbc, &a, false);
        let popped = q.pop_buffer(1).unwrap();
        assert_eq!(popped.len(), 1);

        let b = pi(1, 7200, 9000, 2);
        dbc.insert_pi(b.clone(), 0);
        q.add_pi(&dbc, &b, false);
        assert!(q.buffer(1).unwrap().is_empty());

        q.unlock(1);
        q.add_pi(&dbc, &b, false);
        assert_eq!(q.buffer(1).unwrap().len(), 1);
    }

    #[test]
    fn clear_network_drops_its_buffer() {
        let mut dbc = DbContext::new(DbKind::Acquired, ai());
        let mut q = TimescaleQueue::new();
        let a = pi(2, 0, 1800, 1);
        dbc.insert_pi(a.clone(), 0);
        q.add_pi(&dbc, &a, false);
        q.clear_network(2);
        assert!(q.buffer(2).is_none());
    }

    #[test]
    fn wire_bytes_are_twelve_bytes_wide() {
        // Matches epg_proto::message::TSC_ENTRY_LEN (2+2+1+1+4+2).
        let entry = TscEntry {
            start_off_mins: 10,
            duration_mins: 30,
            netwop: 0,
            flags: TscFlags::CUR_VERSION,
            block_idx: 7,
            concat_count: 1,
        };
        assert_eq!(entry.to_wire_bytes().len(), 12);
    }

    #[test]
    fn entry_round_trips_through_wire_bytes() {
        let entry = TscEntry {
            start_off_mins: 120,
            duration_mins: 45,
            netwop: 3,
            flags: TscFlags::LAST | TscFlags::HAS_SHORT_INFO,
            block_idx: 0xdead,
            concat_count: 2,
        };
        let bytes = entry.to_wire_bytes();
        assert_eq!(TscEntry::from_wire_bytes(&bytes), entry);
    }

    #[test]
    fn parse_body_splits_concatenated_entries() {
        let a = TscEntry { start_off_mins: 0, duration_mins: 30, netwop: 0, flags: TscFlags::empty(), block_idx: 1, concat_count: 1 };
        let b = TscEntry { start_off_mins: 30, duration_mins: 15, netwop: 1, flags: TscFlags::MISSING, block_idx: 2, concat_count: 1 };
        let mut body = Vec::new();
        body.extend_from_slice(&a.to_wire_bytes());
        body.extend_from_slice(&b.to_wire_bytes());
        assert_eq!(TscEntry::parse_body(&body).unwrap(), vec![a, b]);
        assert!(TscEntry::parse_body(&body[..body.len() - 1]).is_none());
    }
}
