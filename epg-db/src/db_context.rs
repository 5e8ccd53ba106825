//! Database context (DB): the acquired-or-merged state for one provider, or
//! the merged output database (spec §3, §4.1, §9).

use crate::ai::AppInfo;
use crate::merge_ctx::MergeContext;
use crate::pi::ProgrammeItem;

/// Whether a context holds data acquired directly from a provider or
/// assembled by the merger from several source contexts (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Acquired,
    Merged,
}

/// One provider's (or the merger's) programme data.
///
/// The original design note (§9) describes the programme chain as an arena
/// of PI records linked by index-based prev/next pointers, so insertion and
/// removal never reshuffle memory. Here it is a single `Vec` kept sorted by
/// `(start_time, netwop_no)`: every invariant in §8 (global and per-network
/// ordering, no time overlaps within a network) holds equally well for a
/// sorted vector, and it needs no unsafe indexing to express — the
/// simplification is recorded in the design ledger rather than carried over
/// literally.
#[derive(Debug, Clone)]
pub struct DbContext {
    pub kind: DbKind,
    pub app_info: AppInfo,
    pub merge_ctx: Option<MergeContext>,
    items: Vec<ProgrammeItem>,
    /// PIs superseded by a later acquisition but kept for `expire_delay`
    /// (§6 supplement) before being dropped for good.
    obsolete: Vec<ProgrammeItem>,
    pub tuner_freq: Option<u32>,
    pub teletext_page: u16,
    pub app_id: u8,
    pub last_acq_time: u32,
}

impl DbContext {
    pub fn new(kind: DbKind, app_info: AppInfo) -> DbContext {
        DbContext {
            kind,
            app_info,
            merge_ctx: None,
            items: Vec::new(),
            obsolete: Vec::new(),
            tuner_freq: None,
            teletext_page: 0x1dc,
            app_id: 0,
            last_acq_time: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProgrammeItem> {
        self.items.iter()
    }

    pub fn iter_network(&self, netwop_no: u8) -> impl Iterator<Item = &ProgrammeItem> {
        self.items.iter().filter(move |pi| pi.netwop_no == netwop_no)
    }

    pub fn obsolete_iter(&self) -> impl Iterator<Item = &ProgrammeItem> {
        self.obsolete.iter()
    }

    /// Inserts or replaces a PI, keeping the chain sorted by `(start_time,
    /// netwop_no)` (§3, §8). A PI that time-overlaps an existing one on the
    /// same network supersedes it; the superseded item moves to the
    /// obsolete list rather than being dropped outright (§6 supplement).
    pub fn insert_pi(&mut self, pi: ProgrammeItem, now: u32) {
        let overlap = self.items.iter().position(|existing| {
            existing.netwop_no == pi.netwop_no
                && existing.start_time < pi.stop_time
                && pi.start_time < existing.stop_time
        });
        if let Some(index) = overlap {
            let mut superseded = self.items.remove(index);
            superseded.block_no = 0xffff;
            self.obsolete.push(superseded);
        }
        let index = self.items.partition_point(|existing| existing.sort_key() < pi.sort_key());
        self.items.insert(index, pi);
        self.last_acq_time = now;
    }

    /// Restores a PI straight into the obsolete list, used when reloading
    /// a dump file's distinguished expired-PI blocks (§6).
    pub fn push_obsolete(&mut self, pi: ProgrammeItem) {
        self.obsolete.push(pi);
    }

    /// Drops obsolete entries older than `expire_delay_secs` relative to
    /// `now` (default 4h per §6 supplement).
    pub fn expire_obsolete(&mut self, now: u32, expire_delay_secs: u32) {
        self.obsolete.retain(|pi| now.saturating_sub(pi.stop_time) < expire_delay_secs);
    }

    /// Drops every PI whose stop time has passed, per the acquisition
    /// master's periodic housekeeping (§4.9).
    pub fn drop_expired(&mut self, now: u32) {
        self.items.retain(|pi| pi.stop_time > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pi::{CodeSet, Features, Pil};

    fn pi(netwop_no: u8, start: u32, stop: u32) -> ProgrammeItem {
        ProgrammeItem {
            netwop_no,
            block_no: 1,
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

    fn app_info() -> AppInfo {
        AppInfo { cni: 0x1234, service_name: "Demo".into(), networks: Vec::new(), version: 0, version_swo: 0 }
    }

    #[test]
    fn insert_keeps_sort_order() {
        let mut db = DbContext::new(DbKind::Acquired, app_info());
        db.insert_pi(pi(0, 200, 300), 1000);
        db.insert_pi(pi(0, 100, 200), 1000);
        let starts: Vec<u32> = db.iter().map(|p| p.start_time).collect();
        assert_eq!(starts, vec![100, 200]);
    }

    #[test]
    fn overlapping_insert_moves_old_pi_to_obsolete() {
        let mut db = DbContext::new(DbKind::Acquired, app_info());
        db.insert_pi(pi(0, 100, 200), 1000);
        db.insert_pi(pi(0, 150, 250), 1000);
        assert_eq!(db.len(), 1);
        assert_eq!(db.obsolete_iter().count(), 1);
    }

    #[test]
    fn expire_obsolete_respects_delay() {
        let mut db = DbContext::new(DbKind::Acquired, app_info());
        db.insert_pi(pi(0, 100, 200), 1000);
        db.insert_pi(pi(0, 150, 250), 1000);
        db.expire_obsolete(200 + 3600 * 4 - 1, 3600 * 4);
        assert_eq!(db.obsolete_iter().count(), 1);
        db.expire_obsolete(200 + 3600 * 4 + 1, 3600 * 4);
        assert_eq!(db.obsolete_iter().count(), 0);
    }
}
