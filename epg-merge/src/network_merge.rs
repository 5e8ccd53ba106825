//! Per-network and global merge assembly (spec §4.6).

use epg_db::{DbContext, MergeContext, NetworkMapping, ProgrammeItem};

use crate::match_predicate::matches as pi_matches;
use crate::pi_merge::{merge_matched, Candidate};

struct Cursor<'a> {
    items: Vec<&'a ProgrammeItem>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn front(&self) -> Option<&'a ProgrammeItem> {
        self.items.get(self.pos).copied()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }
}

/// Streams one target network's merged PI chain from its sources, per the
/// min-selection walk and conflict checks of §4.6.
pub fn merge_network(
    sources: &[&DbContext],
    network_mappings: &[NetworkMapping],
    merge_ctx: &MergeContext,
    target_netwop_no: u8,
    merged_network_index: usize,
) -> Vec<ProgrammeItem> {
    let mut cursors: Vec<Cursor> = sources
        .iter()
        .zip(network_mappings.iter())
        .map(|(db, mapping)| {
            let items = match mapping.get(merged_network_index) {
                Some(source_netwop) => db.iter_network(source_netwop).collect(),
                None => Vec::new(),
            };
            Cursor { items, pos: 0 }
        })
        .collect();

    let mut output = Vec::new();
    let mut previous_stop: Option<u32> = None;

    loop {
        let anchor_source = cursors
            .iter()
            .enumerate()
            .filter_map(|(idx, c)| c.front().map(|pi| (idx, pi.start_time)))
            .min_by_key(|&(_, start)| start)
            .map(|(idx, _)| idx);

        let anchor_idx = match anchor_source {
            Some(idx) => idx,
            None => break,
        };
        let anchor = cursors[anchor_idx].front().expect("anchor source has a front item");

        let mut matched_items: Vec<ProgrammeItem> = vec![anchor.clone()];
        let mut matched_sources: Vec<u8> = vec![anchor_idx as u8];
        cursors[anchor_idx].advance();

        for (idx, cursor) in cursors.iter_mut().enumerate() {
            if idx == anchor_idx {
                continue;
            }
            if let Some(candidate) = cursor.front() {
                if pi_matches(anchor, candidate) {
                    matched_items.push(candidate.clone());
                    matched_sources.push(idx as u8);
                    cursor.advance();
                }
            }
        }

        let matched: Vec<Candidate<'_>> =
            matched_sources.iter().zip(matched_items.iter()).map(|(&s, pi)| (s, pi)).collect();
        let merged = merge_matched(target_netwop_no, anchor, &matched, merge_ctx);

        let conflicts_with_previous = previous_stop.map_or(false, |stop| merged.start_time < stop);

        let min_matched_priority = matched_sources.iter().copied().min().unwrap_or(0);
        let conflicts_with_higher_priority = cursors.iter().enumerate().any(|(idx, cursor)| {
            (idx as u8) < min_matched_priority
                && cursor.front().map_or(false, |pi| pi.start_time < merged.stop_time)
        });

        if !conflicts_with_previous && !conflicts_with_higher_priority {
            previous_stop = Some(merged.stop_time);
            output.push(merged);
        }
    }

    output
}

/// Combines per-network merged chains into one global start-time-ordered
/// chain by repeated min-selection across heads (§4.6).
pub fn assemble_global(mut per_network: Vec<Vec<ProgrammeItem>>) -> Vec<ProgrammeItem> {
    let mut output = Vec::new();
    loop {
        let pick = per_network
            .iter()
            .enumerate()
            .filter(|(_, chain)| !chain.is_empty())
            .min_by_key(|(_, chain)| chain[0].sort_key())
            .map(|(idx, _)| idx);
        match pick {
            Some(idx) => output.push(per_network[idx].remove(0)),
            None => break,
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use epg_db::{AppInfo, CodeSet, DbKind, Features, Pil};

    fn pi(netwop_no: u8, start: u32, stop: u32, title: &str) -> ProgrammeItem {
        ProgrammeItem {
            netwop_no,
            block_no: 0,
            start_time: start,
            stop_time: stop,
            parental_rating: 0,
            editorial_rating: 0,
            themes: CodeSet::new(),
            sort_criteria: CodeSet::new(),
            features: Features::empty(),
            pil: Pil::NONE,
            title: title.into(),
            description: None,
            merge_sources: None,
            version_ok: true,
        }
    }

    fn db_with(items: Vec<ProgrammeItem>) -> DbContext {
        let mut db = DbContext::new(
            DbKind::Acquired,
            AppInfo { cni: 0, service_name: String::new(), networks: Vec::new(), version: 0, version_swo: 0 },
        );
        for item in items {
            let stop_time = item.stop_time;
            db.insert_pi(item, stop_time);
        }
        db
    }

    #[test]
    fn merges_matching_items_from_two_sources() {
        let source_a = db_with(vec![pi(0, 1000, 2000, "Evening News")]);
        let source_b = db_with(vec![pi(0, 1000, 2000, "Evening News")]);
        let merge_ctx = MergeContext::new(vec![1, 2]);
        let mut mapping_a = NetworkMapping::new(1);
        mapping_a.set(0, 0);
        let mut mapping_b = NetworkMapping::new(1);
        mapping_b.set(0, 0);

        let merged =
            merge_network(&[&source_a, &source_b], &[mapping_a, mapping_b], &merge_ctx, 0, 0);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].merge_sources.unwrap().as_slice(), &[0, 1]);
    }

    #[test]
    fn non_overlapping_items_both_survive() {
        let source_a = db_with(vec![pi(0, 1000, 2000, "Morning Show")]);
        let source_b = db_with(vec![pi(0, 5000, 6000, "Late Show")]);
        let merge_ctx = MergeContext::new(vec![1, 2]);
        let mut mapping_a = NetworkMapping::new(1);
        mapping_a.set(0, 0);
        let mut mapping_b = NetworkMapping::new(1);
        mapping_b.set(0, 0);

        let merged =
            merge_network(&[&source_a, &source_b], &[mapping_a, mapping_b], &merge_ctx, 0, 0);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].title, "Morning Show");
        assert_eq!(merged[1].title, "Late Show");
    }

    #[test]
    fn global_assembly_interleaves_networks_by_start_time() {
        let chain_a = vec![pi(0, 1000, 2000, "A1"), pi(0, 3000, 4000, "A2")];
        let chain_b = vec![pi(1, 1500, 2500, "B1")];
        let global = assemble_global(vec![chain_a, chain_b]);
        let titles: Vec<&str> = global.iter().map(|pi| pi.title.as_str()).collect();
        assert_eq!(titles, vec!["A1", "B1", "A2"]);
    }
}
