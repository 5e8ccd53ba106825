//! Incremental re-merge when a new AI arrives from one source (spec §4.6):
//! only the networks that source contributes are regenerated; everything
//! else in the global chain is left untouched.

use epg_db::{DbContext, MergeContext, NetworkMapping, ProgrammeItem};

use crate::network_merge::{assemble_global, merge_network};

/// Which merged network indices source `source_idx` contributes to.
pub fn affected_networks(network_mappings: &[NetworkMapping], source_idx: usize, merged_network_count: usize) -> Vec<usize> {
    (0..merged_network_count)
        .filter(|&idx| network_mappings[source_idx].get(idx).is_some())
        .collect()
}

/// Re-merges only `affected` networks and replaces their chain tails in
/// `global`, leaving PI belonging to every other network in place.
pub fn reapply_networks(
    global: &mut Vec<ProgrammeItem>,
    sources: &[&DbContext],
    network_mappings: &[NetworkMapping],
    merge_ctx: &MergeContext,
    affected: &[usize],
) {
    let unaffected: Vec<ProgrammeItem> =
        global.drain(..).filter(|pi| !affected.contains(&(pi.netwop_no as usize))).collect();

    let mut chains: Vec<Vec<ProgrammeItem>> = vec![unaffected];
    for &netwop_idx in affected {
        chains.push(merge_network(sources, network_mappings, merge_ctx, netwop_idx as u8, netwop_idx));
    }

    *global = assemble_global(chains);
}

/// Clears the "version ok" bit on every merged PI whose source descriptor
/// list contains `source_idx` (§4.6), without rebuilding the chain: used
/// when a source's AI version advances but no structural re-merge is
/// otherwise warranted yet.
pub fn clear_version_ok_for_source(global: &mut [ProgrammeItem], source_idx: u8) {
    for pi in global.iter_mut() {
        let contributed = pi.merge_sources.as_ref().map_or(false, |s| s.contains(source_idx));
        if contributed {
            pi.version_ok = false;
        }
    }
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

    #[test]
    fn affected_networks_lists_only_those_the_source_maps() {
        let mut mapping_0 = NetworkMapping::new(2);
        mapping_0.set(0, 0);
        let mapping_1 = NetworkMapping::new(2);
        let mappings = vec![mapping_0, mapping_1];
        assert_eq!(affected_networks(&mappings, 0, 2), vec![0]);
        assert_eq!(affected_networks(&mappings, 1, 2), Vec::<usize>::new());
    }

    #[test]
    fn reapply_leaves_untouched_networks_alone() {
        let mut global = vec![pi(0, 1000, 2000, "Net0 Show"), pi(1, 1500, 2500, "Net1 Show")];
        let source = DbContext::new(
            DbKind::Acquired,
            AppInfo { cni: 0, service_name: String::new(), networks: Vec::new(), version: 0, version_swo: 0 },
        );
        let mapping = NetworkMapping::new(2);
        let merge_ctx = MergeContext::new(vec![1]);
        reapply_networks(&mut global, &[&source], &[mapping], &merge_ctx, &[0]);
        assert!(global.iter().any(|pi| pi.title == "Net1 Show"));
        assert!(!global.iter().any(|pi| pi.title == "Net0 Show"));
    }

    #[test]
    fn clear_version_ok_only_affects_pi_sourced_from_given_index() {
        let mut global = vec![pi(0, 1000, 2000, "From source 0 and 1"), pi(0, 2000, 3000, "From source 1 only")];
        global[0].merge_sources = {
            let mut s = epg_db::MergeSources::new();
            s.push(0);
            s.push(1);
            Some(s)
        };
        global[1].merge_sources = {
            let mut s = epg_db::MergeSources::new();
            s.push(1);
            Some(s)
        };
        global[0].version_ok = true;
        global[1].version_ok = true;

        clear_version_ok_for_source(&mut global, 0);

        assert!(!global[0].version_ok, "PI sourced in part from index 0 must be marked stale");
        assert!(global[1].version_ok, "PI never sourced from index 0 must be left alone");
    }
}
