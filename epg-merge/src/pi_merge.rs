//! Builds one merged PI from a set of matched source PIs, per the
//! attribute-priority matrix (spec §4.6).

use epg_db::{AttributeClass, CodeSet, Features, MergeContext, MergeSources, Pil, ProgrammeItem};

/// One matched candidate: the index of the source database it came from
/// (an index into [`MergeContext::source_cnis`]) and the PI itself.
pub type Candidate<'a> = (u8, &'a ProgrammeItem);

fn pick_first<'a, T>(
    matched: &[Candidate<'a>],
    order: &[u8],
    get: impl Fn(&'a ProgrammeItem) -> Option<T>,
) -> Option<T> {
    for &src in order {
        if let Some(&(_, pi)) = matched.iter().find(|(idx, _)| *idx == src) {
            if let Some(value) = get(pi) {
                return Some(value);
            }
        }
    }
    None
}

/// Builds the merged PI for a matched set, anchored on `anchor`'s times.
/// Themes are set-unioned; the description is the form-feed-joined
/// concatenation of every non-empty source description in priority
/// order; every other attribute is supplied by the highest-priority
/// source that has a non-default value for its class (§4.6).
pub fn merge_matched(
    target_netwop_no: u8,
    anchor: &ProgrammeItem,
    matched: &[Candidate<'_>],
    merge_ctx: &MergeContext,
) -> ProgrammeItem {
    let title = pick_first(matched, merge_ctx.priority_order(AttributeClass::Title), |pi| {
        if pi.title.is_empty() { None } else { Some(pi.title.clone()) }
    })
    .unwrap_or_else(|| anchor.title.clone());

    let description = {
        let order = merge_ctx.priority_order(AttributeClass::Description);
        let mut parts = Vec::new();
        for &src in order {
            if let Some((_, pi)) = matched.iter().find(|(idx, _)| *idx == src) {
                if let Some(desc) = pi.description.as_ref().filter(|d| !d.is_empty()) {
                    parts.push(desc.as_str());
                }
            }
        }
        if parts.is_empty() { None } else { Some(parts.join("\u{0c}")) }
    };

    let parental_rating = pick_first(matched, merge_ctx.priority_order(AttributeClass::ParentalRating), |pi| {
        if pi.parental_rating == 0 { None } else { Some(pi.parental_rating) }
    })
    .unwrap_or(0);

    let editorial_rating = pick_first(matched, merge_ctx.priority_order(AttributeClass::EditorialRating), |pi| {
        if pi.editorial_rating == 0 { None } else { Some(pi.editorial_rating) }
    })
    .unwrap_or(0);

    let themes = merge_ctx
        .priority_order(AttributeClass::Themes)
        .iter()
        .filter_map(|src| matched.iter().find(|(idx, _)| idx == src))
        .fold(CodeSet::new(), |acc, (_, pi)| acc.union(&pi.themes));

    let sort_criteria = merge_ctx
        .priority_order(AttributeClass::SortCriteria)
        .iter()
        .filter_map(|src| matched.iter().find(|(idx, _)| idx == src))
        .fold(CodeSet::new(), |acc, (_, pi)| acc.union(&pi.sort_criteria));

    let features = merge_ctx
        .priority_order(AttributeClass::Features)
        .iter()
        .filter_map(|src| matched.iter().find(|(idx, _)| idx == src))
        .fold(Features::empty(), |acc, (_, pi)| acc.union(pi.features));

    let pil = pick_first(matched, merge_ctx.priority_order(AttributeClass::Pil), |pi| {
        if pi.pil.is_defined() { Some(pi.pil) } else { None }
    })
    .unwrap_or(Pil::NONE);

    let mut merge_sources = MergeSources::new();
    for (src, _) in matched {
        merge_sources.push(*src);
    }

    // A merged PI's version flag is cleared unless every matched source's
    // own flag was set, i.e. every contributing PI's version still matched
    // its source AI's version at merge time (§4.6).
    let version_ok = matched.iter().all(|(_, pi)| pi.version_ok);

    ProgrammeItem {
        netwop_no: target_netwop_no,
        block_no: anchor.block_no,
        start_time: anchor.start_time,
        stop_time: anchor.stop_time,
        parental_rating,
        editorial_rating,
        themes,
        sort_criteria,
        features,
        pil,
        title,
        description,
        merge_sources: Some(merge_sources),
        version_ok,
    }
}
