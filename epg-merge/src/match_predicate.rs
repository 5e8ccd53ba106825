//! The PI match predicate used by the per-network merge (spec §4.6).

use epg_db::ProgrammeItem;

const HALF_OVERLAP_SLACK_SECS: u32 = 5 * 60;
const XMLTV_SHORT_RUNTIME_SECS: u32 = 1;
const XMLTV_START_SLACK_SECS: u32 = 20 * 60;

fn abs_diff(a: u32, b: u32) -> u32 {
    if a > b { a - b } else { b - a }
}

/// Case-insensitive comparison of two titles up to a prefix that ends at
/// a non-alphanumeric character in the longer string — so "News" matches
/// "News: Headlines" but not "Newsflash" (§4.6).
fn titles_match_prefix(a: &str, b: &str) -> bool {
    let (shorter, longer) = if a.chars().count() <= b.chars().count() { (a, b) } else { (b, a) };
    let shorter_lower: Vec<char> = shorter.to_lowercase().chars().collect();
    let longer_chars: Vec<char> = longer.chars().collect();
    if longer_chars.len() < shorter_lower.len() {
        return false;
    }
    let longer_prefix_lower: Vec<char> =
        longer_chars[..shorter_lower.len()].iter().collect::<String>().to_lowercase().chars().collect();
    if shorter_lower != longer_prefix_lower {
        return false;
    }
    match longer_chars.get(shorter_lower.len()) {
        Some(next) => !next.is_alphanumeric(),
        None => true,
    }
}

/// True if, scanning both titles case-insensitively from the start, one
/// string is entirely consumed before a mismatching character is found —
/// i.e. one title is a literal prefix of the other, with no requirement
/// on what (if anything) follows in the longer one.
fn one_title_is_prefix_of_other(a: &str, b: &str) -> bool {
    let mut ca = a.chars().flat_map(char::to_lowercase);
    let mut cb = b.chars().flat_map(char::to_lowercase);
    loop {
        match (ca.next(), cb.next()) {
            (Some(x), Some(y)) => {
                if x != y {
                    return false;
                }
            }
            _ => return true,
        }
    }
}

/// Whether `a` and `b` describe the same broadcast occurrence (§4.6):
/// exact time match, fuzzy overlap-plus-title match, or the XMLTV
/// missing-stop-time special case.
pub fn matches(a: &ProgrammeItem, b: &ProgrammeItem) -> bool {
    if a.start_time == b.start_time && a.stop_time == b.stop_time {
        return true;
    }

    let a_runtime = a.stop_time.saturating_sub(a.start_time);
    let b_runtime = b.stop_time.saturating_sub(b.start_time);
    let (shorter, longer) = if a_runtime <= b_runtime { (a_runtime, b_runtime) } else { (b_runtime, a_runtime) };

    if shorter == XMLTV_SHORT_RUNTIME_SECS {
        return abs_diff(a.start_time, b.start_time) < XMLTV_START_SLACK_SECS
            && titles_match_prefix(&a.title, &b.title);
    }

    let overlap_start = a.start_time.max(b.start_time);
    let overlap_stop = a.stop_time.min(b.stop_time);
    let overlap = overlap_stop.saturating_sub(overlap_start);

    // Must overlap by at least half the longer runtime, and the two
    // runtimes must not differ by more than a factor of 1.5 (§4.6). Only
    // once that gate passes do we even look at the titles.
    let overlap_gate = shorter > 0 && 2 * overlap > longer && 2 * longer < 3 * shorter;
    if !overlap_gate {
        return false;
    }

    if titles_match_prefix(&a.title, &b.title) {
        return true;
    }

    // Borderline case: one title is a prefix of the other but doesn't end
    // at a word boundary (so `titles_match_prefix` rejected it) — accept
    // it anyway if both endpoints are very close.
    one_title_is_prefix_of_other(&a.title, &b.title)
        && abs_diff(a.start_time, b.start_time) <= HALF_OVERLAP_SLACK_SECS
        && abs_diff(a.stop_time, b.stop_time) <= HALF_OVERLAP_SLACK_SECS
}

#[cfg(test)]
mod tests {
    use super::*;
    use epg_db::{CodeSet, Features, Pil};

    fn pi(start: u32, stop: u32, title: &str) -> ProgrammeItem {
        ProgrammeItem {
            netwop_no: 0,
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
    fn exact_time_match() {
        assert!(matches(&pi(1000, 2000, "A"), &pi(1000, 2000, "B")));
    }

    #[test]
    fn fuzzy_overlap_with_matching_title_prefix() {
        let a = pi(1000, 2000, "Evening News");
        let b = pi(1100, 2100, "Evening News: Extended");
        assert!(matches(&a, &b));
    }

    #[test]
    fn different_titles_do_not_match_on_overlap_alone() {
        let a = pi(1000, 2000, "Evening News");
        let b = pi(1400, 2400, "Newsflash");
        assert!(!matches(&a, &b));
    }

    #[test]
    fn xmltv_missing_stop_time_special_case() {
        let a = pi(1000, 1001, "Weather");
        let b = pi(1000 + 15 * 60, 2000, "Weather");
        assert!(matches(&a, &b));
        let c = pi(1000 + 25 * 60, 1000 + 25 * 60 + 1, "Weather");
        assert!(!matches(&a, &c));
    }

    #[test]
    fn completely_different_titles_never_match_even_with_near_full_overlap() {
        let a = pi(1000, 10_000, "Long Documentary");
        let b = pi(1100, 10_050, "Completely Different Name");
        assert!(!matches(&a, &b));
    }

    #[test]
    fn close_times_rescue_a_title_prefix_that_misses_the_word_boundary() {
        // "News" is a prefix of "Newsflash", but the next character ('f')
        // is alphanumeric, so `titles_match_prefix` alone would reject it.
        let a = pi(1000, 2000, "News");
        let b = pi(1100, 2000, "Newsflash");
        assert!(matches(&a, &b));
    }

    #[test]
    fn prefix_fallback_still_requires_close_times() {
        // Same overlap/runtime shape as the rescued case above, but the
        // endpoints drift by more than the 5-minute slack.
        let a = pi(1000, 2000, "News");
        let b = pi(1400, 2400, "Newsflash");
        assert!(!matches(&a, &b));
    }
}
