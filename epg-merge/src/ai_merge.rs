//! Merges the per-source Application Information blocks into one output
//! AI: network union, concatenated service name, per-network `dayCount`
//! maximum (spec §4.6).

use epg_db::{AppInfo, NetworkInfo};

/// Merges `sources` in priority order into one AI. Networks are
/// deduplicated by CNI (the first, highest-priority occurrence's name
/// and language win); `dayCount` is the maximum seen across sources.
pub fn merge_ai(sources: &[&AppInfo]) -> AppInfo {
    let service_name = {
        let mut name = String::new();
        for source in sources {
            if !name.is_empty() {
                name.push('/');
            }
            name.push_str(&source.service_name);
            if name.len() >= AppInfo::MAX_SERVICE_NAME_LEN {
                break;
            }
        }
        name.truncate(AppInfo::MAX_SERVICE_NAME_LEN);
        name
    };

    let mut networks: Vec<NetworkInfo> = Vec::new();
    for source in sources {
        for net in &source.networks {
            match networks.iter_mut().find(|n| n.cni == net.cni) {
                Some(existing) => existing.day_count = existing.day_count.max(net.day_count),
                None => networks.push(net.clone()),
            }
        }
    }

    // The merged AI isn't itself an acquired stream, so its own version
    // counter is fixed rather than derived from any source's; per-PI
    // staleness is tracked separately by `ProgrammeItem::version_ok`.
    AppInfo { cni: 0, service_name, networks, version: 1, version_swo: 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ai(cni: u16, name: &str, networks: Vec<NetworkInfo>) -> AppInfo {
        AppInfo { cni, service_name: name.into(), networks, version: 0, version_swo: 0 }
    }

    #[test]
    fn networks_deduplicated_by_cni_with_max_day_count() {
        let a = ai(1, "Source A", vec![NetworkInfo { cni: 10, name: "One".into(), day_count: 3, language: 0 }]);
        let b = ai(2, "Source B", vec![NetworkInfo { cni: 10, name: "One (B)".into(), day_count: 7, language: 0 }]);
        let merged = merge_ai(&[&a, &b]);
        assert_eq!(merged.networks.len(), 1);
        assert_eq!(merged.networks[0].day_count, 7);
        assert_eq!(merged.networks[0].name, "One");
    }

    #[test]
    fn service_name_concatenated_and_capped() {
        let a = ai(1, "Source A", Vec::new());
        let b = ai(2, "Source B", Vec::new());
        let merged = merge_ai(&[&a, &b]);
        assert_eq!(merged.service_name, "Source A/Source B");
    }
}
