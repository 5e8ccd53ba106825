//! Application Information (AI): provider identity and network table (spec §3).

/// One entry of the per-provider network table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub cni: u16,
    pub name: String,
    /// Count of distinct acquisition days seen for this network, used by
    /// the merger to pick `dayCount = max(...)` across sources (§4.6).
    pub day_count: u8,
    pub language: u8,
}

/// Application Information block: provider CNI, service name and the
/// network table it advertises (§3, §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub cni: u16,
    pub service_name: String,
    pub networks: Vec<NetworkInfo>,
    /// Monotone counter for the normal PI stream; bumped whenever a
    /// structural change (not just new content) invalidates every PI
    /// acquired under the old value (§3).
    pub version: u32,
    /// Same as `version` but for the secondary ("SWO") PI stream.
    pub version_swo: u32,
}

impl AppInfo {
    /// Cap applied when concatenating merged service names (§9 supplement).
    pub const MAX_SERVICE_NAME_LEN: usize = 240;

    pub fn network(&self, cni: u16) -> Option<&NetworkInfo> {
        self.networks.iter().find(|n| n.cni == cni)
    }

    pub fn network_index(&self, cni: u16) -> Option<usize> {
        self.networks.iter().position(|n| n.cni == cni)
    }

    /// The counter governing `stream` (`false` = normal, `true` = SWO).
    pub fn version_for_stream(&self, stream: bool) -> u32 {
        if stream { self.version_swo } else { self.version }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_lookup_by_cni() {
        let ai = AppInfo {
            cni: 0x1234,
            service_name: "Demo".into(),
            networks: vec![NetworkInfo { cni: 0xd, name: "One".into(), day_count: 3, language: 0 }],
            version: 0,
            version_swo: 0,
        };
        assert_eq!(ai.network(0xd).map(|n| n.name.as_str()), Some("One"));
        assert_eq!(ai.network(0xee), None);
    }
}
