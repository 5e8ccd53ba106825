//! Programme Item (PI), the atomic EPG record (spec §3).

use std::cmp::Ordering;
use std::iter::FromIterator;

/// Bound on simultaneous theme/sort-criterion codes and on merge source lists.
pub const MAX_THEMES: usize = 8;
pub const MAX_SORT_CRITERIA: usize = 8;
pub const MAX_MERGED_DB_COUNT: usize = 10;

/// A bounded, order-preserving set of small integer codes (themes or sort
/// criteria). Backed by a fixed array rather than a `Vec` since the cap is
/// small and known (spec: "up to eight").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodeSet {
    codes: [u8; 8],
    len: u8,
}

impl CodeSet {
    pub fn new() -> CodeSet {
        CodeSet::default()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.codes[..self.len as usize]
    }

    pub fn push(&mut self, code: u8) -> bool {
        if self.as_slice().contains(&code) {
            return true;
        }
        if self.len as usize >= self.codes.len() {
            return false;
        }
        self.codes[self.len as usize] = code;
        self.len += 1;
        true
    }

    /// Set union, used by the merger (§4.6) for theme codes: "themes are
    /// set-unioned (up to eight)". Codes beyond the cap are silently dropped.
    pub fn union(&self, other: &CodeSet) -> CodeSet {
        let mut result = *self;
        for &code in other.as_slice() {
            result.push(code);
        }
        result
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl FromIterator<u8> for CodeSet {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        let mut set = CodeSet::new();
        for code in iter {
            set.push(code);
        }
        set
    }
}

/// Hand-rolled bitflags: the teacher's workspace has no `bitflags`
/// dependency anywhere, so this keeps the same "const associated with a
/// newtype" shape without pulling in a crate purely for a handful of flags.
pub(crate) macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $repr:ty {
            $(const $flag:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name($repr);

        impl $name {
            $(pub const $flag: $name = $name($value);)*

            pub const fn empty() -> $name { $name(0) }
            pub const fn bits(self) -> $repr { self.0 }
            pub const fn from_bits_truncate(bits: $repr) -> $name { $name(bits) }
            pub fn contains(self, other: $name) -> bool { self.0 & other.0 == other.0 }
            pub fn insert(&mut self, other: $name) { self.0 |= other.0; }
            pub fn union(self, other: $name) -> $name { $name(self.0 | other.0) }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name { $name(self.0 | rhs.0) }
        }
    };
}

bitflags_like! {
    /// Feature bitset (§3): sound layout, aspect/resolution, repeat,
    /// subtitles, encryption, live.
    pub struct Features: u16 {
        const MONO          = 0b0000_0000_0001;
        const STEREO        = 0b0000_0000_0010;
        const SURROUND      = 0b0000_0000_0100;
        const WIDESCREEN    = 0b0000_0000_1000;
        const HD            = 0b0000_0001_0000;
        const REPEAT        = 0b0000_0010_0000;
        const SUBTITLES     = 0b0000_0100_0000;
        const ENCRYPTED     = 0b0000_1000_0000;
        const LIVE          = 0b0001_0000_0000;
    }
}

/// Packed Programme Identification Label: broadcaster-declared
/// `(day, month, hour, minute)` start code used for delivery recognition
/// (VPS/PDC, §3 glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pil(pub u32);

impl Pil {
    pub const NONE: Pil = Pil(0x7FFF);

    pub fn pack(day: u8, month: u8, hour: u8, minute: u8) -> Pil {
        Pil(((day as u32) << 15) | ((month as u32) << 11) | ((hour as u32) << 6) | minute as u32)
    }

    pub fn day(self) -> u8 {
        ((self.0 >> 15) & 0x1F) as u8
    }
    pub fn month(self) -> u8 {
        ((self.0 >> 11) & 0x0F) as u8
    }
    pub fn hour(self) -> u8 {
        ((self.0 >> 6) & 0x1F) as u8
    }
    pub fn minute(self) -> u8 {
        (self.0 & 0x3F) as u8
    }

    pub fn is_defined(self) -> bool {
        self != Pil::NONE
    }
}

/// Ordered list of source provider indices for a merged PI (§3, §9): "a
/// small tagged vector (one byte per entry, terminator value 0xff)".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSources(Vec<u8>);

impl MergeSources {
    pub fn new() -> MergeSources {
        MergeSources(Vec::new())
    }

    pub fn push(&mut self, source_index: u8) {
        debug_assert!((source_index as usize) < MAX_MERGED_DB_COUNT);
        if !self.0.contains(&source_index) {
            self.0.push(source_index);
            self.0.sort_unstable();
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn contains(&self, source_index: u8) -> bool {
        self.0.contains(&source_index)
    }

    /// On-disk/wire encoding: entries followed by a `0xff` terminator.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.0.clone();
        out.push(0xff);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> MergeSources {
        let entries: Vec<u8> = bytes.iter().copied().take_while(|&b| b != 0xff).collect();
        MergeSources(entries)
    }
}

/// The atomic EPG record (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct ProgrammeItem {
    pub netwop_no: u8,
    pub block_no: u16,
    pub start_time: u32,
    pub stop_time: u32,
    pub parental_rating: u8,
    pub editorial_rating: u8,
    pub themes: CodeSet,
    pub sort_criteria: CodeSet,
    pub features: Features,
    pub pil: Pil,
    pub title: String,
    pub description: Option<String>,
    pub merge_sources: Option<MergeSources>,
    /// Cleared when this PI's version no longer matches its source(s)
    /// (§4.6): for an acquired PI, when the source AI's counter advances
    /// without a fresh acquisition of this record; for a merged PI, set
    /// only if every matched source's flag was set at merge time.
    pub version_ok: bool,
}

impl ProgrammeItem {
    /// §3 invariant: `start < stop`.
    pub fn has_valid_times(&self) -> bool {
        self.start_time < self.stop_time
    }

    /// Sort key for the global chain: `(start_time, netwop_no)` (§3).
    pub fn sort_key(&self) -> (u32, u8) {
        (self.start_time, self.netwop_no)
    }
}

impl PartialOrd for ProgrammeItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.sort_key().cmp(&other.sort_key()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_set_union_caps_at_eight_and_dedups() {
        let a: CodeSet = (0..6).collect();
        let b: CodeSet = (4..10).collect();
        let merged = a.union(&b);
        assert_eq!(merged.as_slice(), &[0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn merge_sources_round_trip_through_bytes() {
        let mut sources = MergeSources::new();
        sources.push(2);
        sources.push(0);
        assert_eq!(sources.as_slice(), &[0, 2]);
        let bytes = sources.to_bytes();
        assert_eq!(bytes, vec![0, 2, 0xff]);
        assert_eq!(MergeSources::from_bytes(&bytes), sources);
    }

    #[test]
    fn pil_packs_and_unpacks() {
        let pil = Pil::pack(15, 6, 20, 45);
        assert_eq!((pil.day(), pil.month(), pil.hour(), pil.minute()), (15, 6, 20, 45));
    }
}
