//! On-disk dump/reload format (spec §6): one file per provider, a fixed
//! header followed by `{size, type}`-prefixed block records.
//!
//! Endianness is detected from the header's `endian_magic` field rather
//! than assumed from the host; a file written on the opposite-endian
//! architecture is byte-swapped in place on read, the same schema-driven
//! approach `epg_proto::message` uses for wire messages (kept as a small
//! local helper here rather than shared across crates, since the field
//! layout and the two use cases don't otherwise overlap).

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use epg_core::ReloadError;

use crate::ai::{AppInfo, NetworkInfo};
use crate::db_context::{DbContext, DbKind};
use crate::pi::{CodeSet, Features, MergeSources, Pil, ProgrammeItem};

const MAGIC: &[u8; 20] = b"nxtvepg-db-dump\0\0\0\0\0";
const ENDIAN_MAGIC_NATIVE: u32 = 0x0102_0304;
const ENDIAN_MAGIC_SWAPPED: u32 = 0x0403_0201;
const COMPAT_VERSION: u16 = 1;
const SW_VERSION: u16 = 1;
const HEADER_LEN: usize = 20 + 4 + 2 + 2 + 2 + 2 + 4 + 1 + 4 + 4 + 4 + 4;

/// Maximum size of a single block record's body (§6).
pub const MAX_BLOCK_SIZE: usize = 0xffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockType {
    Ai = 0,
    Pi = 1,
    /// Distinguishes PI retained only for `expireDelayPi` bookkeeping (§6).
    ExpiredPi = 2,
}

impl BlockType {
    fn from_u8(b: u8) -> Option<BlockType> {
        match b {
            0 => Some(BlockType::Ai),
            1 => Some(BlockType::Pi),
            2 => Some(BlockType::ExpiredPi),
            _ => None,
        }
    }
}

struct Header {
    endian_magic: u32,
    cni: u16,
    page_no: u16,
    tuner_freq: u32,
    app_id: u8,
    last_ai_update: u32,
    first_pi_date: u32,
    last_pi_date: u32,
}

fn write_header<O: ByteOrder>(out: &mut Vec<u8>, h: &Header) {
    out.extend_from_slice(MAGIC);
    let mut buf = [0u8; 4];
    O::write_u32(&mut buf, h.endian_magic);
    out.extend_from_slice(&buf);
    let mut buf2 = [0u8; 2];
    O::write_u16(&mut buf2, COMPAT_VERSION);
    out.extend_from_slice(&buf2);
    O::write_u16(&mut buf2, SW_VERSION);
    out.extend_from_slice(&buf2);
    O::write_u16(&mut buf2, h.cni);
    out.extend_from_slice(&buf2);
    O::write_u16(&mut buf2, h.page_no);
    out.extend_from_slice(&buf2);
    O::write_u32(&mut buf, h.tuner_freq);
    out.extend_from_slice(&buf);
    out.push(h.app_id);
    O::write_u32(&mut buf, h.last_ai_update);
    out.extend_from_slice(&buf);
    O::write_u32(&mut buf, h.first_pi_date);
    out.extend_from_slice(&buf);
    O::write_u32(&mut buf, h.last_pi_date);
    out.extend_from_slice(&buf);
    out.extend_from_slice(&[0u8; 4]); // reserved
}

/// Serialises a context to the on-disk dump format (§6). Obsolete PI are
/// written with [`BlockType::ExpiredPi`] so reload can distinguish them.
pub fn dump(ctx: &DbContext) -> Vec<u8> {
    let first_pi_date = ctx.iter().map(|pi| pi.start_time).min().unwrap_or(0);
    let last_pi_date = ctx.iter().map(|pi| pi.stop_time).max().unwrap_or(0);

    let header = Header {
        endian_magic: ENDIAN_MAGIC_NATIVE,
        cni: ctx.app_info.cni,
        page_no: ctx.teletext_page,
        tuner_freq: ctx.tuner_freq.unwrap_or(0),
        app_id: ctx.app_id,
        last_ai_update: ctx.last_acq_time,
        first_pi_date,
        last_pi_date,
    };

    let mut out = Vec::new();
    write_header::<LittleEndian>(&mut out, &header);

    write_block(&mut out, BlockType::Ai, &encode_ai(&ctx.app_info));
    for pi in ctx.iter() {
        write_block(&mut out, BlockType::Pi, &encode_pi(pi));
    }
    for pi in ctx.obsolete_iter() {
        write_block(&mut out, BlockType::ExpiredPi, &encode_pi(pi));
    }
    out
}

fn write_block(out: &mut Vec<u8>, block_type: BlockType, body: &[u8]) {
    debug_assert!(body.len() <= MAX_BLOCK_SIZE);
    let mut buf = [0u8; 2];
    LittleEndian::write_u16(&mut buf, body.len() as u16);
    out.extend_from_slice(&buf);
    out.push(block_type as u8);
    out.extend_from_slice(body);
}

/// Reloads a context from a dump file's bytes (§6). Accepts either
/// endianness; bad individual blocks are skipped rather than aborting the
/// whole reload, per the corrupt-entry tolerance requirement.
pub fn reload(bytes: &[u8], expire_delay_secs: u32, now: u32) -> Result<DbContext, ReloadError> {
    if bytes.len() < HEADER_LEN {
        return Err(ReloadError::Corrupt);
    }
    if &bytes[0..20] != MAGIC {
        return Err(ReloadError::WrongMagic);
    }
    let native_order = LittleEndian::read_u32(&bytes[20..24]);
    let swapped = match native_order {
        ENDIAN_MAGIC_NATIVE => false,
        ENDIAN_MAGIC_SWAPPED => true,
        _ => return Err(ReloadError::WrongMagic),
    };

    let (cni, page_no, tuner_freq, app_id, last_ai_update) = if swapped {
        read_header_fields::<BigEndian>(bytes)
    } else {
        read_header_fields::<LittleEndian>(bytes)
    };
    let compat_version = if swapped {
        BigEndian::read_u16(&bytes[24..26])
    } else {
        LittleEndian::read_u16(&bytes[24..26])
    };
    if compat_version != COMPAT_VERSION {
        return Err(ReloadError::Version);
    }

    let mut dbc = DbContext::new(
        DbKind::Acquired,
        AppInfo { cni, service_name: String::new(), networks: Vec::new(), version: 0, version_swo: 0 },
    );
    dbc.teletext_page = page_no;
    dbc.tuner_freq = if tuner_freq == 0 { None } else { Some(tuner_freq) };
    dbc.app_id = app_id;
    dbc.last_acq_time = last_ai_update;

    let mut offset = HEADER_LEN;
    while offset + 3 <= bytes.len() {
        let size = if swapped {
            BigEndian::read_u16(&bytes[offset..offset + 2])
        } else {
            LittleEndian::read_u16(&bytes[offset..offset + 2])
        } as usize;
        let block_type = bytes[offset + 2];
        offset += 3;
        if offset + size > bytes.len() {
            break; // truncated trailing block: stop, keep what parsed so far
        }
        let body = &bytes[offset..offset + size];
        offset += size;

        match BlockType::from_u8(block_type) {
            Some(BlockType::Ai) => {
                if let Some(ai) = decode_ai(body, swapped) {
                    dbc.app_info = ai;
                }
            }
            Some(BlockType::Pi) => {
                if let Some(pi) = decode_pi(body, swapped) {
                    dbc.insert_pi(pi, last_ai_update);
                }
            }
            Some(BlockType::ExpiredPi) => {
                if let Some(pi) = decode_pi(body, swapped) {
                    if now.saturating_sub(pi.stop_time) < expire_delay_secs {
                        dbc.push_obsolete(pi);
                    }
                }
            }
            None => {} // unknown block type: skip, don't abort the reload
        }
    }
    Ok(dbc)
}

fn read_header_fields<O: ByteOrder>(bytes: &[u8]) -> (u16, u16, u32, u8, u32) {
    let cni = O::read_u16(&bytes[28..30]);
    let page_no = O::read_u16(&bytes[30..32]);
    let tuner_freq = O::read_u32(&bytes[32..36]);
    let app_id = bytes[36];
    let last_ai_update = O::read_u32(&bytes[37..41]);
    (cni, page_no, tuner_freq, app_id, last_ai_update)
}

/// Rewrites only the `tunerFreq` header field in place, per `CX::update_freq`
/// (§4.5, §9 supplement): avoids a full dump for a common, narrow change.
pub fn rewrite_freq_field(bytes: &mut [u8], new_freq: u32) -> Result<(), ReloadError> {
    if bytes.len() < HEADER_LEN || &bytes[0..20] != MAGIC {
        return Err(ReloadError::Corrupt);
    }
    let swapped = match LittleEndian::read_u32(&bytes[20..24]) {
        ENDIAN_MAGIC_NATIVE => false,
        ENDIAN_MAGIC_SWAPPED => true,
        _ => return Err(ReloadError::WrongMagic),
    };
    if swapped {
        BigEndian::write_u32(&mut bytes[32..36], new_freq);
    } else {
        LittleEndian::write_u32(&mut bytes[32..36], new_freq);
    }
    Ok(())
}

/// Encodes an AI for `BLOCK_IND` transmission (§4.10): reuses the on-disk
/// block body format, since both cases need the same opaque, self-describing
/// AI encoding and the wire codec leaves `BLOCK_IND` bodies to this crate.
pub fn encode_ai_block(ai: &AppInfo) -> Vec<u8> {
    encode_ai(ai)
}

/// Decodes a `BLOCK_IND` AI body in host order (the net transport layer has
/// already byte-swapped it if the peer's endianness differed).
pub fn decode_ai_block(body: &[u8]) -> Option<AppInfo> {
    decode_ai(body, false)
}

/// Encodes a PI for `BLOCK_IND` transmission (§4.10).
pub fn encode_pi_block(pi: &ProgrammeItem) -> Vec<u8> {
    encode_pi(pi)
}

/// Decodes a `BLOCK_IND` PI body in host order.
pub fn decode_pi_block(body: &[u8]) -> Option<ProgrammeItem> {
    decode_pi(body, false)
}

fn encode_ai(ai: &AppInfo) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(ai.networks.len().min(255) as u8);
    let mut buf4 = [0u8; 4];
    LittleEndian::write_u32(&mut buf4, ai.version);
    out.extend_from_slice(&buf4);
    LittleEndian::write_u32(&mut buf4, ai.version_swo);
    out.extend_from_slice(&buf4);
    let name_bytes = ai.service_name.as_bytes();
    let mut buf2 = [0u8; 2];
    LittleEndian::write_u16(&mut buf2, name_bytes.len().min(u16::MAX as usize) as u16);
    out.extend_from_slice(&buf2);
    out.extend_from_slice(name_bytes);
    for net in ai.networks.iter().take(255) {
        LittleEndian::write_u16(&mut buf2, net.cni);
        out.extend_from_slice(&buf2);
        out.push(net.day_count);
        out.push(net.language);
        let net_name = net.name.as_bytes();
        LittleEndian::write_u16(&mut buf2, net_name.len().min(u16::MAX as usize) as u16);
        out.extend_from_slice(&buf2);
        out.extend_from_slice(net_name);
    }
    out
}

fn decode_ai(body: &[u8], swapped: bool) -> Option<AppInfo> {
    let read_u16 = |b: &[u8]| if swapped { BigEndian::read_u16(b) } else { LittleEndian::read_u16(b) };
    let read_u32 = |b: &[u8]| if swapped { BigEndian::read_u32(b) } else { LittleEndian::read_u32(b) };
    if body.is_empty() {
        return None;
    }
    let net_count = body[0] as usize;
    let mut pos = 1;
    if pos + 4 + 4 > body.len() {
        return None;
    }
    let version = read_u32(&body[pos..pos + 4]);
    pos += 4;
    let version_swo = read_u32(&body[pos..pos + 4]);
    pos += 4;
    if pos + 2 > body.len() {
        return None;
    }
    let name_len = read_u16(&body[pos..pos + 2]) as usize;
    pos += 2;
    if pos + name_len > body.len() {
        return None;
    }
    let service_name = String::from_utf8_lossy(&body[pos..pos + name_len]).into_owned();
    pos += name_len;

    let mut networks = Vec::with_capacity(net_count);
    for _ in 0..net_count {
        if pos + 5 > body.len() {
            return None;
        }
        let cni = read_u16(&body[pos..pos + 2]);
        let day_count = body[pos + 2];
        let language = body[pos + 3];
        pos += 4;
        let net_name_len = read_u16(&body[pos..pos + 2]) as usize;
        pos += 2;
        if pos + net_name_len > body.len() {
            return None;
        }
        let name = String::from_utf8_lossy(&body[pos..pos + net_name_len]).into_owned();
        pos += net_name_len;
        networks.push(NetworkInfo { cni, name, day_count, language });
    }
    Some(AppInfo { cni: 0, service_name, networks, version, version_swo })
}

fn encode_pi(pi: &ProgrammeItem) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(pi.netwop_no);
    let mut buf2 = [0u8; 2];
    LittleEndian::write_u16(&mut buf2, pi.block_no);
    out.extend_from_slice(&buf2);
    let mut buf4 = [0u8; 4];
    LittleEndian::write_u32(&mut buf4, pi.start_time);
    out.extend_from_slice(&buf4);
    LittleEndian::write_u32(&mut buf4, pi.stop_time);
    out.extend_from_slice(&buf4);
    out.push(pi.parental_rating);
    out.push(pi.editorial_rating);
    out.push(pi.themes.as_slice().len() as u8);
    out.extend_from_slice(pi.themes.as_slice());
    out.push(pi.sort_criteria.as_slice().len() as u8);
    out.extend_from_slice(pi.sort_criteria.as_slice());
    LittleEndian::write_u16(&mut buf2, pi.features.bits());
    out.extend_from_slice(&buf2);
    LittleEndian::write_u32(&mut buf4, pi.pil.0);
    out.extend_from_slice(&buf4);
    let title_bytes = pi.title.as_bytes();
    LittleEndian::write_u16(&mut buf2, title_bytes.len().min(u16::MAX as usize) as u16);
    out.extend_from_slice(&buf2);
    out.extend_from_slice(title_bytes);
    let desc_bytes = pi.description.as_deref().unwrap_or("").as_bytes();
    LittleEndian::write_u16(&mut buf2, desc_bytes.len().min(u16::MAX as usize) as u16);
    out.extend_from_slice(&buf2);
    out.extend_from_slice(desc_bytes);
    match &pi.merge_sources {
        Some(sources) => out.extend_from_slice(&sources.to_bytes()),
        None => out.push(0xff),
    }
    out.push(pi.version_ok as u8);
    out
}

fn decode_pi(body: &[u8], swapped: bool) -> Option<ProgrammeItem> {
    let read_u16 = |b: &[u8]| if swapped { BigEndian::read_u16(b) } else { LittleEndian::read_u16(b) };
    let read_u32 = |b: &[u8]| if swapped { BigEndian::read_u32(b) } else { LittleEndian::read_u32(b) };

    let mut pos = 0;
    if body.len() < 1 + 2 + 4 + 4 + 1 + 1 + 1 {
        return None;
    }
    let netwop_no = body[pos];
    pos += 1;
    let block_no = read_u16(&body[pos..pos + 2]);
    pos += 2;
    let start_time = read_u32(&body[pos..pos + 4]);
    pos += 4;
    let stop_time = read_u32(&body[pos..pos + 4]);
    pos += 4;
    let parental_rating = body[pos];
    pos += 1;
    let editorial_rating = body[pos];
    pos += 1;

    let theme_count = body.get(pos).copied()? as usize;
    pos += 1;
    if pos + theme_count > body.len() {
        return None;
    }
    let themes: CodeSet = body[pos..pos + theme_count].iter().copied().collect();
    pos += theme_count;

    let sort_count = body.get(pos).copied()? as usize;
    pos += 1;
    if pos + sort_count > body.len() {
        return None;
    }
    let sort_criteria: CodeSet = body[pos..pos + sort_count].iter().copied().collect();
    pos += sort_count;

    if pos + 2 + 4 + 2 > body.len() {
        return None;
    }
    let features = Features::from_bits_truncate(read_u16(&body[pos..pos + 2]));
    pos += 2;
    let pil = Pil(read_u32(&body[pos..pos + 4]));
    pos += 4;

    let title_len = read_u16(&body[pos..pos + 2]) as usize;
    pos += 2;
    if pos + title_len > body.len() {
        return None;
    }
    let title = String::from_utf8_lossy(&body[pos..pos + title_len]).into_owned();
    pos += title_len;

    if pos + 2 > body.len() {
        return None;
    }
    let desc_len = read_u16(&body[pos..pos + 2]) as usize;
    pos += 2;
    if pos + desc_len > body.len() {
        return None;
    }
    let description = if desc_len == 0 {
        None
    } else {
        Some(String::from_utf8_lossy(&body[pos..pos + desc_len]).into_owned())
    };
    pos += desc_len;

    let (merge_sources, version_ok) = if pos < body.len() {
        // `MergeSources` is terminator-delimited (0xff), so find it explicitly
        // rather than handing the whole remainder to `from_bytes`: anything
        // past the terminator is the trailing `version_ok` byte, not part of
        // the source list.
        let terminator = body[pos..].iter().position(|&b| b == 0xff).map(|i| pos + i);
        let sources_end = terminator.map(|i| i + 1).unwrap_or(body.len());
        let sources = MergeSources::from_bytes(&body[pos..sources_end]);
        let merge_sources = if sources.as_slice().is_empty() { None } else { Some(sources) };
        let version_ok = body.get(sources_end).map(|&b| b != 0).unwrap_or(true);
        (merge_sources, version_ok)
    } else {
        (None, true)
    };

    Some(ProgrammeItem {
        netwop_no,
        block_no,
        start_time,
        stop_time,
        parental_rating,
        editorial_rating,
        themes,
        sort_criteria,
        features,
        pil,
        title,
        description,
        merge_sources,
        version_ok,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pi(netwop_no: u8, start: u32, stop: u32) -> ProgrammeItem {
        ProgrammeItem {
            netwop_no,
            block_no: 7,
            start_time: start,
            stop_time: stop,
            parental_rating: 12,
            editorial_rating: 3,
            themes: [1u8, 2, 3].into_iter().collect(),
            sort_criteria: [4u8].into_iter().collect(),
            features: Features::STEREO.union(Features::WIDESCREEN),
            pil: Pil::pack(4, 8, 20, 15),
            title: "Evening News".into(),
            description: Some("Headlines and weather.".into()),
            merge_sources: None,
            version_ok: true,
        }
    }

    #[test]
    fn dump_reload_round_trips_ai_and_pi() {
        let mut ctx = DbContext::new(
            DbKind::Acquired,
            AppInfo {
                cni: 0x0dc1,
                service_name: "Demo Service".into(),
                networks: vec![NetworkInfo { cni: 0x0dc1, name: "Channel One".into(), day_count: 5, language: 9 }],
                version: 1,
                version_swo: 0,
            },
        );
        ctx.teletext_page = 0x1dc;
        ctx.tuner_freq = Some(474_000_000);
        ctx.insert_pi(sample_pi(0, 1_000, 2_000), 1_000);
        ctx.insert_pi(sample_pi(0, 2_000, 3_000), 2_000);

        let bytes = dump(&ctx);
        let reloaded = reload(&bytes, 3600 * 4, 3_000).expect("reload should succeed");

        assert_eq!(reloaded.app_info.cni, ctx.app_info.cni);
        assert_eq!(reloaded.app_info.service_name, ctx.app_info.service_name);
        assert_eq!(reloaded.app_info.version, ctx.app_info.version);
        assert_eq!(reloaded.len(), ctx.len());
        assert_eq!(reloaded.teletext_page, ctx.teletext_page);
        assert_eq!(reloaded.tuner_freq, ctx.tuner_freq);
        for (a, b) in reloaded.iter().zip(ctx.iter()) {
            assert_eq!(a.title, b.title);
            assert_eq!(a.themes.as_slice(), b.themes.as_slice());
            assert_eq!(a.features, b.features);
            assert_eq!(a.pil, b.pil);
        }
    }

    #[test]
    fn reload_rejects_wrong_magic() {
        let bytes = vec![0u8; HEADER_LEN];
        assert_eq!(reload(&bytes, 0, 0), Err(ReloadError::WrongMagic));
    }

    #[test]
    fn reload_tolerates_swapped_endianness() {
        let mut ctx = DbContext::new(
            DbKind::Acquired,
            AppInfo { cni: 0x2000, service_name: "S".into(), networks: Vec::new(), version: 0, version_swo: 0 },
        );
        ctx.insert_pi(sample_pi(1, 10, 20), 10);
        let mut bytes = dump(&ctx);
        // Flip the header to advertise the opposite endianness without
        // actually swapping the body: exercises the header detection path
        // (a genuinely swapped file would also byte-swap every block, which
        // the round-trip test above already covers for the native case).
        let flipped = if LittleEndian::read_u32(&bytes[20..24]) == ENDIAN_MAGIC_NATIVE {
            ENDIAN_MAGIC_SWAPPED
        } else {
            ENDIAN_MAGIC_NATIVE
        };
        LittleEndian::write_u32(&mut bytes[20..24], flipped);
        // compat_version and the rest of the header must also be read in
        // the announced order, so big-endian-encode those fixed fields too.
        let cni = LittleEndian::read_u16(&bytes[28..30]);
        BigEndian::write_u16(&mut bytes[24..26], COMPAT_VERSION);
        BigEndian::write_u16(&mut bytes[28..30], cni);
        let result = reload(&bytes, 0, 100);
        assert!(result.is_ok());
    }

    #[test]
    fn reload_skips_corrupt_trailing_block_without_failing() {
        let mut ctx = DbContext::new(
            DbKind::Acquired,
            AppInfo { cni: 0x3000, service_name: "S".into(), networks: Vec::new(), version: 0, version_swo: 0 },
        );
        ctx.insert_pi(sample_pi(0, 0, 10), 0);
        let mut bytes = dump(&ctx);
        bytes.extend_from_slice(&[0xff, 0xff, 1]); // claims a 65535-byte body that isn't there
        let reloaded = reload(&bytes, 0, 100).expect("truncated trailing block must not abort reload");
        assert_eq!(reloaded.len(), 1);
    }
}
