//! `-demo FILE` support (§C, supplemented feature): replays a pre-captured
//! text log of AI/PI records instead of driving a real tuner, so the daemon
//! can be exercised end to end without VBI hardware (teletext decoding
//! itself stays out of scope, per the Non-goals).
//!
//! File format, one directive per line:
//! ```text
//! AI <cni hex> <service name>
//! PI <cni hex> <netwop_no> <start unix> <stop unix> <title>
//! ```

use std::fs;
use std::path::Path;

use epg_db::{AppInfo, CodeSet, Features, NetworkInfo, Pil, ProgrammeItem};

#[derive(Debug, Clone)]
pub enum DemoRecord {
    Ai(AppInfo),
    Pi { cni: u16, pi: ProgrammeItem },
}

pub fn load(path: &Path) -> std::io::Result<Vec<DemoRecord>> {
    let text = fs::read_to_string(path)?;
    let mut records = Vec::new();
    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, char::is_whitespace);
        let directive = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();
        match directive {
            "AI" => {
                let mut fields = rest.splitn(2, char::is_whitespace);
                let cni = parse_hex(fields.next().unwrap_or("0"));
                let service_name = fields.next().unwrap_or("").to_string();
                records.push(DemoRecord::Ai(AppInfo {
                    cni,
                    networks: vec![NetworkInfo {
                        cni,
                        name: service_name.clone(),
                        day_count: 1,
                        language: 0,
                    }],
                    service_name,
                    version: 1,
                    version_swo: 1,
                }));
            }
            "PI" => {
                let fields: Vec<&str> = rest.splitn(5, char::is_whitespace).collect();
                if fields.len() < 5 {
                    continue;
                }
                let cni = parse_hex(fields[0]);
                let netwop_no: u8 = fields[1].parse().unwrap_or(0);
                let start_time: u32 = fields[2].parse().unwrap_or(0);
                let stop_time: u32 = fields[3].parse().unwrap_or(start_time);
                let title = fields[4].to_string();
                records.push(DemoRecord::Pi {
                    cni,
                    pi: ProgrammeItem {
                        netwop_no,
                        block_no: lineno as u16,
                        start_time,
                        stop_time,
                        parental_rating: 0,
                        editorial_rating: 0,
                        themes: CodeSet::new(),
                        sort_criteria: CodeSet::new(),
                        features: Features::empty(),
                        pil: Pil::NONE,
                        title,
                        description: None,
                        merge_sources: None,
                        version_ok: true,
                    },
                });
            }
            _ => {}
        }
    }
    Ok(records)
}

fn parse_hex(s: &str) -> u16 {
    u16::from_str_radix(s.trim_start_matches("0x"), 16).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_ai_and_pi_lines() {
        let mut file = tempfile_with(
            "# comment\nAI 0d94 Demo Channel\nPI 0d94 0 1000 2000 Evening News\n",
        );
        let records = load(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        match &records[0] {
            DemoRecord::Ai(ai) => assert_eq!(ai.cni, 0x0d94),
            _ => panic!("expected AI record"),
        }
        match &records[1] {
            DemoRecord::Pi { cni, pi } => {
                assert_eq!(*cni, 0x0d94);
                assert_eq!(pi.title, "Evening News");
            }
            _ => panic!("expected PI record"),
        }
        let _ = &mut file;
    }

    fn tempfile_with(contents: &str) -> NamedTempFile {
        let path = std::env::temp_dir().join(format!("epgd-demo-test-{}", std::process::id()));
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        NamedTempFile { path }
    }

    struct NamedTempFile {
        path: std::path::PathBuf,
    }

    impl NamedTempFile {
        fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for NamedTempFile {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.path);
        }
    }
}
