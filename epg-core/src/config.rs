//! Parser for the daemon's INI-like `.rc` config file (spec §6, §9).
//!
//! The format is a sequence of `[SECTION]` headers followed by either
//! `key = value` assignment lines or bare whitespace-separated list lines.
//! Sections this crate doesn't know about are round-tripped byte-for-byte:
//! on rewrite, any text between a foreign section's header line and the
//! next recognized header (or EOF) is emitted exactly as read.

use crate::error::ConfigError;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// Section names owned by this workspace; anything else is foreign and
/// preserved verbatim.
pub const KNOWN_SECTIONS: &[&str] = &[
    "VERSION",
    "ACQUISITION",
    "TELETEXT GRABBER",
    "DATABASE",
    "CLIENT SERVER",
    "TV CARDS",
    "TV APPLICATION",
    "NETWORK ORDER",
    "NETWORK NAMES",
    "XMLTV PROVIDERS",
    "XMLTV NETWORKS",
];

fn is_known(name: &str) -> bool {
    KNOWN_SECTIONS.iter().any(|s| s.eq_ignore_ascii_case(name))
}

/// A single parsed line within a known section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Assign(String, String),
    List(Vec<String>),
}

#[derive(Debug, Clone)]
enum Section {
    /// A section this crate understands: parsed into individual lines so
    /// callers can query/modify it, and re-serialized (not byte-preserved)
    /// on rewrite.
    Known { name: String, lines: Vec<Line> },
    /// A section nobody here recognizes: kept as the exact source bytes
    /// from just after the header line up to the next header or EOF.
    Foreign { name: String, raw: String },
    /// Any bytes preceding the first `[SECTION]` header, preserved verbatim.
    Preamble(String),
}

/// An in-memory representation of a parsed `.rc` file.
#[derive(Debug, Clone, Default)]
pub struct RcFile {
    sections: Vec<Section>,
}

impl RcFile {
    pub fn parse(text: &str) -> Result<RcFile, ConfigError> {
        let mut sections = Vec::new();
        let mut cur_name: Option<String> = None;
        let mut cur_body = String::new();
        let mut preamble = String::new();
        let mut in_preamble = true;

        for (idx, raw_line) in text.split_inclusive('\n').enumerate() {
            let trimmed = raw_line.trim_end_matches(['\n', '\r']);
            if let Some(header) = parse_header(trimmed) {
                if in_preamble {
                    if !preamble.is_empty() {
                        sections.push(Section::Preamble(std::mem::take(&mut preamble)));
                    }
                    in_preamble = false;
                } else if let Some(name) = cur_name.take() {
                    sections.push(finish_section(name, std::mem::take(&mut cur_body))?);
                }
                cur_name = Some(header.to_string());
                continue;
            }

            if in_preamble {
                preamble.push_str(raw_line);
                continue;
            }
            if cur_name.is_none() {
                return Err(ConfigError::Syntax {
                    line: idx + 1,
                    message: "content outside of any section".to_string(),
                });
            }
            cur_body.push_str(raw_line);
        }

        if let Some(name) = cur_name {
            sections.push(finish_section(name, cur_body)?);
        } else if !preamble.is_empty() {
            sections.push(Section::Preamble(preamble));
        }

        Ok(RcFile { sections })
    }

    pub fn load(path: &Path) -> Result<RcFile, ConfigError> {
        let text = fs::read_to_string(path)?;
        RcFile::parse(&text)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        fs::write(path, self.render())?;
        Ok(())
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            match section {
                Section::Preamble(raw) => out.push_str(raw),
                Section::Foreign { name, raw } => {
                    let _ = writeln!(out, "[{}]", name);
                    out.push_str(raw);
                }
                Section::Known { name, lines } => {
                    let _ = writeln!(out, "[{}]", name);
                    for line in lines {
                        match line {
                            Line::Assign(k, v) => {
                                let _ = writeln!(out, "{} = {}", k, v);
                            }
                            Line::List(items) => {
                                let _ = writeln!(out, "{}", items.join(" "));
                            }
                        }
                    }
                }
            }
        }
        out
    }

    /// Value of `key = value` within a known section, if present.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.lines(section)?.iter().find_map(|l| match l {
            Line::Assign(k, v) if k.eq_ignore_ascii_case(key) => Some(v.as_str()),
            _ => None,
        })
    }

    /// All whitespace-separated tokens across every list line in a section,
    /// in file order (used for `NETWORK ORDER`-shaped sections).
    pub fn list_tokens(&self, section: &str) -> Vec<&str> {
        self.lines(section)
            .map(|lines| {
                lines
                    .iter()
                    .filter_map(|l| match l {
                        Line::List(items) => Some(items.iter().map(String::as_str)),
                        _ => None,
                    })
                    .flatten()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn lines(&self, section: &str) -> Option<&[Line]> {
        self.sections.iter().find_map(|s| match s {
            Section::Known { name, lines } if name.eq_ignore_ascii_case(section) => {
                Some(lines.as_slice())
            }
            _ => None,
        })
    }

    /// Replace (or append) a known section's body wholesale.
    pub fn set_section(&mut self, name: &str, lines: Vec<Line>) {
        if let Some(existing) = self.sections.iter_mut().find_map(|s| match s {
            Section::Known { name: n, lines: l } if n.eq_ignore_ascii_case(name) => Some(l),
            _ => None,
        }) {
            *existing = lines;
        } else {
            self.sections.push(Section::Known {
                name: name.to_string(),
                lines,
            });
        }
    }

    /// Names of sections not recognized by this crate, in file order.
    pub fn foreign_sections(&self) -> Vec<&str> {
        self.sections
            .iter()
            .filter_map(|s| match s {
                Section::Foreign { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

fn parse_header(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.starts_with('[') && line.ends_with(']') && line.len() >= 2 {
        Some(&line[1..line.len() - 1])
    } else {
        None
    }
}

fn finish_section(name: String, body: String) -> Result<Section, ConfigError> {
    if is_known(&name) {
        let mut lines = Vec::new();
        for raw_line in body.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some((k, v)) = line.split_once('=') {
                lines.push(Line::Assign(k.trim().to_string(), v.trim().to_string()));
            } else {
                lines.push(Line::List(
                    line.split_whitespace().map(str::to_string).collect(),
                ));
            }
        }
        Ok(Section::Known { name, lines })
    } else {
        Ok(Section::Foreign { name, raw: body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_assign_and_list_sections() {
        let text = "[ACQUISITION]\nmode = cyclic_02\nstop_phase = monitor\n\n[NETWORK ORDER]\n0x0dc1 0x0d94\n0x1234\n";
        let rc = RcFile::parse(text).unwrap();
        assert_eq!(rc.get("ACQUISITION", "mode"), Some("cyclic_02"));
        assert_eq!(
            rc.list_tokens("NETWORK ORDER"),
            vec!["0x0dc1", "0x0d94", "0x1234"]
        );
    }

    #[test]
    fn preserves_foreign_sections_verbatim_on_rewrite() {
        let text = "[VERSION]\nsw_version = 1\n\n[SOME FUTURE PLUGIN]\nweird stuff = !@#$\nmulti\nline\n\n[DATABASE]\ndir = /var/epg\n";
        let rc = RcFile::parse(text).unwrap();
        assert_eq!(rc.foreign_sections(), vec!["SOME FUTURE PLUGIN"]);
        let rendered = rc.render();
        assert!(rendered.contains("[SOME FUTURE PLUGIN]\nweird stuff = !@#$\nmulti\nline\n\n"));
        // Round trip again and confirm it's still preserved, byte for byte.
        let rc2 = RcFile::parse(&rendered).unwrap();
        assert_eq!(rc2.render(), rendered);
    }

    #[test]
    fn rejects_content_before_first_header_mixed_with_sections() {
        let text = "garbage\n[VERSION]\nsw_version=1\n";
        // Leading preamble text alone is tolerated (and preserved), not an error.
        let rc = RcFile::parse(text).unwrap();
        assert_eq!(rc.get("VERSION", "sw_version"), Some("1"));
    }
}
