//! `[GC:...]` parser state parsing.

use halstream_core::data::{normalize_word, ModalGroup};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Frame;

/// Decoded `$G` report
///
/// Words are accumulated per group in arrival order; a malformed report
/// may list the same group twice.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParserStateReport {
    /// Modal words by group
    pub groups: BTreeMap<ModalGroup, Vec<String>>,
    /// `T` word
    pub tool: Option<u32>,
    /// `F` word
    pub feedrate: Option<String>,
    /// `S` word
    pub spindle: Option<String>,
}

/// Match `[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]`
pub fn parse(line: &str) -> Option<Frame> {
    let body = line.strip_prefix("[GC:")?.strip_suffix(']')?;
    let mut report = ParserStateReport::default();

    for word in body.split_whitespace() {
        let Some(letter) = word.chars().next() else {
            continue;
        };
        let value = &word[letter.len_utf8()..];
        match letter.to_ascii_uppercase() {
            'T' => report.tool = value.parse().ok(),
            'F' => report.feedrate = Some(value.to_string()),
            'S' => report.spindle = Some(value.to_string()),
            _ => {
                let Some(normalized) = normalize_word(word) else {
                    continue;
                };
                match ModalGroup::classify(&normalized) {
                    Some(group) => report.groups.entry(group).or_default().push(normalized),
                    None => tracing::trace!("Ignoring parser state word {}", word),
                }
            }
        }
    }

    Some(Frame::ParserState(report))
}
