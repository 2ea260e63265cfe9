//! Start-from-line recovery
//!
//! Resuming a program mid-file needs the machine to be in the state the
//! skipped lines would have left it in. The skipped prefix is scanned for
//! modal words, the last absolute X/Y/Z, feed, spindle and coolant, and a
//! catch-up preamble is produced. The preamble ends with `%_GCODE_START` so
//! the controller knows when the real stream can resume.

use halstream_core::data::{normalize_word, ModalGroup, ModalState};
use halstream_core::error::GcodeError;
use halstream_core::units::format_trimmed;

use super::constants::GCODE_START;
use super::filter::{strip_comments, words};

/// Machine Z used to clear the work before moving to the start point
pub const DEFAULT_SAFE_MACHINE_Z: f64 = -1.0;

/// Machine state implied by the lines before the start line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramState {
    pub modal: ModalState,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub feedrate: Option<f64>,
    pub spindle_speed: Option<f64>,
    /// Active coolant words, `M7` and/or `M8`
    pub coolant: Vec<String>,
}

/// Fold the first `count` lines into a [`ProgramState`]
pub fn scan(lines: &[String], count: usize) -> ProgramState {
    let mut state = ProgramState::default();
    state.modal.set(ModalGroup::Distance, "G90");

    for line in lines.iter().take(count) {
        let code = strip_comments(line);
        if code.is_empty() || code.starts_with('%') || code.starts_with('$') {
            continue;
        }
        let words = words(&code);
        let machine_coordinates = words.iter().any(|w| w.letter == 'G' && w.value == "53");

        for word in &words {
            let (letter, value) = (word.letter, &word.value);
            match letter {
                'G' | 'M' => {
                    let Some(word) = normalize_word(&format!("{}{}", letter, value)) else {
                        continue;
                    };
                    match ModalGroup::classify(&word) {
                        Some(ModalGroup::Coolant) => {
                            if word == "M9" {
                                state.coolant.clear();
                            } else if !state.coolant.contains(&word) {
                                state.coolant.push(word.clone());
                            }
                            state.modal.set(ModalGroup::Coolant, state.coolant.join(","));
                        }
                        Some(ModalGroup::Program) => {}
                        Some(group) => state.modal.set(group, word),
                        None => {}
                    }
                }
                'F' => state.feedrate = value.parse().ok().or(state.feedrate),
                'S' => state.spindle_speed = value.parse().ok().or(state.spindle_speed),
                'X' | 'Y' | 'Z' if !machine_coordinates => {
                    let absolute = state.modal.distance != "G91";
                    let Ok(v) = value.parse::<f64>() else {
                        continue;
                    };
                    let target = match letter {
                        'X' => &mut state.x,
                        'Y' => &mut state.y,
                        _ => &mut state.z,
                    };
                    *target = if absolute {
                        Some(v)
                    } else {
                        target.map(|current| current + v)
                    };
                }
                _ => {}
            }
        }
    }
    state
}

/// Catch-up G-code for resuming at zero-based `start_line`
pub fn build_preamble(
    lines: &[String],
    start_line: usize,
    safe_machine_z: f64,
) -> Result<Vec<String>, GcodeError> {
    if start_line >= lines.len() {
        return Err(GcodeError::StartLineOutOfRange {
            line: start_line,
            total: lines.len(),
        });
    }

    let state = scan(lines, start_line);
    let modal = &state.modal;
    let fmt = |v: f64| format_trimmed(v, 4);
    let mut preamble = Vec::new();

    let units = if modal.units.is_empty() { "G21" } else { modal.units.as_str() };
    let mut setup = vec![units.to_string()];
    for group in [ModalGroup::Wcs, ModalGroup::Plane, ModalGroup::Feedrate] {
        let word = modal.get(group);
        if !word.is_empty() {
            setup.push(word.to_string());
        }
    }
    setup.push("G90".to_string());
    preamble.push(setup.join(" "));
    preamble.push(format!("G53 G0 Z{}", fmt(safe_machine_z)));

    match modal.spindle.as_str() {
        word @ ("M3" | "M4") => match state.spindle_speed {
            Some(speed) => preamble.push(format!("{} S{}", word, fmt(speed))),
            None => preamble.push(word.to_string()),
        },
        _ => {}
    }
    preamble.extend(state.coolant.iter().cloned());

    let xy: Vec<String> = [('X', state.x), ('Y', state.y)]
        .into_iter()
        .filter_map(|(letter, value)| value.map(|v| format!("{}{}", letter, fmt(v))))
        .collect();
    if !xy.is_empty() {
        preamble.push(format!("G0 {}", xy.join(" ")));
    }
    if let Some(z) = state.z {
        match state.feedrate {
            Some(f) => preamble.push(format!("G1 Z{} F{}", fmt(z), fmt(f))),
            None => preamble.push(format!("G0 Z{}", fmt(z))),
        }
    }

    let mut restore = Vec::new();
    if modal.distance == "G91" {
        restore.push("G91".to_string());
    }
    if !modal.motion.is_empty() {
        restore.push(modal.motion.clone());
    }
    if let Some(f) = state.feedrate {
        restore.push(format!("F{}", fmt(f)));
    }
    if !restore.is_empty() {
        preamble.push(restore.join(" "));
    }

    preamble.push(GCODE_START.to_string());
    Ok(preamble)
}
