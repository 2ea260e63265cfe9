//! Controller write filter for GRBL-HAL
//!
//! Intercepts in-band directives (`%wait`, hook markers, `%pause_start`,
//! variable assignments), substitutes `[expr]` values, and applies the
//! program-pause, tool-change and rotary rules before a line is written.

use std::ops::Range;
use std::sync::OnceLock;

use halstream_core::data::{Axis, HoldReason};
use halstream_core::units::{format_trimmed, MM_PER_INCH};
use halstream_core::MeasurementSystem;
use halstream_settings::ToolChangeOption;
use regex::Regex;

use super::constants::{
    GCODE_START, PAUSE_START, POSTHOOK_COMPLETE, PREHOOK_COMPLETE, WAIT, WAIT_DWELL,
};
use crate::expression::ExpressionScope;
use crate::streaming::{DataFilter, FilterAction, FilterContext, FilterOutcome, FilterTarget};

static COMMENT_REGEX: OnceLock<Regex> = OnceLock::new();
static SETTING_WRITE_REGEX: OnceLock<Regex> = OnceLock::new();

fn comment_regex() -> &'static Regex {
    COMMENT_REGEX.get_or_init(|| Regex::new(r"\([^)]*\)|;.*").expect("invalid comment regex"))
}

fn setting_write_regex() -> &'static Regex {
    SETTING_WRITE_REGEX
        .get_or_init(|| Regex::new(r"^\$(13)=(\d+)").expect("invalid setting write regex"))
}

/// One G-code word outside any comment
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Word {
    /// Upper-cased letter
    pub letter: char,
    pub value: String,
    /// Byte range of the word in the source line
    pub span: Range<usize>,
}

impl Word {
    fn number(&self) -> Option<f64> {
        self.value.parse().ok()
    }

    fn is(&self, letter: char, number: f64) -> bool {
        self.letter == letter && self.number() == Some(number)
    }
}

/// Split a line into letter/number words, skipping `(...)` and `;` comments
///
/// Words need no separating whitespace, so `T1M6` is two words.
pub(crate) fn words(line: &str) -> Vec<Word> {
    let mut result = Vec::new();
    let mut chars = line.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        match c {
            '(' => {
                for (_, c) in chars.by_ref() {
                    if c == ')' {
                        break;
                    }
                }
            }
            ';' => break,
            c if c.is_ascii_alphabetic() => {
                let mut value = String::new();
                let mut end = start + 1;
                while let Some(&(i, next)) = chars.peek() {
                    if next.is_ascii_digit() || matches!(next, '.' | '-' | '+') {
                        value.push(next);
                        end = i + 1;
                    } else if !(value.is_empty() && next.is_whitespace()) {
                        break;
                    }
                    chars.next();
                }
                result.push(Word {
                    letter: c.to_ascii_uppercase(),
                    value,
                    span: start..end,
                });
            }
            _ => {}
        }
    }
    result
}

/// Replace word spans, given in line order, with new text
fn rewrite(line: &str, replacements: Vec<(Range<usize>, String)>) -> String {
    let mut output = String::with_capacity(line.len() + 8);
    let mut cursor = 0;
    for (span, text) in replacements {
        output.push_str(&line[cursor..span.start]);
        output.push_str(&text);
        cursor = span.end;
    }
    output.push_str(&line[cursor..]);
    output
}

/// G-code with comments removed, for word detection
pub fn strip_comments(line: &str) -> String {
    comment_regex().replace_all(line, "").trim().to_string()
}

/// Text of the first comment on a line
pub fn extract_comment(line: &str) -> Option<String> {
    let found = comment_regex().find(line)?.as_str();
    let text = found
        .trim_start_matches(['(', ';'])
        .trim_end_matches(')')
        .trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Policy the filter applies to tool changes, pauses and rotary moves
#[derive(Debug, Clone)]
pub struct LineFilterOptions {
    pub tool_change: ToolChangeOption,
    pub rotary: bool,
    pub program_pause_min_lines: usize,
}

impl Default for LineFilterOptions {
    fn default() -> Self {
        Self {
            tool_change: ToolChangeOption::Ignore,
            rotary: false,
            program_pause_min_lines: 2,
        }
    }
}

/// The controller's [`DataFilter`]
#[derive(Debug, Default)]
pub struct LineFilter {
    options: LineFilterOptions,
    scope: ExpressionScope,
}

impl LineFilter {
    pub fn new(options: LineFilterOptions) -> Self {
        Self {
            options,
            scope: ExpressionScope::new(),
        }
    }

    pub fn options(&self) -> &LineFilterOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut LineFilterOptions {
        &mut self.options
    }

    pub fn scope(&self) -> &ExpressionScope {
        &self.scope
    }

    pub fn scope_mut(&mut self) -> &mut ExpressionScope {
        &mut self.scope
    }

    fn directive(&mut self, line: &str, context: &FilterContext) -> FilterOutcome {
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let comment = extract_comment(rest).or_else(|| (!rest.is_empty()).then(|| rest.to_string()));

        match word {
            WAIT => FilterOutcome::pass(WAIT_DWELL),
            PREHOOK_COMPLETE => {
                FilterOutcome::swallow().with_action(FilterAction::PreHookComplete { comment })
            }
            POSTHOOK_COMPLETE => FilterOutcome::swallow().with_action(FilterAction::PostHookComplete),
            PAUSE_START => {
                let reason = HoldReason::new(PAUSE_START).with_comment(comment);
                FilterOutcome::swallow().with_action(pause_action(context.target, reason))
            }
            GCODE_START => FilterOutcome::swallow().with_action(FilterAction::ProgramStart),
            _ => {
                let body = &line[1..];
                let lookup = |name: &str| lookup_variable(context, name);
                match self.scope.assign(body, &lookup) {
                    Ok(assigned) => tracing::debug!("Assigned {:?}", assigned),
                    Err(e) => tracing::warn!("Ignoring directive '{}': {}", line, e),
                }
                FilterOutcome::swallow()
            }
        }
    }
}

fn pause_action(target: FilterTarget, reason: HoldReason) -> FilterAction {
    match target {
        FilterTarget::Sender => FilterAction::PauseWorkflow(reason),
        FilterTarget::Feeder => FilterAction::Hold(reason),
    }
}

/// Resolve a variable from line context, then machine position and tool
pub fn lookup_variable(context: &FilterContext, name: &str) -> Option<f64> {
    if let Some(value) = context.line_context.get(name) {
        return Some(*value);
    }
    if name == "tool" {
        return Some(context.tool as f64);
    }
    let axis_value = |prefix: &str, position: &halstream_core::data::Position| {
        let letter = name.strip_prefix(prefix)?;
        let mut chars = letter.chars();
        let axis = Axis::from_letter(chars.next()?)?;
        if chars.next().is_some() {
            return None;
        }
        Some(position.value(axis))
    };
    axis_value("mpos", &context.mpos).or_else(|| axis_value("pos", &context.wpos))
}

/// Rewrite A words as Y words for a rotary axis wired to the Y driver
///
/// Lines that already carry a Y word are left untouched.
pub fn translate_rotary(line: &str, units: MeasurementSystem) -> String {
    let words = words(line);
    if words.iter().any(|w| w.letter == 'Y') {
        return line.to_string();
    }
    let imperial = units == MeasurementSystem::Imperial || words.iter().any(|w| w.is('G', 20.0));
    let replacements: Vec<_> = words
        .into_iter()
        .filter(|w| w.letter == 'A')
        .filter_map(|w| {
            let value = w.number()?;
            let value = if imperial { value / MM_PER_INCH } else { value };
            Some((w.span, format!("Y{}", format_trimmed(value, 4))))
        })
        .collect();
    if replacements.is_empty() {
        return line.to_string();
    }
    rewrite(line, replacements)
}

impl DataFilter for LineFilter {
    fn filter(&mut self, line: &str, context: &FilterContext) -> FilterOutcome {
        let line = line.trim();
        if line.starts_with('%') {
            return self.directive(line, context);
        }

        let lookup = |name: &str| lookup_variable(context, name);
        let mut output = match self.scope.substitute(line, &lookup) {
            Ok(substituted) => substituted,
            Err(e) => {
                tracing::warn!("Expression in '{}' not evaluated: {}", line, e);
                line.to_string()
            }
        };
        let mut outcome = FilterOutcome::default();
        let code = strip_comments(&output);
        let comment = extract_comment(&output);

        if let Some(caps) = setting_write_regex().captures(&code) {
            outcome.actions.push(FilterAction::SettingWrite {
                name: format!("${}", &caps[1]),
                value: caps[2].to_string(),
            });
        }

        let words = words(&output);

        if let Some(word) = words.iter().find(|w| w.is('M', 0.0) || w.is('M', 1.0)) {
            let data = if word.is('M', 0.0) { "M0" } else { "M1" };
            let reason = HoldReason::new(data).with_comment(comment.clone());
            match context.target {
                FilterTarget::Sender if context.sent < self.options.program_pause_min_lines => {
                    tracing::debug!("Ignoring early {} at line {}", reason.data, context.sent);
                }
                target => outcome.actions.push(pause_action(target, reason)),
            }
        }

        let tool_changes: Vec<_> = words
            .iter()
            .filter(|w| w.is('M', 6.0))
            .map(|w| (w.span.clone(), format!("({})", &output[w.span.clone()])))
            .collect();
        if !tool_changes.is_empty() {
            let tool = words
                .iter()
                .find(|w| w.letter == 'T')
                .and_then(|w| w.value.parse().ok());
            output = rewrite(&output, tool_changes);

            if self.options.tool_change != ToolChangeOption::Ignore {
                let reason = HoldReason::new("M6")
                    .with_message("Tool change")
                    .with_comment(comment.clone());
                outcome.actions.push(pause_action(context.target, reason));
                outcome.actions.push(FilterAction::ToolChange {
                    tool,
                    line: line.to_string(),
                });
            }
        }

        if self.options.rotary {
            output = translate_rotary(&output, context.units);
        }

        outcome.line = output;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halstream_core::data::Position;

    fn sender_ctx(sent: usize) -> FilterContext {
        FilterContext {
            target: FilterTarget::Sender,
            sent,
            ..Default::default()
        }
    }

    #[test]
    fn test_wait_becomes_dwell() {
        let mut filter = LineFilter::default();
        let outcome = filter.filter("%wait", &FilterContext::default());
        assert_eq!(outcome.line, "G4 P0.5");
    }

    #[test]
    fn test_hook_markers_are_swallowed() {
        let mut filter = LineFilter::default();
        let outcome = filter.filter("%pre_complete (probe tool)", &FilterContext::default());
        assert!(outcome.line.is_empty());
        assert_eq!(
            outcome.actions,
            vec![FilterAction::PreHookComplete {
                comment: Some("probe tool".to_string())
            }]
        );
        let outcome = filter.filter("%toolchange_complete", &FilterContext::default());
        assert_eq!(outcome.actions, vec![FilterAction::PostHookComplete]);
        let outcome = filter.filter("%_GCODE_START", &FilterContext::default());
        assert_eq!(outcome.actions, vec![FilterAction::ProgramStart]);
    }

    #[test]
    fn test_pause_start_targets() {
        let mut filter = LineFilter::default();
        let outcome = filter.filter("%pause_start", &sender_ctx(0));
        assert!(matches!(outcome.actions[0], FilterAction::PauseWorkflow(_)));
        let outcome = filter.filter("%pause_start", &FilterContext::default());
        assert!(matches!(outcome.actions[0], FilterAction::Hold(_)));
    }

    #[test]
    fn test_assignment_then_substitution() {
        let mut filter = LineFilter::default();
        let context = FilterContext {
            wpos: Position::new().with(Axis::Z, "-2.000"),
            ..Default::default()
        };
        assert!(filter.filter("%safe = posz + 5", &context).line.is_empty());
        assert_eq!(filter.scope().get("safe"), Some(3.0));
        assert_eq!(filter.filter("G0 Z[safe]", &context).line, "G0 Z3");
    }

    #[test]
    fn test_bad_assignment_is_swallowed() {
        let mut filter = LineFilter::default();
        let outcome = filter.filter("%x = nope +", &FilterContext::default());
        assert!(outcome.line.is_empty());
        assert!(outcome.actions.is_empty());
    }

    #[test]
    fn test_program_pause_threshold() {
        let mut filter = LineFilter::default();
        assert!(filter.filter("M0", &sender_ctx(1)).actions.is_empty());
        let outcome = filter.filter("M0 (check clamps)", &sender_ctx(5));
        match &outcome.actions[..] {
            [FilterAction::PauseWorkflow(reason)] => {
                assert_eq!(reason.data, "M0");
                assert_eq!(reason.comment.as_deref(), Some("check clamps"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(outcome.line, "M0 (check clamps)");
        assert!(filter.filter("M30", &sender_ctx(5)).actions.is_empty());
        assert!(filter.filter("M01", &FilterContext::default()).hold_reason().is_some());
    }

    #[test]
    fn test_tool_change_ignore_comments_out() {
        let mut filter = LineFilter::default();
        let outcome = filter.filter("T2 M6", &sender_ctx(10));
        assert_eq!(outcome.line, "T2 (M6)");
        assert!(outcome.actions.is_empty());
        assert_eq!(filter.filter("M60", &sender_ctx(10)).line, "M60");
    }

    #[test]
    fn test_tool_change_code_pauses() {
        let mut filter = LineFilter::new(LineFilterOptions {
            tool_change: ToolChangeOption::Code,
            ..Default::default()
        });
        let outcome = filter.filter("M6 T3", &sender_ctx(10));
        assert_eq!(outcome.line, "(M6) T3");
        assert!(matches!(outcome.actions[0], FilterAction::PauseWorkflow(_)));
        assert_eq!(
            outcome.actions[1],
            FilterAction::ToolChange {
                tool: Some(3),
                line: "M6 T3".to_string()
            }
        );
    }

    #[test]
    fn test_unspaced_words_are_recognized() {
        let mut filter = LineFilter::default();
        let outcome = filter.filter("T1M6", &sender_ctx(10));
        assert_eq!(outcome.line, "T1(M6)");
        assert!(outcome.actions.is_empty());

        let outcome = filter.filter("G0X0M0", &sender_ctx(10));
        match &outcome.actions[..] {
            [FilterAction::PauseWorkflow(reason)] => assert_eq!(reason.data, "M0"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(filter.filter("G0X0M30", &sender_ctx(10)).actions.is_empty());

        let mut filter = LineFilter::new(LineFilterOptions {
            tool_change: ToolChangeOption::Code,
            ..Default::default()
        });
        let outcome = filter.filter("T4M06", &sender_ctx(10));
        assert_eq!(outcome.line, "T4(M06)");
        assert_eq!(
            outcome.actions[1],
            FilterAction::ToolChange {
                tool: Some(4),
                line: "T4M06".to_string()
            }
        );
    }

    #[test]
    fn test_tool_change_leaves_comments_alone() {
        let mut filter = LineFilter::default();
        let outcome = filter.filter("M6 (load M6 tool)", &sender_ctx(10));
        assert_eq!(outcome.line, "(M6) (load M6 tool)");
        let outcome = filter.filter("G0 Z5 (M6 later)", &sender_ctx(10));
        assert_eq!(outcome.line, "G0 Z5 (M6 later)");
        assert!(filter.filter("G0 ; M0 here", &sender_ctx(10)).actions.is_empty());
    }

    #[test]
    fn test_words_split() {
        let letters: Vec<_> = words("g1x-2.5 Y 3(c M6)f100")
            .into_iter()
            .map(|w| (w.letter, w.value))
            .collect();
        assert_eq!(
            letters,
            vec![
                ('G', "1".to_string()),
                ('X', "-2.5".to_string()),
                ('Y', "3".to_string()),
                ('F', "100".to_string()),
            ]
        );
    }

    #[test]
    fn test_setting_write_detected() {
        let mut filter = LineFilter::default();
        let outcome = filter.filter("$13=1", &FilterContext::default());
        assert_eq!(
            outcome.actions,
            vec![FilterAction::SettingWrite {
                name: "$13".to_string(),
                value: "1".to_string()
            }]
        );
    }

    #[test]
    fn test_rotary_translation() {
        assert_eq!(translate_rotary("G0 A90", MeasurementSystem::Metric), "G0 Y90");
        assert_eq!(
            translate_rotary("G1 A25.4 F100", MeasurementSystem::Imperial),
            "G1 Y1 F100"
        );
        assert_eq!(translate_rotary("G0 Y5 A90", MeasurementSystem::Metric), "G0 Y5 A90");
        assert_eq!(translate_rotary("G0 X1", MeasurementSystem::Metric), "G0 X1");
        assert_eq!(translate_rotary("G0 X1Y2 A90", MeasurementSystem::Metric), "G0 X1Y2 A90");
        assert_eq!(translate_rotary("G0X1A90", MeasurementSystem::Metric), "G0X1Y90");
        assert_eq!(
            translate_rotary("G0 A90 (A axis)", MeasurementSystem::Metric),
            "G0 Y90 (A axis)"
        );

        let mut filter = LineFilter::new(LineFilterOptions {
            rotary: true,
            ..Default::default()
        });
        assert_eq!(filter.filter("G0 A-45", &sender_ctx(3)).line, "G0 Y-45");
        assert_eq!(filter.filter("G0 A-45", &FilterContext::default()).line, "G0 Y-45");
    }

    #[test]
    fn test_comment_helpers() {
        assert_eq!(strip_comments("G0 X1 (move) ; done"), "G0 X1");
        assert_eq!(extract_comment("M0 ; change bit").as_deref(), Some("change bit"));
        assert_eq!(extract_comment("M0"), None);
    }
}
