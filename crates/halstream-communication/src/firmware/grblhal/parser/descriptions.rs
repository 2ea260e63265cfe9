//! `$ES`, `$EG`, `$EA` and `$EE` description frames.

use halstream_core::data::{CodeDescription, SettingDescription, SettingGroup};
use serde::{Deserialize, Serialize};

use super::Frame;

/// Firmware-provided metadata row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Description {
    /// `[SETTING:id|group|label|unit|type|format|min|max]`
    Setting(SettingDescription),
    /// `[SETTINGGROUP:id|parent|label]`
    Group(SettingGroup),
    /// `[ALARMCODE:code|name|description]`
    Alarm(CodeDescription),
    /// `[ERRORCODE:code|name|description]`
    Error(CodeDescription),
}

fn fields<'a>(line: &'a str, tag: &str) -> Option<Vec<&'a str>> {
    let body = line
        .strip_prefix('[')?
        .strip_suffix(']')?
        .strip_prefix(tag)?
        .strip_prefix(':')?;
    Some(body.split('|').collect())
}

fn field(parts: &[&str], index: usize) -> String {
    parts.get(index).map(|s| s.trim().to_string()).unwrap_or_default()
}

fn code_description(parts: &[&str]) -> Option<CodeDescription> {
    Some(CodeDescription {
        code: parts.first()?.trim().parse().ok()?,
        name: field(parts, 1),
        description: field(parts, 2),
    })
}

/// Match any of the four description shapes
pub fn parse(line: &str) -> Option<Frame> {
    if let Some(parts) = fields(line, "SETTINGGROUP") {
        let group = SettingGroup {
            id: parts.first()?.trim().parse().ok()?,
            parent: parts.get(1).and_then(|v| v.trim().parse().ok()).unwrap_or(0),
            label: field(&parts, 2),
        };
        return Some(Frame::Description(Description::Group(group)));
    }

    if let Some(parts) = fields(line, "SETTING") {
        let description = SettingDescription {
            id: parts.first()?.trim().parse().ok()?,
            group: parts.get(1).and_then(|v| v.trim().parse().ok()).unwrap_or(0),
            label: field(&parts, 2),
            unit: field(&parts, 3),
            data_type: parts.get(4).and_then(|v| v.trim().parse().ok()).unwrap_or(0),
            format: field(&parts, 5),
            min: field(&parts, 6),
            max: field(&parts, 7),
        };
        return Some(Frame::Description(Description::Setting(description)));
    }

    if let Some(parts) = fields(line, "ALARMCODE") {
        return code_description(&parts).map(|d| Frame::Description(Description::Alarm(d)));
    }

    if let Some(parts) = fields(line, "ERRORCODE") {
        return code_description(&parts).map(|d| Frame::Description(Description::Error(d)));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn description(line: &str) -> Description {
        match parse(line) {
            Some(Frame::Description(d)) => d,
            other => panic!("expected description for {}, got {:?}", line, other),
        }
    }

    #[test]
    fn test_setting_description() {
        let Description::Setting(d) =
            description("[SETTING:130|5|X-axis maximum travel|mm|6|#####0.000|0|]")
        else {
            panic!("wrong kind");
        };
        assert_eq!(d.id, 130);
        assert_eq!(d.group, 5);
        assert_eq!(d.label, "X-axis maximum travel");
        assert_eq!(d.unit, "mm");
        assert_eq!(d.data_type, 6);
        assert_eq!(d.max, "");
    }

    #[test]
    fn test_group_is_not_mistaken_for_setting() {
        assert_eq!(
            description("[SETTINGGROUP:5|0|Axes]"),
            Description::Group(SettingGroup {
                id: 5,
                parent: 0,
                label: "Axes".to_string()
            })
        );
    }

    #[test]
    fn test_alarm_and_error_codes() {
        assert_eq!(
            description("[ALARMCODE:1||Hard limit has been triggered.]"),
            Description::Alarm(CodeDescription {
                code: 1,
                name: String::new(),
                description: "Hard limit has been triggered.".to_string()
            })
        );
        assert!(matches!(
            description("[ERRORCODE:22|Undefined feed rate|Feed rate has not yet been set.]"),
            Description::Error(CodeDescription { code: 22, .. })
        ));
        assert!(parse("[ERRORCODE:x|y|z]").is_none());
        assert!(parse("[SETTINGS:1]").is_none());
    }
}
