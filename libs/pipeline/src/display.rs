use std::fmt::Write as _;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;

use pubsub_api::{Attributes, InboundMessage, format_timestamp};

use crate::config::OutputMode;
use crate::error::ReceiveError;

const MARKER: &str = ".";
const RULE: char = '─';
const END_GLYPH: &str = "◆";
const MAX_KEY_WIDTH: usize = 40;

/// Rendering chosen for one receive invocation, after quiet composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Display {
    /// Nothing is written per message.
    Silent,
    /// One progress marker per message.
    Marker,
    Json,
    Pretty { verbose: bool },
}

impl Display {
    /// Quiet level 2+ wins over everything, quiet level 1 and `none` both
    /// degrade to markers.
    pub fn resolve(output: OutputMode, quiet: u8, verbose: bool) -> Self {
        match (quiet, output) {
            (q, _) if q > 1 => Display::Silent,
            (1, _) | (_, OutputMode::None) => Display::Marker,
            (_, OutputMode::Json) => Display::Json,
            (_, OutputMode::Pretty) => Display::Pretty { verbose },
        }
    }

    pub fn emits_markers(&self) -> bool {
        matches!(self, Display::Marker)
    }

    pub fn render(&self, message: &InboundMessage) -> Result<String, ReceiveError> {
        Ok(match self {
            Display::Silent => String::new(),
            Display::Marker => MARKER.to_string(),
            Display::Json => {
                let mut line = serde_json::to_string(&Envelope::from(message))?;
                line.push('\n');
                line
            }
            Display::Pretty { verbose } => pretty(message, *verbose),
        })
    }
}

fn pretty(message: &InboundMessage, verbose: bool) -> String {
    let header = format!("{} @ {}", message.id, format_timestamp(&message.publish_time));
    let mut out = String::with_capacity(header.len() + message.data.len() + 64);
    out.push_str(&header);
    out.push('\n');
    if !verbose {
        return out;
    }

    let rule: String = std::iter::repeat_n(RULE, header.chars().count()).collect();
    out.push_str(&rule);
    out.push('\n');

    if !message.attributes.is_empty() {
        let width = message
            .attributes
            .keys()
            .map(|k| k.chars().count())
            .max()
            .unwrap_or(0)
            .min(MAX_KEY_WIDTH);
        for (key, value) in &message.attributes {
            let _ = writeln!(out, "{key:>width$}: {value}");
        }
        out.push_str(&rule);
        out.push('\n');
    }

    let data = String::from_utf8_lossy(&message.data);
    out.push_str(&data);
    if !data.is_empty() && !data.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(END_GLYPH);
    out.push('\n');
    out
}

// ═══════════════════════════════════════════════════════════════
//  JSON envelope
// ═══════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct Envelope<'a> {
    id: &'a str,
    publish_time: String,
    #[serde(skip_serializing_if = "str::is_empty")]
    ordering_key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    delivery_attempt: Option<u32>,
    attributes: &'a Attributes,
    data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_encoding: Option<&'static str>,
}

impl<'a> From<&'a InboundMessage> for Envelope<'a> {
    fn from(m: &'a InboundMessage) -> Self {
        let (data, data_encoding) = match std::str::from_utf8(&m.data) {
            Ok(text) => (text.to_string(), None),
            Err(_) => (STANDARD.encode(&m.data), Some("base64")),
        };
        Self {
            id: &m.id,
            publish_time: format_timestamp(&m.publish_time),
            ordering_key: &m.ordering_key,
            delivery_attempt: m.delivery_attempt,
            attributes: &m.attributes,
            data,
            data_encoding,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn message(data: &[u8], attrs: &[(&str, &str)]) -> InboundMessage {
        InboundMessage {
            id: "42".into(),
            publish_time: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            data: data.to_vec(),
            attributes: attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            ordering_key: String::new(),
            delivery_attempt: None,
        }
    }

    #[test]
    fn quiet_composition() {
        for mode in [OutputMode::None, OutputMode::Pretty, OutputMode::Json] {
            assert_eq!(Display::resolve(mode, 2, true), Display::Silent);
            assert_eq!(Display::resolve(mode, 1, false), Display::Marker);
        }
        assert_eq!(Display::resolve(OutputMode::None, 0, false), Display::Marker);
        assert_eq!(Display::resolve(OutputMode::Json, 0, true), Display::Json);
        assert_eq!(
            Display::resolve(OutputMode::Pretty, 0, true),
            Display::Pretty { verbose: true }
        );
    }

    #[test]
    fn silent_and_marker_render() {
        let m = message(b"x", &[]);
        assert_eq!(Display::Silent.render(&m).unwrap(), "");
        assert_eq!(Display::Marker.render(&m).unwrap(), ".");
        assert!(Display::Marker.emits_markers());
        assert!(!Display::Json.emits_markers());
    }

    #[test]
    fn pretty_header_only() {
        let out = Display::Pretty { verbose: false }.render(&message(b"body", &[("a", "1")])).unwrap();
        assert_eq!(out, "42 @ 2024-01-02T03:04:05.000Z\n");
    }

    #[test]
    fn pretty_verbose_aligns_attributes() {
        let out = Display::Pretty { verbose: true }
            .render(&message(b"body", &[("a", "1"), ("long", "2")]))
            .unwrap();
        let header = "42 @ 2024-01-02T03:04:05.000Z";
        let rule = "─".repeat(header.len());
        let expected = format!("{header}\n{rule}\n   a: 1\nlong: 2\n{rule}\nbody\n◆\n");
        assert_eq!(out, expected);
    }

    #[test]
    fn pretty_verbose_keeps_existing_newline() {
        let out = Display::Pretty { verbose: true }.render(&message(b"line\n", &[])).unwrap();
        assert!(out.ends_with("line\n◆\n"));
        assert_eq!(out.matches('─').count(), "42 @ 2024-01-02T03:04:05.000Z".len());
    }

    #[test]
    fn attribute_width_is_capped() {
        let key = "k".repeat(60);
        let out = Display::Pretty { verbose: true }
            .render(&message(b"", &[(key.as_str(), "v"), ("b", "w")]))
            .unwrap();
        let pad = " ".repeat(MAX_KEY_WIDTH - 1);
        assert!(out.contains(&format!("\n{pad}b: w\n")));
        assert!(out.contains(&format!("\n{key}: v\n")));
    }

    #[test]
    fn json_envelope() {
        let out = Display::Json.render(&message(b"hello", &[("ts", "123")])).unwrap();
        assert!(out.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(value["id"], "42");
        assert_eq!(value["data"], "hello");
        assert_eq!(value["attributes"]["ts"], "123");
        assert_eq!(value["publish_time"], "2024-01-02T03:04:05.000Z");
        assert!(value.get("ordering_key").is_none());
        assert!(value.get("data_encoding").is_none());
    }

    #[test]
    fn json_binary_payload_is_base64() {
        let out = Display::Json.render(&message(&[0xff, 0x00], &[])).unwrap();
        let value: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(value["data"], "/wA=");
        assert_eq!(value["data_encoding"], "base64");
    }
}
