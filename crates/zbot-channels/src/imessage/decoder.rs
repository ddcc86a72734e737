//! Recovers message text from chat.db rows.
//!
//! Rich messages leave `message.text` empty and store the body as an
//! `NSAttributedString` archived in Apple's typedstream format. We pull the
//! string payload out of the archive directly and fall back to scanning the
//! blob for printable ASCII runs when that does not work.

use super::chatdb::MessageRecord;

/// Runs shorter than this are ignored by the printable scan.
const MIN_PRINTABLE_RUN: usize = 4;

/// Archive artifacts that show up as printable runs but are never content.
const ARTIFACT_DENYLIST: &[&str] = &[
    "streamtyped",
    "NSAttributedString",
    "NSObject",
    "NSString",
    "__kIMMessagePartAttributeName",
];

const TYPEDSTREAM_HEADER: &[u8] = b"\x04\x0bstreamtyped";
const STRING_CLASS: &[u8] = b"NSString";
/// Bytes searched after the class name for the `+` string type marker.
const TYPE_MARKER_WINDOW: usize = 8;

const LENGTH_U16: u8 = 0x81;
const LENGTH_U32: u8 = 0x82;

/// Result of decoding the archived string payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuredText {
    Decoded(String),
    /// The archive parsed but held no text.
    Empty,
    /// Not a typedstream, or the payload could not be read.
    Failed,
}

/// Best-effort plain text of a message; empty when nothing is recoverable.
pub fn extract_text(record: &MessageRecord) -> String {
    let text = record.text.as_deref().unwrap_or_default().trim();
    if !text.is_empty() {
        return text.to_string();
    }

    match record.attributed_body.as_deref() {
        Some(blob) if !blob.is_empty() => decode_attributed_body(blob),
        _ => String::new(),
    }
}

/// Decode an `attributedBody` blob, falling back to the printable scan.
pub fn decode_attributed_body(blob: &[u8]) -> String {
    match decode_typedstream(blob) {
        StructuredText::Decoded(text) => text,
        StructuredText::Empty | StructuredText::Failed => scan_printable(blob),
    }
}

/// Read the `NSString` payload out of a typedstream archive.
pub fn decode_typedstream(blob: &[u8]) -> StructuredText {
    if !blob.starts_with(TYPEDSTREAM_HEADER) {
        return StructuredText::Failed;
    }

    let Some(class_at) = find(blob, STRING_CLASS) else {
        return StructuredText::Failed;
    };
    let after_class = class_at + STRING_CLASS.len();
    let window_end = (after_class + TYPE_MARKER_WINDOW).min(blob.len());
    let Some(marker) = blob[after_class..window_end].iter().position(|&b| b == b'+') else {
        return StructuredText::Failed;
    };

    let Some((len, start)) = read_length(blob, after_class + marker + 1) else {
        return StructuredText::Failed;
    };
    let Some(payload) = start.checked_add(len).and_then(|end| blob.get(start..end)) else {
        return StructuredText::Failed;
    };

    match std::str::from_utf8(payload) {
        Ok(s) if s.trim().is_empty() => StructuredText::Empty,
        Ok(s) => StructuredText::Decoded(s.trim().to_string()),
        Err(_) => StructuredText::Failed,
    }
}

/// Decode a typedstream integer at `pos`; returns the value and the offset
/// just past it.
fn read_length(blob: &[u8], pos: usize) -> Option<(usize, usize)> {
    match *blob.get(pos)? {
        LENGTH_U16 => {
            let bytes = blob.get(pos + 1..pos + 3)?;
            Some((u16::from_le_bytes([bytes[0], bytes[1]]) as usize, pos + 3))
        }
        LENGTH_U32 => {
            let bytes = blob.get(pos + 1..pos + 5)?;
            let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            Some((usize::try_from(len).ok()?, pos + 5))
        }
        b if b < 0x80 => Some((b as usize, pos + 1)),
        _ => None,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Longest printable-ASCII run in `blob` that is not an archive artifact.
///
/// Ties go to the run seen first.
pub fn scan_printable(blob: &[u8]) -> String {
    let mut best: Option<String> = None;

    for run in blob.split(|b| !(0x20..=0x7e).contains(b)) {
        if run.len() < MIN_PRINTABLE_RUN {
            continue;
        }
        let decoded = String::from_utf8_lossy(run);
        let candidate = decoded.trim();
        if candidate.is_empty() || ARTIFACT_DENYLIST.contains(&candidate) {
            continue;
        }
        if best.as_ref().is_none_or(|b| candidate.len() > b.len()) {
            best = Some(candidate.to_string());
        }
    }

    best.unwrap_or_default()
}
