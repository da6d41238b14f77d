//! Tag extraction over flat serial bytes.
//!
//! This is a delimiter slice, not a markup parser: `<name>` is located by
//! its first occurrence and the body runs up to the first `</name>` after
//! it. Nothing is escaped or validated, tags do not nest, and repeated
//! tags past the first are ignored. The guest may print anything, so the
//! search runs on bytes; only the summary fields are decoded, lossily.

use memchr::memmem;

use crate::error::HarnessError;

/// Sentinel reported for optional fields that are absent.
pub const NOT_FOUND: &str = "not found";

/// Extract the body of the first `<tag>` in `text`.
///
/// A missing closing delimiter yields everything after the opening one.
pub fn extract<'a>(tag: &str, text: &'a [u8]) -> Option<&'a [u8]> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = memmem::find(text, open.as_bytes())? + open.len();
    let rest = &text[start..];
    Some(match memmem::find(rest, close.as_bytes()) {
        Some(end) => &rest[..end],
        None => rest,
    })
}

/// Extract a field whose absence means the boot script never got that far.
pub fn require<'a>(tag: &'static str, text: &'a [u8]) -> Result<&'a [u8], HarnessError> {
    extract(tag, text).ok_or(HarnessError::MissingTag { tag })
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Fields pulled from a wrapped log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFields {
    pub firmware_version: String,
    pub shell_version: String,
    /// Raw `ver` output, or [`NOT_FOUND`].
    pub version_info: String,
    /// Firmware build info parsed out of `version_info`, or [`NOT_FOUND`].
    pub firmware_build: String,
    /// Program output inside `<cmd>`, decoded for display. Compare
    /// against the log bytes, not this.
    pub command_output: String,
    /// The program's own status from `<cres>`, or [`NOT_FOUND`].
    pub command_result: String,
}

impl ExtractedFields {
    /// Pull every field out of `text`. The firmware and shell versions and
    /// the command output are required; the rest fall back to
    /// [`NOT_FOUND`].
    pub fn extract(text: &[u8]) -> Result<Self, HarnessError> {
        let firmware_version = decode(require("uefiver", text)?).trim().to_string();
        let shell_version = decode(require("shellver", text)?).trim().to_string();
        let version_info = extract("ver", text).map(decode);
        let firmware_build = version_info
            .as_deref()
            .and_then(|info| firmware_build(info, &firmware_version))
            .unwrap_or(NOT_FOUND)
            .to_string();
        let command_output = decode(require("cmd", text)?);
        let command_result = extract("cres", text)
            .map(|s| decode(s).trim().to_string())
            .unwrap_or_else(|| NOT_FOUND.to_string());

        Ok(ExtractedFields {
            firmware_version,
            shell_version,
            version_info: version_info.unwrap_or_else(|| NOT_FOUND.to_string()),
            firmware_build,
            command_output,
            command_result,
        })
    }
}

/// Find `UEFI v<version>` in `info` and return what follows inside the
/// parentheses, e.g. `EDK II, 0x00010000` from
/// `UEFI v2.70 (EDK II, 0x00010000)`.
pub fn firmware_build<'a>(info: &'a str, version: &str) -> Option<&'a str> {
    let marker = format!("UEFI v{version}");
    let start = info.find(&marker)? + marker.len();
    let rest = info[start..].trim_start_matches(' ');
    let rest = rest.strip_prefix('(').unwrap_or(rest);
    let end = rest.find(')')?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"BdsDxe: starting Boot0001\r\n\
        <uefiver>2.70</uefiver>\r\n\
        <shellver>2.2</shellver>\r\n\
        <ver>\r\nUEFI Interactive Shell v2.2\r\nEDK II\r\nUEFI v2.70 (EDK II, 0x00010000)\r\n</ver>\r\n\
        <cmd>Hello, world!\r\n</cmd><cres>0x0</cres>\r\n";

    #[test]
    fn test_extract_roundtrip() {
        for body in ["", "plain", "multi\r\nline\n", "<other>nested</other>", "a < b > c"] {
            let text = format!("<x>{body}</x>");
            assert_eq!(extract("x", text.as_bytes()), Some(body.as_bytes()));
        }
    }

    #[test]
    fn test_extract_first_occurrence_only() {
        assert_eq!(extract("a", b"<a>one</a><a>two</a>"), Some(&b"one"[..]));
    }

    #[test]
    fn test_extract_missing_open() {
        assert_eq!(extract("a", b"no tags here </a>"), None);
        assert!(matches!(
            require("uefiver", b""),
            Err(HarnessError::MissingTag { tag: "uefiver" })
        ));
    }

    #[test]
    fn test_extract_unterminated() {
        assert_eq!(extract("cmd", b"<cmd>partial output"), Some(&b"partial output"[..]));
    }

    #[test]
    fn test_ver_does_not_match_longer_tags() {
        assert_eq!(extract("ver", b"<uefiver>2.70</uefiver>"), None);
    }

    #[test]
    fn test_extract_keeps_invalid_utf8() {
        let text = b"<cmd>Hi\xffthere</cmd>";
        assert_eq!(extract("cmd", text), Some(&b"Hi\xffthere"[..]));
    }

    #[test]
    fn test_fields_from_sample() {
        let fields = ExtractedFields::extract(SAMPLE).unwrap();
        assert_eq!(fields.firmware_version, "2.70");
        assert_eq!(fields.shell_version, "2.2");
        assert!(fields.version_info.contains("UEFI Interactive Shell"));
        assert_eq!(fields.firmware_build, "EDK II, 0x00010000");
        assert_eq!(fields.command_output, "Hello, world!\r\n");
        assert_eq!(fields.command_result, "0x0");
    }

    #[test]
    fn test_optional_fields_default_to_not_found() {
        let text = b"<uefiver>2.70</uefiver><shellver>2.2</shellver><cmd></cmd>";
        let fields = ExtractedFields::extract(text).unwrap();
        assert_eq!(fields.version_info, NOT_FOUND);
        assert_eq!(fields.firmware_build, NOT_FOUND);
        assert_eq!(fields.command_result, NOT_FOUND);
        assert_eq!(fields.command_output, "");
    }

    #[test]
    fn test_required_field_missing() {
        let text = b"<uefiver>2.70</uefiver><cmd>x</cmd>";
        assert!(matches!(
            ExtractedFields::extract(text),
            Err(HarnessError::MissingTag { tag: "shellver" })
        ));
    }

    #[test]
    fn test_firmware_build() {
        let info = "UEFI v2.70 (EDK II, 0x00010000)";
        assert_eq!(firmware_build(info, "2.70"), Some("EDK II, 0x00010000"));
        assert_eq!(firmware_build(info, "2.80"), None);
        assert_eq!(firmware_build("UEFI v2.70 (unterminated", "2.70"), None);
    }
}
