use serde_json::{Map, Value};

use crate::domain::FormatCode;
use crate::error::PackError;

/// Location of the manifest inside a resource pack.
pub const MANIFEST_PATH: &str = "pack.mcmeta";

const PACK_KEY: &str = "pack";
const FORMAT_KEY: &str = "pack_format";

/// Parsed `pack.mcmeta`. Holds the whole document so that re-encoding keeps
/// every other field and the original key order.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestPayload {
    root: Map<String, Value>,
    format_code: FormatCode,
}

impl ManifestPayload {
    pub fn format_code(&self) -> FormatCode {
        self.format_code
    }

    pub fn description(&self) -> Option<&str> {
        self.root
            .get(PACK_KEY)
            .and_then(|pack| pack.get("description"))
            .and_then(Value::as_str)
    }

    pub fn as_json(&self) -> &Map<String, Value> {
        &self.root
    }
}

pub fn decode(bytes: &[u8]) -> Result<ManifestPayload, PackError> {
    let text =
        std::str::from_utf8(bytes).map_err(|err| PackError::MalformedManifest(err.to_string()))?;
    // Some editors save pack.mcmeta with a BOM.
    let text = text.trim_start_matches('\u{feff}');
    let value: Value =
        serde_json::from_str(text).map_err(|err| PackError::MalformedManifest(err.to_string()))?;

    let Value::Object(root) = value else {
        return Err(PackError::MissingFormatField);
    };
    let format_code = root
        .get(PACK_KEY)
        .and_then(|pack| pack.get(FORMAT_KEY))
        .and_then(integer_like)
        .ok_or(PackError::MissingFormatField)?;

    Ok(ManifestPayload { root, format_code })
}

pub fn encode(payload: &ManifestPayload, format_code: FormatCode) -> Result<Vec<u8>, PackError> {
    let mut root = payload.root.clone();
    if let Some(Value::Object(pack)) = root.get_mut(PACK_KEY) {
        pack.insert(FORMAT_KEY.to_string(), Value::from(format_code));
    }
    serde_json::to_vec_pretty(&root).map_err(|err| PackError::MalformedManifest(err.to_string()))
}

fn integer_like(value: &Value) -> Option<FormatCode> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|float| float.fract() == 0.0 && *float >= 0.0)
                    .map(|float| float as u64)
            })
            .and_then(|code| FormatCode::try_from(code).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn decode_reads_nested_format() {
        let payload = decode(br#"{"pack":{"pack_format":4,"description":"x"}}"#).unwrap();
        assert_eq!(payload.format_code(), 4);
        assert_eq!(payload.description(), Some("x"));
    }

    #[test]
    fn decode_accepts_integer_like_values() {
        assert_eq!(
            decode(br#"{"pack":{"pack_format":"12"}}"#)
                .unwrap()
                .format_code(),
            12
        );
        assert_eq!(
            decode(br#"{"pack":{"pack_format":7.0}}"#)
                .unwrap()
                .format_code(),
            7
        );
    }

    #[test]
    fn decode_strips_bom() {
        let mut bytes = "\u{feff}".as_bytes().to_vec();
        bytes.extend_from_slice(br#"{"pack":{"pack_format":9}}"#);
        assert_eq!(decode(&bytes).unwrap().format_code(), 9);
    }

    #[test]
    fn decode_rejects_invalid_json() {
        let err = decode(b"{pack: 4").unwrap_err();
        assert_matches!(err, PackError::MalformedManifest(_));
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        assert_matches!(
            decode(&[0xff, 0xfe, b'{']),
            Err(PackError::MalformedManifest(_))
        );
    }

    #[test]
    fn decode_rejects_missing_field() {
        assert_matches!(
            decode(br#"{"pack":{"description":"x"}}"#),
            Err(PackError::MissingFormatField)
        );
        assert_matches!(
            decode(br#"{"pack_format":4}"#),
            Err(PackError::MissingFormatField)
        );
        assert_matches!(
            decode(br#"{"pack":{"pack_format":4.5}}"#),
            Err(PackError::MissingFormatField)
        );
        assert_matches!(decode(b"[1, 2]"), Err(PackError::MissingFormatField));
    }

    #[test]
    fn encode_keeps_key_order_and_indentation() {
        let payload =
            decode(br#"{"pack":{"pack_format":4,"description":"x"},"language":{}}"#).unwrap();
        let encoded = String::from_utf8(encode(&payload, 15).unwrap()).unwrap();
        assert_eq!(
            encoded,
            "{\n  \"pack\": {\n    \"pack_format\": 15,\n    \"description\": \"x\"\n  },\n  \"language\": {}\n}"
        );
    }

    #[test]
    fn encode_with_original_code_round_trips_field() {
        let payload = decode(br#"{"pack":{"description":"y","pack_format":22}}"#).unwrap();
        let again = decode(&encode(&payload, payload.format_code()).unwrap()).unwrap();
        assert_eq!(again, payload);
    }
}
