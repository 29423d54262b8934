//! Wire codec: pure encode/decode functions, no I/O.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{Map, Value};

use super::{native_byteorder, MetadataHeader, Message, Payload, CONTENT_TYPE_JSON};
use crate::error::CodecError;

/// Size of the fixed length prefix in front of the metadata header.
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Header keys checked in this order; the first absent one is reported.
const REQUIRED_HEADERS: [&str; 4] = [
    "byteorder",
    "content-length",
    "content-type",
    "content-encoding",
];

/// Text encodings understood for JSON payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextEncoding {
    Utf8,
    Ascii,
}

impl TextEncoding {
    fn parse(name: &str) -> Result<Self, CodecError> {
        match name.to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            "ascii" | "us-ascii" => Ok(TextEncoding::Ascii),
            _ => Err(CodecError::UnsupportedEncoding(name.to_string())),
        }
    }
}

/// Frame `message` and append it to `dst`.
///
/// Wire format:
/// ```text
/// [u16 BE header_length][header_length bytes JSON header][content-length bytes payload]
/// ```
pub fn encode_message(message: &Message, dst: &mut BytesMut) -> Result<(), CodecError> {
    let content = match &message.content {
        Payload::Json(value) => encode_json(value, &message.content_encoding)?,
        Payload::Binary(bytes) => bytes.to_vec(),
    };

    let header = MetadataHeader {
        byteorder: native_byteorder().to_string(),
        content_type: message.content_type.clone(),
        content_encoding: message.content_encoding.clone(),
        content_length: content.len(),
    };
    let header_bytes = serde_json::to_vec(&header)?;
    let header_len = u16::try_from(header_bytes.len()).map_err(|_| CodecError::HeaderTooLarge {
        size: header_bytes.len(),
    })?;

    dst.reserve(LENGTH_PREFIX_LEN + header_bytes.len() + content.len());
    dst.put_u16(header_len);
    dst.put_slice(&header_bytes);
    dst.put_slice(&content);
    Ok(())
}

/// Serialize a JSON value in the given text encoding.
///
/// Non-ASCII characters are written literally, never as `\u` escapes.
pub fn encode_json(value: &Value, encoding: &str) -> Result<Vec<u8>, CodecError> {
    let encoding = TextEncoding::parse(encoding)?;
    let bytes = serde_json::to_vec(value)?;
    if encoding == TextEncoding::Ascii && !bytes.is_ascii() {
        return Err(CodecError::InvalidAscii);
    }
    Ok(bytes)
}

/// Read the metadata header length from the front of `src`.
///
/// Returns `None` while fewer than [`LENGTH_PREFIX_LEN`] bytes are available.
pub fn decode_length_prefix(src: &[u8]) -> Option<u16> {
    let prefix: [u8; LENGTH_PREFIX_LEN] = src.get(..LENGTH_PREFIX_LEN)?.try_into().ok()?;
    Some(u16::from_be_bytes(prefix))
}

/// Decode a metadata header from exactly its `header_length` bytes.
///
/// Fails with [`CodecError::MissingHeaderField`] when any required key is absent.
pub fn decode_header(src: &[u8]) -> Result<MetadataHeader, CodecError> {
    let fields: Map<String, Value> = serde_json::from_slice(src)?;
    if let Some(missing) = REQUIRED_HEADERS
        .iter()
        .find(|key| !fields.contains_key(**key))
    {
        return Err(CodecError::MissingHeaderField(*missing));
    }
    Ok(serde_json::from_value(Value::Object(fields))?)
}

/// Decode a payload of exactly `header.content_length` bytes.
///
/// `text/json` content is decoded with the announced content-encoding;
/// every other content type is returned as opaque bytes.
pub fn decode_payload(header: &MetadataHeader, src: &[u8]) -> Result<Payload, CodecError> {
    if header.content_type != CONTENT_TYPE_JSON {
        return Ok(Payload::Binary(Bytes::copy_from_slice(src)));
    }

    let text = match TextEncoding::parse(&header.content_encoding)? {
        TextEncoding::Utf8 => std::str::from_utf8(src)?,
        TextEncoding::Ascii => {
            if !src.is_ascii() {
                return Err(CodecError::InvalidAscii);
            }
            std::str::from_utf8(src)?
        }
    };
    Ok(Payload::Json(serde_json::from_str(text)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn split_frame(bytes: &[u8]) -> (MetadataHeader, Payload) {
        let header_len = decode_length_prefix(bytes).unwrap() as usize;
        let header_end = LENGTH_PREFIX_LEN + header_len;
        let header = decode_header(&bytes[LENGTH_PREFIX_LEN..header_end]).unwrap();
        let payload_end = header_end + header.content_length;
        assert_eq!(payload_end, bytes.len());
        let payload = decode_payload(&header, &bytes[header_end..payload_end]).unwrap();
        (header, payload)
    }

    #[test]
    fn test_roundtrip_preserves_diacritics() {
        let value = json!({"result": "Não há tradução para 'irmã'."});
        let mut buf = BytesMut::new();
        encode_message(&Message::json(value.clone()), &mut buf).unwrap();

        let (header, payload) = split_frame(&buf);
        assert_eq!(header.content_type, "text/json");
        assert_eq!(header.content_encoding, "utf-8");
        assert_eq!(header.byteorder, native_byteorder());
        assert_eq!(payload, Payload::Json(value));
    }

    #[test]
    fn test_non_ascii_written_literally() {
        let bytes = encode_json(&json!({"result": "olá"}), "utf-8").unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains("olá"));
        assert!(!text.contains("\\u"));
    }

    #[test]
    fn test_length_prefix_is_big_endian() {
        let mut buf = BytesMut::new();
        encode_message(&Message::json(json!({})), &mut buf).unwrap();

        let header_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        assert_eq!(decode_length_prefix(&buf), Some(header_len as u16));
        let header: Value = serde_json::from_slice(&buf[2..2 + header_len]).unwrap();
        assert_eq!(header["content-length"], json!(2));
        assert_eq!(&buf[2 + header_len..], b"{}");
    }

    #[test]
    fn test_length_prefix_needs_two_bytes() {
        assert_eq!(decode_length_prefix(&[]), None);
        assert_eq!(decode_length_prefix(&[0x01]), None);
        assert_eq!(decode_length_prefix(&[0x01, 0x02, 0xff]), Some(0x0102));
    }

    #[test]
    fn test_content_length_counts_encoded_bytes() {
        let mut buf = BytesMut::new();
        encode_message(&Message::json(json!("água")), &mut buf).unwrap();
        let (header, _) = split_frame(&buf);
        // quotes + "água", where 'á' is two bytes in UTF-8
        assert_eq!(header.content_length, 7);
    }

    #[test]
    fn test_missing_each_required_header() {
        let full = json!({
            "byteorder": "little",
            "content-type": "text/json",
            "content-encoding": "utf-8",
            "content-length": 10,
        });

        for key in REQUIRED_HEADERS {
            let mut partial = full.clone();
            partial.as_object_mut().unwrap().remove(key);
            let bytes = serde_json::to_vec(&partial).unwrap();
            match decode_header(&bytes) {
                Err(CodecError::MissingHeaderField(missing)) => assert_eq!(missing, key),
                other => panic!("unexpected: {:?}", other),
            }
        }
    }

    #[test]
    fn test_header_rejects_non_object() {
        assert!(matches!(
            decode_header(b"[\"little\", \"text/json\", \"utf-8\", 3]"),
            Err(CodecError::Json(_))
        ));
        assert!(matches!(decode_header(b"{"), Err(CodecError::Json(_))));
    }

    #[test]
    fn test_header_ignores_extra_keys() {
        let bytes = br#"{"byteorder":"big","content-type":"text/json","content-encoding":"utf-8","content-length":4,"x":1}"#;
        let header = decode_header(bytes).unwrap();
        assert_eq!(header.byteorder, "big");
        assert_eq!(header.content_length, 4);
    }

    #[test]
    fn test_header_rejects_negative_length() {
        let bytes = br#"{"byteorder":"big","content-type":"text/json","content-encoding":"utf-8","content-length":-1}"#;
        assert!(matches!(decode_header(bytes), Err(CodecError::Json(_))));
    }

    #[test]
    fn test_unsupported_encoding() {
        let header = MetadataHeader {
            byteorder: "little".into(),
            content_type: "text/json".into(),
            content_encoding: "latin-1".into(),
            content_length: 2,
        };
        assert!(matches!(
            decode_payload(&header, b"{}"),
            Err(CodecError::UnsupportedEncoding(name)) if name == "latin-1"
        ));
    }

    #[test]
    fn test_encoding_aliases() {
        let mut header = MetadataHeader {
            byteorder: "little".into(),
            content_type: "text/json".into(),
            content_encoding: "UTF8".into(),
            content_length: 5,
        };
        assert_eq!(
            decode_payload(&header, "\"é\"".as_bytes()).unwrap(),
            Payload::Json(json!("é"))
        );

        header.content_encoding = "ascii".into();
        assert!(matches!(
            decode_payload(&header, "\"é\"".as_bytes()),
            Err(CodecError::InvalidAscii)
        ));
        assert!(matches!(
            encode_json(&json!("é"), "us-ascii"),
            Err(CodecError::InvalidAscii)
        ));
    }

    #[test]
    fn test_invalid_utf8_payload() {
        let header = MetadataHeader {
            byteorder: "little".into(),
            content_type: "text/json".into(),
            content_encoding: "utf-8".into(),
            content_length: 2,
        };
        assert!(matches!(
            decode_payload(&header, &[0xc3, 0x28]),
            Err(CodecError::InvalidText(_))
        ));
    }

    #[test]
    fn test_binary_payload_is_opaque() {
        let message = Message::binary("binary/custom-client-binary-type", &b"\x00\xffraw"[..]);
        let mut buf = BytesMut::new();
        encode_message(&message, &mut buf).unwrap();

        let (header, payload) = split_frame(&buf);
        assert_eq!(header.content_type, "binary/custom-client-binary-type");
        assert_eq!(payload, Payload::Binary(Bytes::from_static(b"\x00\xffraw")));
    }

    #[test]
    fn test_header_too_large() {
        let message = Message {
            content_type: "x".repeat(usize::from(u16::MAX)),
            content_encoding: "binary".into(),
            content: Payload::Binary(Bytes::new()),
        };
        let mut buf = BytesMut::new();
        assert!(matches!(
            encode_message(&message, &mut buf),
            Err(CodecError::HeaderTooLarge { .. })
        ));
        assert!(buf.is_empty());
    }
}
