//! Message Codec
//!
//! Pure encode/decode functions for the wire format. Nothing in here
//! touches a socket; the staged decoding of partial input lives in the
//! [`parser`](crate::protocol::parser) module and calls back into the
//! header and content decoders defined here.
//!
//! ## Encoding
//!
//! 1. Serialize the content (JSON text in the declared encoding for
//!    `text/json`, raw bytes for anything else)
//! 2. Build the header with `content-length` set to the content's byte length
//! 3. JSON-encode the header as UTF-8
//! 4. Emit `[u16 BE header length][header][content]`

use crate::protocol::parser::{ParseError, ParseResult};
use crate::protocol::types::{
    is_json, Content, Header, TextEncoding, MAX_CONTENT_SIZE, MAX_HEADER_SIZE,
    REQUIRED_HEADER_KEYS,
};
use crate::request::Request;
use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;

/// Encodes a request into a complete wire message.
///
/// # Example
///
/// ```
/// use appwire::protocol::encode_request;
/// use appwire::request::create_request;
///
/// let request = create_request("search", "ethan").unwrap();
/// let wire = encode_request(&request).unwrap();
/// let header_len = u16::from_be_bytes([wire[0], wire[1]]) as usize;
/// assert!(wire.ends_with(br#"{"action":"search","value":"ethan"}"#));
/// assert_eq!(wire.len(), 2 + header_len + 35);
/// ```
pub fn encode_request(request: &Request) -> ParseResult<Bytes> {
    encode_message(
        request.content_type(),
        request.content_encoding(),
        &request.content(),
    )
}

/// Encodes arbitrary content under the given content type and encoding.
///
/// Used for requests by the client and for responses by servers speaking
/// the same protocol.
pub fn encode_message(
    content_type: &str,
    content_encoding: &str,
    content: &Content,
) -> ParseResult<Bytes> {
    let content_bytes = encode_content(content_type, content_encoding, content)?;
    let header = Header::new(content_type, content_encoding, content_bytes.len() as u64);
    let header_bytes =
        serde_json::to_vec(&header).map_err(|e| ParseError::InvalidHeader(e.to_string()))?;

    if header_bytes.len() > MAX_HEADER_SIZE {
        return Err(ParseError::HeaderTooLarge {
            size: header_bytes.len(),
            max: MAX_HEADER_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(2 + header_bytes.len() + content_bytes.len());
    buf.put_u16(header_bytes.len() as u16);
    buf.extend_from_slice(&header_bytes);
    buf.extend_from_slice(&content_bytes);
    Ok(buf.freeze())
}

/// Serializes the content section alone.
pub fn encode_content(
    content_type: &str,
    content_encoding: &str,
    content: &Content,
) -> ParseResult<Bytes> {
    match (is_json(content_type), content) {
        (true, Content::Json(value)) => {
            let encoding = TextEncoding::from_label(content_encoding)?;
            Ok(Bytes::from(json_encode(value, encoding)?))
        }
        (false, Content::Binary(bytes)) => Ok(bytes.clone()),
        _ => Err(ParseError::ContentTypeMismatch(content_type.to_string())),
    }
}

/// JSON-encodes a value as text in the given encoding.
///
/// Non-ASCII characters are written as-is rather than escaped, so the
/// encoding must be able to represent them.
pub fn json_encode(value: &Value, encoding: TextEncoding) -> ParseResult<Vec<u8>> {
    let text =
        serde_json::to_string(value).map_err(|e| ParseError::InvalidContent(e.to_string()))?;
    encoding.encode(&text)
}

/// Decodes JSON text in the given encoding into a generic value.
pub fn json_decode(bytes: &[u8], encoding: TextEncoding) -> ParseResult<Value> {
    let text = encoding.decode(bytes)?;
    serde_json::from_str(&text).map_err(|e| ParseError::InvalidContent(e.to_string()))
}

/// Decodes and validates a header section.
///
/// Required keys are checked before any typing is applied, so a missing
/// key is always reported as [`ParseError::MissingHeader`].
pub fn decode_header(bytes: &[u8]) -> ParseResult<Header> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| ParseError::InvalidHeader(e.to_string()))?;

    let map = match value {
        Value::Object(map) => map,
        other => {
            return Err(ParseError::InvalidHeader(format!(
                "expected a JSON object, got {}",
                other
            )))
        }
    };

    for key in REQUIRED_HEADER_KEYS {
        if !map.contains_key(key) {
            return Err(ParseError::MissingHeader(key));
        }
    }

    let header: Header = serde_json::from_value(Value::Object(map))
        .map_err(|e| ParseError::InvalidHeader(e.to_string()))?;

    if header.content_length > MAX_CONTENT_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: header.content_length,
            max: MAX_CONTENT_SIZE,
        });
    }

    Ok(header)
}

/// Decodes a content section according to its header.
pub fn decode_content(header: &Header, bytes: Bytes) -> ParseResult<Content> {
    if header.is_json() {
        let encoding = TextEncoding::from_label(&header.content_encoding)?;
        Ok(Content::Json(json_decode(&bytes, encoding)?))
    } else {
        Ok(Content::Binary(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::native_byteorder;
    use crate::request::create_request;
    use serde_json::json;

    fn split_wire(wire: &[u8]) -> (&[u8], &[u8]) {
        let header_len = u16::from_be_bytes([wire[0], wire[1]]) as usize;
        wire[2..].split_at(header_len)
    }

    #[test]
    fn test_encode_search_request_exact_bytes() {
        let request = create_request("search", "ethan").unwrap();
        let wire = encode_request(&request).unwrap();

        let content = br#"{"action":"search","value":"ethan"}"#;
        let header = format!(
            r#"{{"byteorder":"{}","content-type":"text/json","content-encoding":"utf-8","content-length":{}}}"#,
            native_byteorder(),
            content.len()
        );

        let mut expected = Vec::new();
        expected.extend_from_slice(&(header.len() as u16).to_be_bytes());
        expected.extend_from_slice(header.as_bytes());
        expected.extend_from_slice(content);

        assert_eq!(&wire[..], &expected[..]);
    }

    #[test]
    fn test_content_length_counts_utf8_bytes() {
        let request = create_request("search", "\u{1f389} party").unwrap();
        let wire = encode_request(&request).unwrap();
        let (header, content) = split_wire(&wire);

        let header = decode_header(header).unwrap();
        assert_eq!(header.content_length as usize, content.len());
        // 4-byte emoji written unescaped
        assert!(content.len() > "{\"action\":\"search\",\"value\":\"x party\"}".len());
    }

    #[test]
    fn test_binary_content_passes_through() {
        let payload = Bytes::from_static(b"\x00\x01\x02binary\xff");
        let wire = encode_message(
            "binary/custom-client-binary-type",
            "binary",
            &Content::Binary(payload.clone()),
        )
        .unwrap();
        let (header, content) = split_wire(&wire);

        let header = decode_header(header).unwrap();
        assert_eq!(header.content_length, payload.len() as u64);
        assert_eq!(content, &payload[..]);

        let decoded = decode_content(&header, Bytes::copy_from_slice(content)).unwrap();
        assert_eq!(decoded, Content::Binary(payload));
    }

    #[test]
    fn test_content_type_mismatch() {
        let result = encode_message("text/json", "utf-8", &Content::Binary(Bytes::new()));
        assert!(matches!(result, Err(ParseError::ContentTypeMismatch(_))));

        let result = encode_message("image/png", "binary", &Content::Json(json!({})));
        assert!(matches!(result, Err(ParseError::ContentTypeMismatch(_))));
    }

    #[test]
    fn test_unencodable_content() {
        let content = Content::Json(json!({"value": "caf\u{e9}"}));
        let result = encode_message("text/json", "ascii", &content);
        assert!(matches!(result, Err(ParseError::Unencodable(_))));
    }

    #[test]
    fn test_latin1_content_roundtrip() {
        let content = Content::Json(json!({"result": "caf\u{e9}"}));
        let wire = encode_message("text/json", "latin-1", &content).unwrap();
        let (header, body) = split_wire(&wire);

        assert!(body.contains(&0xe9));
        let header = decode_header(header).unwrap();
        let decoded = decode_content(&header, Bytes::copy_from_slice(body)).unwrap();
        assert_eq!(decoded, content);
    }

    #[test]
    fn test_header_too_large() {
        let content_type = format!("x/{}", "a".repeat(MAX_HEADER_SIZE));
        let result = encode_message(&content_type, "binary", &Content::Binary(Bytes::new()));
        assert!(matches!(result, Err(ParseError::HeaderTooLarge { .. })));
    }

    #[test]
    fn test_decode_header_missing_each_key() {
        for missing in REQUIRED_HEADER_KEYS {
            let mut header = json!({
                "byteorder": "little",
                "content-type": "text/json",
                "content-encoding": "utf-8",
                "content-length": 2,
            });
            header.as_object_mut().unwrap().remove(missing);
            let bytes = serde_json::to_vec(&header).unwrap();

            assert_eq!(decode_header(&bytes), Err(ParseError::MissingHeader(missing)));
        }
    }

    #[test]
    fn test_decode_header_invalid() {
        assert!(matches!(
            decode_header(b"not json"),
            Err(ParseError::InvalidHeader(_))
        ));
        assert!(matches!(
            decode_header(b"[1, 2]"),
            Err(ParseError::InvalidHeader(_))
        ));
        let negative = br#"{"byteorder":"big","content-type":"text/json","content-encoding":"utf-8","content-length":-1}"#;
        assert!(matches!(
            decode_header(negative),
            Err(ParseError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_decode_header_rejects_oversized_content() {
        let header = format!(
            r#"{{"byteorder":"big","content-type":"text/json","content-encoding":"utf-8","content-length":{}}}"#,
            MAX_CONTENT_SIZE + 1
        );
        assert!(matches!(
            decode_header(header.as_bytes()),
            Err(ParseError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_content_unknown_encoding() {
        let header = Header::new("text/json", "koi8-r", 2);
        let result = decode_content(&header, Bytes::from_static(b"{}"));
        assert_eq!(
            result,
            Err(ParseError::UnsupportedEncoding("koi8-r".to_string()))
        );
    }

    #[test]
    fn test_decode_content_invalid_json() {
        let header = Header::new("text/json", "utf-8", 5);
        let result = decode_content(&header, Bytes::from_static(b"{oops"));
        assert!(matches!(result, Err(ParseError::InvalidContent(_))));
    }
}
