//! Best-effort `multipart/form-data` decoder.
//!
//! Splits a buffered body on its `--<boundary>` delimiter and sorts every
//! well-formed part into either a scalar field or a file attachment. Only a
//! missing boundary aborts decoding; structurally broken parts are logged
//! and skipped so one bad part never costs the rest of the submission.

use crate::models::form::{FilePart, FormSubmission};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

const DEFAULT_FILE_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MultipartError {
    #[error("no boundary found in Content-Type")]
    MissingBoundary,
    #[error("body is flagged as base64 but does not decode: {0}")]
    InvalidBase64(String),
}

/// Why a single part was dropped. Never surfaced past the decoder.
#[derive(Debug, Error, PartialEq, Eq)]
enum MalformedPart {
    #[error("no blank line between headers and content")]
    MissingSeparator,
    #[error("header block is not valid UTF-8")]
    InvalidHeaders,
    #[error("no content-disposition header")]
    MissingDisposition,
    #[error("content-disposition has no name")]
    MissingName,
    #[error("field `{0}` is not valid UTF-8")]
    InvalidFieldText(String),
}

/// How a request body reached the dispatch layer.
///
/// Resolved into bytes exactly once, before decoding starts.
#[derive(Clone, Debug)]
pub enum RequestBody {
    /// Raw bytes as received on the wire.
    Binary(Bytes),
    /// A body the transport explicitly flagged as base64.
    Base64(String),
    /// A body re-serialized as text by a transport. One surrounding pair
    /// of quotes is stripped, then base64 is attempted with a fallback to
    /// the UTF-8 bytes of the text itself.
    Text(String),
}

impl RequestBody {
    pub fn into_bytes(self) -> Result<Bytes, MultipartError> {
        match self {
            RequestBody::Binary(bytes) => Ok(bytes),
            RequestBody::Base64(encoded) => general_purpose::STANDARD
                .decode(encoded.trim())
                .map(Bytes::from)
                .map_err(|err| MultipartError::InvalidBase64(err.to_string())),
            RequestBody::Text(text) => {
                let unquoted = strip_quotes(&text);
                match general_purpose::STANDARD.decode(unquoted) {
                    Ok(decoded) => Ok(Bytes::from(decoded)),
                    Err(_) => Ok(Bytes::copy_from_slice(unquoted.as_bytes())),
                }
            }
        }
    }
}

/// Decode a multipart body using the boundary declared in `content_type`.
pub fn decode(content_type: &str, body: RequestBody) -> Result<FormSubmission, MultipartError> {
    let boundary = extract_boundary(content_type).ok_or(MultipartError::MissingBoundary)?;
    let body = body.into_bytes()?;
    let delimiter = format!("--{}", boundary);

    let mut form = FormSubmission::default();
    for (index, segment) in split_on(&body, delimiter.as_bytes()).into_iter().enumerate() {
        match parse_part(segment) {
            Ok(Part::Field { name, value }) => {
                form.fields.insert(name, value);
            }
            Ok(Part::File { name, file }) => {
                form.files.insert(name, file);
            }
            Err(reason) => debug!(part = index, %reason, "skipping multipart segment"),
        }
    }

    Ok(form)
}

/// Pull the `boundary=` parameter out of a Content-Type header value.
///
/// The parameter name matches in any case. The token runs to the next `;`
/// or the end of the header; one layer of quotes around it is removed.
pub fn extract_boundary(content_type: &str) -> Option<&str> {
    let start = content_type.to_ascii_lowercase().find("boundary=")? + "boundary=".len();
    let rest = &content_type[start..];
    let token = rest.split(';').next().unwrap_or(rest).trim();
    let token = strip_quotes(token);
    if token.is_empty() { None } else { Some(token) }
}

enum Part {
    Field { name: String, value: String },
    File { name: String, file: FilePart },
}

fn parse_part(segment: &[u8]) -> Result<Part, MalformedPart> {
    let (header_block, content, line_break) =
        split_headers(segment).ok_or(MalformedPart::MissingSeparator)?;
    let header_block =
        std::str::from_utf8(header_block).map_err(|_| MalformedPart::InvalidHeaders)?;
    let headers = parse_headers(header_block);

    let content = content.strip_suffix(line_break).unwrap_or(content);

    let disposition = headers
        .get("content-disposition")
        .ok_or(MalformedPart::MissingDisposition)?;
    let params = disposition_params(disposition);
    let name = params
        .get("name")
        .filter(|name| !name.is_empty())
        .ok_or(MalformedPart::MissingName)?
        .to_string();

    match params.get("filename").filter(|filename| !filename.is_empty()) {
        Some(filename) => {
            let content_type = headers
                .get("content-type")
                .filter(|value| !value.is_empty())
                .cloned()
                .unwrap_or_else(|| DEFAULT_FILE_CONTENT_TYPE.to_string());
            Ok(Part::File {
                name,
                file: FilePart {
                    filename: filename.to_string(),
                    content_type,
                    content: Bytes::copy_from_slice(content),
                },
            })
        }
        None => {
            let value = String::from_utf8(content.to_vec())
                .map_err(|_| MalformedPart::InvalidFieldText(name.clone()))?;
            Ok(Part::Field { name, value })
        }
    }
}

/// Split a part at its first blank line. Returns the header block, the
/// content block and the line break flavour the part was framed with.
fn split_headers(segment: &[u8]) -> Option<(&[u8], &[u8], &'static [u8])> {
    if let Some(pos) = find(segment, b"\r\n\r\n") {
        return Some((&segment[..pos], &segment[pos + 4..], &b"\r\n"[..]));
    }
    find(segment, b"\n\n").map(|pos| (&segment[..pos], &segment[pos + 2..], &b"\n"[..]))
}

/// Lowercased header names to trimmed values, split on the first colon.
fn parse_headers(block: &str) -> HashMap<String, String> {
    block
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect()
}

/// Parameters of a content-disposition value, e.g. `form-data; name="a"`.
fn disposition_params(value: &str) -> HashMap<String, &str> {
    value
        .split(';')
        .filter_map(|param| param.split_once('='))
        .map(|(key, val)| (key.trim().to_ascii_lowercase(), strip_quotes(val.trim())))
        .collect()
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn split_on<'a>(haystack: &'a [u8], delimiter: &[u8]) -> Vec<&'a [u8]> {
    let mut segments = Vec::new();
    let mut rest = haystack;
    while let Some(pos) = find(rest, delimiter) {
        segments.push(&rest[..pos]);
        rest = &rest[pos + delimiter.len()..];
    }
    segments.push(rest);
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    const CT: &str = "multipart/form-data; boundary=X";

    fn field(name: &str, value: &str) -> String {
        format!(
            "--X\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            name, value
        )
    }

    fn binary(body: Vec<u8>) -> RequestBody {
        RequestBody::Binary(Bytes::from(body))
    }

    #[test]
    fn decodes_field_and_file() {
        let mut body = field("title", "Inception").into_bytes();
        body.extend_from_slice(
            b"--X\r\nContent-Disposition: form-data; name=\"poster\"; filename=\"cover.jpg\"\r\n\
              Content-Type: image/jpeg\r\n\r\n\x01\x02\x03\r\n--X--\r\n",
        );

        let form = decode(CT, binary(body)).unwrap();

        assert_eq!(form.fields.len(), 1);
        assert_eq!(form.fields["title"], "Inception");
        assert_eq!(form.files.len(), 1);
        let poster = &form.files["poster"];
        assert_eq!(poster.filename, "cover.jpg");
        assert_eq!(poster.content_type, "image/jpeg");
        assert_eq!(poster.content.as_ref(), b"\x01\x02\x03");
    }

    #[test]
    fn missing_boundary_is_fatal() {
        let body = binary(field("title", "Inception").into_bytes());
        let err = decode("multipart/form-data", body).unwrap_err();
        assert_eq!(err, MultipartError::MissingBoundary);
    }

    #[test]
    fn empty_filename_is_a_field() {
        let body = "--X\r\nContent-Disposition: form-data; name=\"poster\"; filename=\"\"\r\n\
                    Content-Type: application/octet-stream\r\n\r\n\r\n--X--\r\n";

        let form = decode(CT, binary(body.as_bytes().to_vec())).unwrap();

        assert!(form.files.is_empty());
        assert_eq!(form.fields["poster"], "");
    }

    #[test]
    fn file_without_content_type_defaults_to_octet_stream() {
        let body = "--X\r\nContent-Disposition: form-data; name=\"poster\"; filename='a.bin'\r\n\r\nabc\r\n--X--";

        let form = decode(CT, binary(body.as_bytes().to_vec())).unwrap();

        assert_eq!(form.files["poster"].filename, "a.bin");
        assert_eq!(form.files["poster"].content_type, "application/octet-stream");
    }

    #[test]
    fn repeated_names_keep_the_last_value() {
        let body = format!("{}{}--X--\r\n", field("genre", "Drama"), field("genre", "Crime"));
        let form = decode(CT, binary(body.into_bytes())).unwrap();
        assert_eq!(form.fields["genre"], "Crime");
    }

    #[test]
    fn broken_parts_are_skipped() {
        let body = format!(
            "preamble\r\n--X\r\nContent-Disposition: form-data\r\n\r\nnameless\r\n\
             --X\r\nContent-Disposition: form-data; name=\"noblank\"\r\n\
             {}--X--\r\nepilogue",
            field("title", "Heat")
        );

        let form = decode(CT, binary(body.into_bytes())).unwrap();

        assert_eq!(form.fields.len(), 1);
        assert_eq!(form.fields["title"], "Heat");
    }

    #[test]
    fn invalid_utf8_field_is_skipped() {
        let mut body = b"--X\r\nContent-Disposition: form-data; name=\"bad\"\r\n\r\n\xff\xfe\r\n".to_vec();
        body.extend_from_slice(field("title", "Heat").as_bytes());
        body.extend_from_slice(b"--X--\r\n");

        let form = decode(CT, binary(body)).unwrap();

        assert!(!form.fields.contains_key("bad"));
        assert_eq!(form.fields["title"], "Heat");
    }

    #[test]
    fn filename_listed_before_name_is_not_mistaken_for_it() {
        let body = "--X\r\nContent-Disposition: form-data; filename=\"a.png\"; name=\"poster\"\r\n\
                    Content-Type: image/png\r\n\r\nPNG\r\n--X--\r\n";

        let form = decode(CT, binary(body.as_bytes().to_vec())).unwrap();

        assert_eq!(form.files["poster"].filename, "a.png");
    }

    #[test]
    fn scalar_fields_survive_encoding() {
        let expected: HashMap<String, String> = [
            ("title", "Amélie"),
            ("synopsis", "Line one\nline two; with = signs"),
            ("rating", "8.3"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let mut body = String::new();
        for (name, value) in &expected {
            body.push_str(&field(name, value));
        }
        body.push_str("--X--\r\n");

        let form = decode(CT, binary(body.into_bytes())).unwrap();

        assert_eq!(form.fields, expected);
        assert!(form.files.is_empty());
    }

    #[test]
    fn text_body_is_unquoted_and_base64_decoded() {
        let raw = format!("{}--X--\r\n", field("title", "Alien"));
        let encoded = general_purpose::STANDARD.encode(raw.as_bytes());

        let quoted = RequestBody::Text(format!("'{}'", encoded));
        let form = decode(CT, quoted).unwrap();
        assert_eq!(form.fields["title"], "Alien");

        let double_quoted = RequestBody::Text(format!("\"{}\"", encoded));
        let form = decode(CT, double_quoted).unwrap();
        assert_eq!(form.fields["title"], "Alien");

        let plain = RequestBody::Text(raw);
        let form = decode(CT, plain).unwrap();
        assert_eq!(form.fields["title"], "Alien");
    }

    #[test]
    fn flagged_base64_must_decode() {
        let err = decode(CT, RequestBody::Base64("not base64!".into())).unwrap_err();
        assert!(matches!(err, MultipartError::InvalidBase64(_)));
    }

    #[test]
    fn boundary_extraction() {
        assert_eq!(extract_boundary("multipart/form-data; boundary=abc"), Some("abc"));
        assert_eq!(
            extract_boundary("multipart/form-data; boundary=\"a b\"; charset=utf-8"),
            Some("a b")
        );
        assert_eq!(extract_boundary("multipart/form-data; Boundary=Abc"), Some("Abc"));
        assert_eq!(extract_boundary("Multipart/Form-Data; BOUNDARY=\"q\""), Some("q"));
        assert_eq!(extract_boundary("multipart/form-data; boundary="), None);
        assert_eq!(extract_boundary("application/json"), None);
    }

    #[test]
    fn capitalised_boundary_parameter_decodes() {
        let body = format!("{}--X--\r\n", field("title", "Heat"));
        let form = decode("multipart/form-data; Boundary=X", binary(body.into_bytes())).unwrap();
        assert_eq!(form.fields["title"], "Heat");
    }

    #[test]
    fn lf_only_framing_is_tolerated() {
        let body = "--X\nContent-Disposition: form-data; name=\"title\"\n\nBrazil\n--X--\n";
        let form = decode(CT, binary(body.as_bytes().to_vec())).unwrap();
        assert_eq!(form.fields["title"], "Brazil");
    }
}
