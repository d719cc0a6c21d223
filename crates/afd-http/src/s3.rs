//! S3 dialect helpers: bucket/prefix split, LIST paging and XML bodies.

use afd_auth::{ListQuery, ListVersion};
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::{Error, Result};

/// Splits a request path into bucket and key prefix.
///
/// With `bucket_in_path` the first segment is the bucket (path-style
/// addressing); otherwise the bucket is part of the hostname and the whole
/// path is the prefix.
#[must_use]
pub fn split_bucket(path: &str, bucket_in_path: bool) -> (Option<&str>, &str) {
    let trimmed = path.trim_start_matches('/');
    if !bucket_in_path {
        return (None, trimmed);
    }
    match trimmed.split_once('/') {
        Some((bucket, rest)) => (Some(bucket).filter(|b| !b.is_empty()), rest),
        None if trimmed.is_empty() => (None, ""),
        None => (Some(trimmed), ""),
    }
}

/// Returns the path of the bucket root: `/bucket/` or `/`.
#[must_use]
pub fn bucket_root(path: &str, bucket_in_path: bool) -> String {
    match split_bucket(path, bucket_in_path) {
        (Some(bucket), _) => format!("/{bucket}/"),
        (None, _) => "/".to_string(),
    }
}

/// Builds the request path and query of one LIST page for `path`.
#[must_use]
pub fn list_request(
    path: &str,
    bucket_in_path: bool,
    version: ListVersion,
    marker: Option<&str>,
    delimiter: bool,
) -> (String, ListQuery) {
    let (_, prefix) = split_bucket(path, bucket_in_path);
    let query = ListQuery {
        version,
        prefix: Some(prefix.to_string()).filter(|p| !p.is_empty()),
        marker: marker.map(str::to_string),
        delimiter,
        ..ListQuery::default()
    };
    (bucket_root(path, bucket_in_path), query)
}

/// `<Error>` body returned by S3 on failure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct S3Error {
    /// Error code, e.g. `NoSuchKey`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Parses an S3 error body. Returns `None` if the body is not one.
#[must_use]
pub fn parse_error(body: &str) -> Option<S3Error> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut error = S3Error::default();
    let mut seen = false;
    loop {
        match reader.read_event() {
            Err(_) => return None,
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let name = e.name().as_ref().to_vec();
                if path.is_empty() && name == b"Error" {
                    seen = true;
                }
                path.push(name);
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(t)) if seen && path.len() == 2 => {
                let text = t.unescape().ok()?.into_owned();
                match path[1].as_slice() {
                    b"Code" => error.code = text,
                    b"Message" => error.message = text,
                    _ => {}
                }
            }
            _ => {}
        }
    }
    (seen && !error.code.is_empty()).then_some(error)
}

/// One object in a LIST page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
}

/// Decoded LIST page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListPage {
    /// Objects on this page.
    pub entries: Vec<ListEntry>,
    /// `CommonPrefixes` when a delimiter was sent.
    pub common_prefixes: Vec<String>,
    /// More pages follow.
    pub is_truncated: bool,
    /// Cursor for the next page (`NextMarker`, last key, or
    /// `NextContinuationToken`).
    pub next_marker: Option<String>,
}

/// Parses a `ListBucketResult` body.
///
/// # Errors
///
/// Returns [`Error::Malformed`] if the XML is invalid.
pub fn parse_list_page(body: &str, version: ListVersion) -> Result<ListPage> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut page = ListPage::default();
    let mut key = String::new();
    let mut size = 0u64;
    let mut next_marker = None;
    let mut continuation = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| Error::malformed(format!("LIST body: {e}")))?;
        match event {
            Event::Eof => break,
            Event::Start(e) => path.push(e.name().as_ref().to_vec()),
            Event::End(e) => {
                if e.name().as_ref() == b"Contents" {
                    page.entries.push(ListEntry {
                        key: std::mem::take(&mut key),
                        size: std::mem::take(&mut size),
                    });
                }
                path.pop();
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| Error::malformed(format!("LIST body: {e}")))?
                    .into_owned();
                let parent = path.len().checked_sub(2).map(|i| path[i].as_slice());
                match (parent, path.last().map(Vec::as_slice)) {
                    (Some(b"Contents"), Some(b"Key")) => key = text,
                    (Some(b"Contents"), Some(b"Size")) => size = text.parse().unwrap_or(0),
                    (Some(b"CommonPrefixes"), Some(b"Prefix")) => {
                        page.common_prefixes.push(text);
                    }
                    (_, Some(b"IsTruncated")) => page.is_truncated = text == "true",
                    (_, Some(b"NextMarker")) => next_marker = Some(text),
                    (_, Some(b"NextContinuationToken")) => continuation = Some(text),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    if page.is_truncated {
        page.next_marker = match version {
            ListVersion::V2 => continuation,
            ListVersion::V1 => next_marker.or_else(|| {
                let last_key = page.entries.last().map(|e| e.key.clone());
                let last_prefix = page.common_prefixes.last().cloned();
                last_key.max(last_prefix)
            }),
        };
    }
    Ok(page)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_split_bucket() {
        assert_eq!(split_bucket("/bucket/dir/", true), (Some("bucket"), "dir/"));
        assert_eq!(split_bucket("/bucket", true), (Some("bucket"), ""));
        assert_eq!(split_bucket("/", true), (None, ""));
        assert_eq!(split_bucket("/dir/sub/", false), (None, "dir/sub/"));
    }

    #[test]
    fn test_bucket_root() {
        assert_eq!(bucket_root("/bucket/dir/", true), "/bucket/");
        assert_eq!(bucket_root("/dir/", false), "/");
    }

    #[test]
    fn test_list_request_v2() {
        let (path, query) = list_request("/bucket/dir/", true, ListVersion::V2, None, false);
        assert_eq!(path, "/bucket/");
        assert_eq!(query.query_string(), "list-type=2&max-keys=1000&prefix=dir%2F");
    }

    #[test]
    fn test_list_request_marker_encoded_like_prefix() {
        let (path, query) = list_request("/a b/", false, ListVersion::V1, Some("a b/x"), true);
        assert_eq!(path, "/");
        assert_eq!(
            query.query_string(),
            "delimiter=%2F&marker=a%20b%2Fx&max-keys=1000&prefix=a%20b%2F"
        );
    }

    #[test]
    fn test_parse_error() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message><Key>x</Key></Error>"#;
        let err = parse_error(body).unwrap();
        assert_eq!(err.code, "NoSuchKey");
        assert_eq!(err.message, "The specified key does not exist.");
        assert_eq!(parse_error("<html>oops</html>"), None);
        assert_eq!(parse_error("not xml at all <"), None);
    }

    #[test]
    fn test_parse_list_page_v2() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>bucket</Name><Prefix>dir/</Prefix><KeyCount>2</KeyCount>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM=</NextContinuationToken>
  <Contents><Key>dir/a.txt</Key><Size>5</Size></Contents>
  <Contents><Key>dir/b &amp; c.txt</Key><Size>1024</Size></Contents>
  <CommonPrefixes><Prefix>dir/sub/</Prefix></CommonPrefixes>
</ListBucketResult>"#;
        let page = parse_list_page(body, ListVersion::V2).unwrap();
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[1].key, "dir/b & c.txt");
        assert_eq!(page.entries[1].size, 1024);
        assert_eq!(page.common_prefixes, vec!["dir/sub/".to_string()]);
        assert!(page.is_truncated);
        assert_eq!(
            page.next_marker.as_deref(),
            Some("1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM=")
        );
    }

    #[test]
    fn test_parse_list_page_v1_falls_back_to_last_key() {
        let body = "<ListBucketResult><IsTruncated>true</IsTruncated>\
            <Contents><Key>a</Key><Size>1</Size></Contents>\
            <Contents><Key>b</Key><Size>2</Size></Contents></ListBucketResult>";
        let page = parse_list_page(body, ListVersion::V1).unwrap();
        assert_eq!(page.next_marker.as_deref(), Some("b"));

        let last = "<ListBucketResult><IsTruncated>false</IsTruncated></ListBucketResult>";
        let page = parse_list_page(last, ListVersion::V1).unwrap();
        assert!(!page.is_truncated);
        assert_eq!(page.next_marker, None);
    }
}
