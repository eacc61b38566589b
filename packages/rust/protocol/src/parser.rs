//! Streaming response parser.
//!
//! Consumes a response body chunk by chunk and yields [`Record`]s as their
//! elements close. Only the element currently being assembled is held in
//! memory; the document as a whole is never materialised unless raw capture
//! was requested.
//!
//! Recognised elements:
//! - `asset`: captured with its full nested structure
//! - `directory`: reduced to a [`DirectoryRecord`]
//! - `reply type="error"`: ends the sequence with [`MirrorError::Service`]
//! - `cursor/total`, `cursor/remaining`: exposed through [`RecordStream::cursor`]

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use assetmirror_shared::{MirrorError, Result};
use futures::Stream;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tokio_util::bytes::Bytes;
use tokio_util::io::StreamReader;

use crate::records::{AssetRecord, DirectoryRecord, PageCursor, QueryPage, Record, XmlElement};

/// Element name of asset records.
pub const ASSET_ELEMENT: &str = "asset";
/// Element name of directory records.
pub const DIRECTORY_ELEMENT: &str = "directory";

/// A response body as a stream of byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

// ---------------------------------------------------------------------------
// Raw capture
// ---------------------------------------------------------------------------

/// Passes chunks through, optionally keeping a copy of every byte.
struct Tee {
    inner: ByteStream,
    captured: Option<Vec<u8>>,
}

impl Stream for Tee {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = this.inner.as_mut().poll_next(cx);
        if let (Poll::Ready(Some(Ok(chunk))), Some(captured)) = (&polled, this.captured.as_mut()) {
            captured.extend_from_slice(chunk);
        }
        polled
    }
}

// ---------------------------------------------------------------------------
// RecordStream
// ---------------------------------------------------------------------------

/// Owned form of the reader events the parser cares about.
enum Token {
    Open {
        name: String,
        attributes: Vec<(String, String)>,
        empty: bool,
    },
    Close,
    Text(String),
    Eof,
}

enum Step {
    Continue,
    Emit(Record),
    End,
}

/// Lazy, finite, non-restartable sequence of records parsed from one response.
pub struct RecordStream {
    reader: Reader<StreamReader<Tee, Bytes>>,
    buf: Vec<u8>,
    /// Names of every open element, outermost first.
    open: Vec<String>,
    /// Elements of the record being assembled, outermost first.
    capture: Vec<XmlElement>,
    /// Text collected inside `<reply type="error">`.
    error_reply: Option<String>,
    cursor: PageCursor,
    /// Set once the document element has been opened.
    rooted: bool,
    finished: bool,
}

impl RecordStream {
    /// Parse `body`. With `capture_raw` every byte is also kept for [`Self::into_raw`].
    pub fn new(body: ByteStream, capture_raw: bool) -> Self {
        let tee = Tee {
            inner: body,
            captured: capture_raw.then(Vec::new),
        };
        let mut reader = Reader::from_reader(StreamReader::new(tee));
        reader.config_mut().trim_text(true);

        Self {
            reader,
            buf: Vec::new(),
            open: Vec::new(),
            capture: Vec::new(),
            error_reply: None,
            cursor: PageCursor::default(),
            rooted: false,
            finished: false,
        }
    }

    /// Parse an in-memory body delivered as a single chunk.
    pub fn from_bytes(body: impl Into<Bytes>, capture_raw: bool) -> Self {
        let body: Bytes = body.into();
        let chunks = futures::stream::iter([Ok::<_, io::Error>(body)]);
        Self::new(Box::pin(chunks), capture_raw)
    }

    /// Next completed record. `None` marks the end of the sequence and is
    /// returned for every call after the document ends or an error is yielded.
    pub async fn next_record(&mut self) -> Option<Result<Record>> {
        if self.finished {
            return None;
        }
        loop {
            let step = match self.next_token().await {
                Ok(token) => self.apply(token),
                Err(e) => Err(e),
            };
            match step {
                Ok(Step::Continue) => continue,
                Ok(Step::Emit(record)) => return Some(Ok(record)),
                Ok(Step::End) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }

    /// Result cursor seen so far.
    pub fn cursor(&self) -> PageCursor {
        self.cursor
    }

    /// Captured body, when raw capture was enabled.
    pub fn into_raw(self) -> Option<String> {
        let tee = self.reader.into_inner().into_inner();
        tee.captured.map(|bytes| {
            String::from_utf8(bytes)
                .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
        })
    }

    /// Drain the sequence into a [`QueryPage`].
    pub async fn collect_page(mut self) -> Result<QueryPage> {
        let mut page = QueryPage::default();
        while let Some(record) = self.next_record().await {
            match record? {
                Record::Asset(asset) => page.assets.push(asset),
                Record::Directory(Some(directory)) => page.directories.push(directory),
                Record::Directory(None) => page.unnamed_directories += 1,
            }
        }
        page.cursor = self.cursor;
        page.raw = self.into_raw();
        Ok(page)
    }

    async fn next_token(&mut self) -> Result<Token> {
        loop {
            self.buf.clear();
            let event = self
                .reader
                .read_event_into_async(&mut self.buf)
                .await
                .map_err(|e| match e {
                    quick_xml::Error::Io(e) => {
                        MirrorError::transport(format!("response body read failed: {e}"))
                    }
                    other => MirrorError::parse(other.to_string()),
                })?;

            let token = match event {
                Event::Start(e) => Token::Open {
                    name: local_name(&e),
                    attributes: attributes(&e)?,
                    empty: false,
                },
                Event::Empty(e) => Token::Open {
                    name: local_name(&e),
                    attributes: attributes(&e)?,
                    empty: true,
                },
                Event::End(_) => Token::Close,
                Event::Text(e) => Token::Text(
                    e.unescape()
                        .map_err(|e| MirrorError::parse(format!("bad text content: {e}")))?
                        .into_owned(),
                ),
                Event::CData(e) => Token::Text(String::from_utf8_lossy(&e).into_owned()),
                Event::Eof => Token::Eof,
                _ => continue,
            };
            return Ok(token);
        }
    }

    fn apply(&mut self, token: Token) -> Result<Step> {
        match token {
            Token::Open {
                name,
                attributes,
                empty,
            } => {
                self.rooted = true;
                if name == "reply" && attributes.iter().any(|(k, v)| k == "type" && v == "error") {
                    self.error_reply = Some(String::new());
                }
                if !self.capture.is_empty() || name == ASSET_ELEMENT || name == DIRECTORY_ELEMENT {
                    self.capture.push(XmlElement {
                        name: name.clone(),
                        attributes,
                        ..Default::default()
                    });
                }
                self.open.push(name);
                if empty {
                    return self.close();
                }
                Ok(Step::Continue)
            }
            Token::Close => self.close(),
            Token::Text(text) => {
                if self.open.is_empty() && !text.trim().is_empty() {
                    return Err(MirrorError::parse(format!(
                        "text outside the document element: {}",
                        snippet(&text)
                    )));
                }
                self.text(&text);
                Ok(Step::Continue)
            }
            Token::Eof => match self.open.last() {
                Some(name) => Err(MirrorError::parse(format!(
                    "document ended inside <{name}>"
                ))),
                None if !self.rooted => Err(MirrorError::parse("response holds no XML document")),
                None => Ok(Step::End),
            },
        }
    }

    fn close(&mut self) -> Result<Step> {
        let name = self
            .open
            .pop()
            .ok_or_else(|| MirrorError::parse("unbalanced end tag"))?;

        if name == "reply" {
            if let Some(message) = self.error_reply.take() {
                return Err(MirrorError::service(if message.is_empty() {
                    "remote service returned an error reply".to_string()
                } else {
                    message
                }));
            }
        }

        let Some(element) = self.capture.pop() else {
            return Ok(Step::Continue);
        };
        if let Some(parent) = self.capture.last_mut() {
            parent.children.push(element);
            return Ok(Step::Continue);
        }

        let record = if element.name == ASSET_ELEMENT {
            Record::Asset(AssetRecord::new(element))
        } else {
            Record::Directory(DirectoryRecord::from_element(&element))
        };
        Ok(Step::Emit(record))
    }

    fn text(&mut self, text: &str) {
        if let Some(element) = self.capture.last_mut() {
            element.text.push_str(text);
        }

        if path_ends_with(&self.open, &["cursor", "total"]) {
            self.cursor.total = text.trim().parse().ok();
        } else if path_ends_with(&self.open, &["cursor", "remaining"]) {
            self.cursor.remaining = text.trim().parse().ok();
        }

        if let Some(message) = self.error_reply.as_mut() {
            if matches!(self.open.last().map(String::as_str), Some("error" | "message")) {
                if !message.is_empty() {
                    message.push_str(": ");
                }
                message.push_str(text.trim());
            }
        }
    }
}

/// Whether the innermost open elements are exactly `suffix`.
pub(crate) fn path_ends_with(open: &[String], suffix: &[&str]) -> bool {
    open.len() >= suffix.len()
        && open
            .iter()
            .rev()
            .zip(suffix.iter().rev())
            .all(|(name, expected)| name == expected)
}

/// First line of `text`, cut to a length fit for an error message.
fn snippet(text: &str) -> String {
    let line = text.trim().lines().next().unwrap_or_default();
    line.chars().take(60).collect()
}

fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

fn attributes(start: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
    start
        .attributes()
        .map(|attr| {
            let attr = attr.map_err(|e| MirrorError::parse(format!("bad attribute: {e}")))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| MirrorError::parse(format!("bad attribute value: {e}")))?
                .into_owned();
            Ok((key, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUERY_REPLY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<response>
  <reply type="result">
    <result>
      <asset id="1001" version="3">
        <path>img.png</path>
        <meta><size units="bytes">12</size></meta>
      </asset>
      <directory name="sub"/>
      <asset id="1002"><path>notes &amp; todo.txt</path></asset>
      <directory><name>other</name></directory>
      <cursor><count>2</count><total>2</total><remaining>0</remaining></cursor>
    </result>
  </reply>
</response>"#;

    fn chunked(data: &str, size: usize) -> ByteStream {
        let chunks: Vec<io::Result<Bytes>> = data
            .as_bytes()
            .chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Box::pin(futures::stream::iter(chunks))
    }

    async fn drain(mut stream: RecordStream) -> Vec<Result<Record>> {
        let mut out = Vec::new();
        while let Some(record) = stream.next_record().await {
            out.push(record);
        }
        out
    }

    fn describe(record: &Record) -> String {
        match record {
            Record::Asset(a) => format!("asset:{}", a.id().unwrap_or("?")),
            Record::Directory(Some(d)) => format!("dir:{}", d.name),
            Record::Directory(None) => "dir:?".into(),
        }
    }

    #[tokio::test]
    async fn emits_records_in_document_order() {
        let records = drain(RecordStream::from_bytes(QUERY_REPLY, false)).await;
        let names: Vec<String> = records
            .iter()
            .map(|r| describe(r.as_ref().expect("record")))
            .collect();
        assert_eq!(names, vec!["asset:1001", "dir:sub", "asset:1002", "dir:other"]);
    }

    #[tokio::test]
    async fn end_of_stream_is_sticky() {
        let mut stream = RecordStream::from_bytes(QUERY_REPLY, false);
        let mut count = 0;
        while let Some(record) = stream.next_record().await {
            record.expect("record");
            count += 1;
        }
        assert_eq!(count, 4);
        assert!(stream.next_record().await.is_none());
        assert!(stream.next_record().await.is_none());
    }

    #[tokio::test]
    async fn chunk_boundaries_do_not_matter() {
        let whole = RecordStream::from_bytes(QUERY_REPLY, false)
            .collect_page()
            .await
            .unwrap();
        let bytewise = RecordStream::new(chunked(QUERY_REPLY, 1), false)
            .collect_page()
            .await
            .unwrap();
        assert_eq!(whole.assets, bytewise.assets);
        assert_eq!(whole.directories, bytewise.directories);
        assert_eq!(whole.cursor, bytewise.cursor);
    }

    #[tokio::test]
    async fn preserves_nested_asset_structure() {
        let page = RecordStream::from_bytes(QUERY_REPLY, false)
            .collect_page()
            .await
            .unwrap();
        let first = page.assets[0].element();
        assert_eq!(first.attr("version"), Some("3"));
        let size = first
            .child("meta")
            .and_then(|m| m.child("size"))
            .expect("meta/size preserved");
        assert_eq!(size.text(), Some("12"));
        assert_eq!(size.attr("units"), Some("bytes"));

        assert_eq!(page.assets[1].display_name(), Some("notes & todo.txt"));
    }

    #[tokio::test]
    async fn nested_asset_stays_inside_parent() {
        let xml = r#"<response><reply><result>
            <asset id="1"><path>outer</path><asset id="2"><path>inner</path></asset></asset>
        </result></reply></response>"#;
        let page = RecordStream::from_bytes(xml, false)
            .collect_page()
            .await
            .unwrap();
        assert_eq!(page.assets.len(), 1);
        assert_eq!(page.assets[0].id(), Some("1"));
        let children: Vec<_> = page.assets[0].children().collect();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, "2");
    }

    #[tokio::test]
    async fn cursor_is_reported() {
        let page = RecordStream::from_bytes(QUERY_REPLY, false)
            .collect_page()
            .await
            .unwrap();
        assert_eq!(page.cursor.total, Some(2));
        assert_eq!(page.cursor.remaining, Some(0));
    }

    #[tokio::test]
    async fn raw_capture_returns_whole_body() {
        let page = RecordStream::new(chunked(QUERY_REPLY, 7), true)
            .collect_page()
            .await
            .unwrap();
        assert_eq!(page.raw.as_deref(), Some(QUERY_REPLY));

        let page = RecordStream::from_bytes(QUERY_REPLY, false)
            .collect_page()
            .await
            .unwrap();
        assert!(page.raw.is_none());
    }

    #[tokio::test]
    async fn mismatched_tags_end_with_parse_error() {
        let xml = "<response><reply><result><asset id=\"1\"><path>a</path></asset><directory name=\"x\"></wrong></result></reply></response>";
        let records = drain(RecordStream::from_bytes(xml, false)).await;
        assert_eq!(records.len(), 2);
        assert!(records[0].is_ok());
        assert!(matches!(records[1], Err(MirrorError::Parse { .. })));
    }

    #[tokio::test]
    async fn truncated_document_is_an_error() {
        let xml = "<response><reply><result><asset id=\"1\"><path>a</path>";
        let mut stream = RecordStream::from_bytes(xml, false);
        let first = stream.next_record().await.expect("terminal item");
        assert!(first.is_err());
        assert!(stream.next_record().await.is_none());
    }

    #[tokio::test]
    async fn error_reply_becomes_service_error() {
        let xml = r#"<response><reply type="error"><error>arc.mf.server.Services$ExServiceError</error><message>asset 99 does not exist</message></reply></response>"#;
        let records = drain(RecordStream::from_bytes(xml, false)).await;
        assert_eq!(records.len(), 1);
        match &records[0] {
            Err(MirrorError::Service { message }) => {
                assert!(message.contains("asset 99 does not exist"));
            }
            other => panic!("expected service error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_body_is_a_parse_error() {
        let records = drain(RecordStream::from_bytes("", false)).await;
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], Err(MirrorError::Parse { .. })));

        let declaration_only = RecordStream::from_bytes("<?xml version=\"1.0\"?>\n", true)
            .collect_page()
            .await;
        assert!(matches!(declaration_only, Err(MirrorError::Parse { .. })));
    }

    #[tokio::test]
    async fn plain_text_body_is_a_parse_error() {
        let result = RecordStream::from_bytes("Service temporarily unavailable", true)
            .collect_page()
            .await;
        match result {
            Err(MirrorError::Parse { message }) => {
                assert!(message.contains("Service temporarily unavailable"));
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn trailing_text_after_document_is_a_parse_error() {
        let xml = "<response><reply><result/></reply></response>\nmaintenance page";
        let records = drain(RecordStream::from_bytes(xml, false)).await;
        assert!(matches!(records.last(), Some(Err(MirrorError::Parse { .. }))));
    }

    #[tokio::test]
    async fn unnamed_directories_are_counted() {
        let xml = "<response><reply><result><directory/><directory name=\"a\"/></result></reply></response>";
        let page = RecordStream::from_bytes(xml, false)
            .collect_page()
            .await
            .unwrap();
        assert_eq!(page.directories.len(), 1);
        assert_eq!(page.unnamed_directories, 1);
    }

    #[test]
    fn path_suffix_matching() {
        let open: Vec<String> = ["response", "reply", "result", "session"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(path_ends_with(&open, &["reply", "result", "session"]));
        assert!(!path_ends_with(&open, &["cursor", "session"]));
        assert!(!path_ends_with(&open[..1], &["reply", "response"]));
    }
}
