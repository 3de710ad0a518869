//! Reading bulk JSONL results and re-nesting child records.
//!
//! A bulk export flattens connections: a product line is followed by one line
//! per variant, each carrying `__parentId`. [`NestingReconstructor`] folds the
//! children back into the parent before the parent is emitted.

use std::sync::Arc;

use serde_json::Value;

use crate::clients::{ChunkSource, HttpError};
use crate::extract::stream::StreamDefinition;
use crate::extract::{ExtractError, Record};

/// Field linking a bulk child line to its parent.
pub const PARENT_ID_FIELD: &str = "__parentId";

/// Field children are nested under when their type has no mapping.
pub const DEFAULT_CHILDREN_FIELD: &str = "children";

/// Resource type segment of a global id.
///
/// ```rust
/// use shopify_extract::extract::nesting::resource_type;
///
/// assert_eq!(resource_type("gid://shopify/ProductVariant/42"), Some("ProductVariant"));
/// assert_eq!(resource_type("42"), None);
/// ```
#[must_use]
pub fn resource_type(gid: &str) -> Option<&str> {
    let path = gid.strip_prefix("gid://")?;
    let mut segments = path.split('/');
    let _app = segments.next()?;
    segments.next().filter(|segment| !segment.is_empty())
}

/// Splits a byte stream into lines, across chunk boundaries.
pub struct LineReader {
    source: Box<dyn ChunkSource>,
    buffer: Vec<u8>,
    // Bytes of `buffer` already known to hold no newline.
    scanned: usize,
    exhausted: bool,
}

impl LineReader {
    /// Reads lines from `source`.
    #[must_use]
    pub fn new(source: Box<dyn ChunkSource>) -> Self {
        Self {
            source,
            buffer: Vec::new(),
            scanned: 0,
            exhausted: false,
        }
    }

    /// Returns the next non-blank line, or `None` at end of input.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Graphql`] if the download fails mid-body and
    /// [`ExtractError::InvalidBulkLine`] for a line that is not UTF-8.
    pub async fn next_line(&mut self) -> Result<Option<String>, ExtractError> {
        loop {
            if let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
                let rest = self.buffer.split_off(self.scanned + offset + 1);
                let line = std::mem::replace(&mut self.buffer, rest);
                self.scanned = 0;
                if let Some(line) = decode_line(line)? {
                    return Ok(Some(line));
                }
                continue;
            }
            self.scanned = self.buffer.len();

            if self.exhausted {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                self.scanned = 0;
                let line = std::mem::take(&mut self.buffer);
                return decode_line(line);
            }

            match self
                .source
                .next_chunk()
                .await
                .map_err(|e: HttpError| ExtractError::Graphql(e.into()))?
            {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None => self.exhausted = true,
            }
        }
    }
}

fn decode_line(bytes: Vec<u8>) -> Result<Option<String>, ExtractError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    match String::from_utf8(bytes) {
        Ok(line) => Ok(Some(line.trim().to_string())),
        Err(e) => Err(ExtractError::InvalidBulkLine {
            line: String::from_utf8_lossy(e.as_bytes()).trim().to_string(),
            source: None,
        }),
    }
}

/// Parses one JSONL line into a record.
///
/// # Errors
///
/// Returns [`ExtractError::InvalidBulkLine`] for invalid JSON or a non-object.
pub fn parse_line(line: &str) -> Result<Record, ExtractError> {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(record)) => Ok(record),
        Ok(_) => Err(ExtractError::InvalidBulkLine {
            line: line.to_string(),
            source: None,
        }),
        Err(e) => Err(ExtractError::InvalidBulkLine {
            line: line.to_string(),
            source: Some(e),
        }),
    }
}

/// Folds child lines into the parent they follow.
///
/// The nested field for a child comes from the stream's nesting map, keyed
/// by the resource type of the child's own `id` (a `ProductVariant` line goes
/// under whatever field `ProductVariant` maps to). The `__parentId` only
/// decides which record the child is attached to. Unmapped types go under
/// [`DEFAULT_CHILDREN_FIELD`].
#[derive(Debug)]
pub struct NestingReconstructor {
    stream: Arc<StreamDefinition>,
    current: Option<Record>,
}

impl NestingReconstructor {
    /// Creates a reconstructor using the nesting map of `stream`.
    #[must_use]
    pub const fn new(stream: Arc<StreamDefinition>) -> Self {
        Self {
            stream,
            current: None,
        }
    }

    /// Consumes one line; returns the previous parent once a new parent starts.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::OrphanChild`] if a child arrives before any parent.
    pub fn push(&mut self, record: Record) -> Result<Option<Record>, ExtractError> {
        let parent_id = record
            .get(PARENT_ID_FIELD)
            .and_then(Value::as_str)
            .map(String::from);

        let Some(parent_id) = parent_id else {
            return Ok(self.current.replace(record));
        };
        let Some(root) = self.current.as_mut() else {
            return Err(ExtractError::OrphanChild {
                line: Value::Object(record).to_string(),
            });
        };

        let field = record
            .get("id")
            .and_then(Value::as_str)
            .and_then(resource_type)
            .and_then(|kind| self.stream.nested_field(kind))
            .unwrap_or(DEFAULT_CHILDREN_FIELD)
            .to_string();

        // Grandchildren reference a child already folded into the root.
        if let Err(child) = insert_under(root, &parent_id, &field, Value::Object(record)) {
            tracing::debug!(
                stream = self.stream.name(),
                parent_id,
                "Parent id not found under current record, nesting under it anyway"
            );
            append_child(root, &field, child);
        }
        Ok(None)
    }

    /// Flushes the last pending parent.
    pub fn finish(&mut self) -> Option<Record> {
        self.current.take()
    }
}

/// Appends `child` under the record whose id is `parent_id`, searching
/// nested children depth first. Hands the child back if no record matches.
fn insert_under(record: &mut Record, parent_id: &str, field: &str, child: Value) -> Result<(), Value> {
    if record.get("id").and_then(Value::as_str) == Some(parent_id) {
        append_child(record, field, child);
        return Ok(());
    }

    let mut child = child;
    for value in record.values_mut() {
        if let Value::Array(items) = value {
            for item in items.iter_mut() {
                if let Value::Object(nested) = item {
                    match insert_under(nested, parent_id, field, child) {
                        Ok(()) => return Ok(()),
                        Err(back) => child = back,
                    }
                }
            }
        }
    }
    Err(child)
}

fn append_child(record: &mut Record, field: &str, child: Value) {
    match record
        .entry(field)
        .or_insert_with(|| Value::Array(Vec::new()))
    {
        Value::Array(children) => children.push(child),
        other => {
            tracing::warn!(field, "Nested field already holds a non-array value, replacing it");
            *other = Value::Array(vec![child]);
        }
    }
}

/// Records of a finished bulk operation, read lazily from the download.
pub struct BulkRecords {
    reader: LineReader,
    nesting: NestingReconstructor,
}

impl BulkRecords {
    /// Combines a line reader with a reconstructor.
    #[must_use]
    pub const fn new(reader: LineReader, nesting: NestingReconstructor) -> Self {
        Self { reader, nesting }
    }

    /// Returns the next complete top-level record.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] for download failures, malformed lines and
    /// orphaned children.
    pub async fn next(&mut self) -> Result<Option<Record>, ExtractError> {
        loop {
            let Some(line) = self.reader.next_line().await? else {
                return Ok(self.nesting.finish());
            };
            if let Some(parent) = self.nesting.push(parse_line(&line)?)? {
                return Ok(Some(parent));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::BufferedChunks;
    use serde_json::json;

    fn obj(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn products() -> Arc<StreamDefinition> {
        Arc::new(
            StreamDefinition::connection("products", "id title")
                .with_nested("ProductVariant", "variants"),
        )
    }

    async fn drain(chunks: Vec<&str>, stream: Arc<StreamDefinition>) -> Result<Vec<Record>, ExtractError> {
        let reader = LineReader::new(Box::new(BufferedChunks::new(chunks)));
        let mut records = BulkRecords::new(reader, NestingReconstructor::new(stream));
        let mut out = Vec::new();
        while let Some(record) = records.next().await? {
            out.push(record);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn test_line_reader_joins_chunks_and_skips_blank_lines() {
        let source = BufferedChunks::new(["{\"a\":", "1}\n\n  \n{\"b\"", ":2}\n{\"c\":3}"]);
        let mut reader = LineReader::new(Box::new(source));

        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("{\"b\":2}"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("{\"c\":3}"));
        assert_eq!(reader.next_line().await.unwrap(), None);
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_children_nest_under_preceding_parent_in_order() {
        let lines = [
            r#"{"id":"gid://shopify/Product/1"}"#,
            r#"{"id":"gid://shopify/Image/11","__parentId":"gid://shopify/Product/1"}"#,
            r#"{"id":"gid://shopify/Image/12","__parentId":"gid://shopify/Product/1"}"#,
            r#"{"id":"gid://shopify/Product/2"}"#,
            r#"{"id":"gid://shopify/Image/21","__parentId":"gid://shopify/Product/2"}"#,
        ]
        .join("\n");

        let records = drain(vec![&lines], products()).await.unwrap();
        assert_eq!(
            records,
            vec![
                obj(json!({"id": "gid://shopify/Product/1", "children": [
                    {"id": "gid://shopify/Image/11", "__parentId": "gid://shopify/Product/1"},
                    {"id": "gid://shopify/Image/12", "__parentId": "gid://shopify/Product/1"}
                ]})),
                obj(json!({"id": "gid://shopify/Product/2", "children": [
                    {"id": "gid://shopify/Image/21", "__parentId": "gid://shopify/Product/2"}
                ]})),
            ]
        );
    }

    #[tokio::test]
    async fn test_mapped_resource_type_selects_field() {
        let lines = "{\"id\":\"gid://shopify/Product/1\"}\n\
                     {\"id\":\"gid://shopify/ProductVariant/5\",\"__parentId\":\"gid://shopify/Product/1\"}\n";
        let records = drain(vec![lines], products()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["variants"][0]["id"], "gid://shopify/ProductVariant/5");
        assert!(!records[0].contains_key("children"));
    }

    #[tokio::test]
    async fn test_grandchildren_nest_under_their_own_parent() {
        let lines = [
            r#"{"id":"gid://shopify/Product/1"}"#,
            r#"{"id":"gid://shopify/ProductVariant/5","__parentId":"gid://shopify/Product/1"}"#,
            r#"{"id":"gid://shopify/Metafield/9","__parentId":"gid://shopify/ProductVariant/5"}"#,
        ]
        .join("\n");

        let records = drain(vec![&lines], products()).await.unwrap();
        assert_eq!(
            records[0]["variants"][0]["children"][0]["id"],
            "gid://shopify/Metafield/9"
        );
    }

    #[tokio::test]
    async fn test_child_before_any_parent_is_an_orphan() {
        let lines = r#"{"id":"gid://shopify/ProductVariant/5","__parentId":"gid://shopify/Product/1"}"#;
        let error = drain(vec![lines], products()).await.unwrap_err();
        assert!(matches!(error, ExtractError::OrphanChild { .. }));
    }

    #[tokio::test]
    async fn test_invalid_line_is_reported() {
        let error = drain(vec!["{\"id\":1}\nnot json\n"], products())
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            ExtractError::InvalidBulkLine { ref line, source: Some(_) } if line == "not json"
        ));

        let error = drain(vec!["[1,2]\n"], products()).await.unwrap_err();
        assert!(matches!(error, ExtractError::InvalidBulkLine { source: None, .. }));
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_rejected() {
        let source = BufferedChunks::new([b"{\"title\":\"caf\xE9\"}\n".to_vec()]);
        let reader = LineReader::new(Box::new(source));
        let mut records = BulkRecords::new(reader, NestingReconstructor::new(products()));

        let error = records.next().await.unwrap_err();
        assert!(matches!(
            error,
            ExtractError::InvalidBulkLine { ref line, source: None } if line.starts_with("{\"title\"")
        ));
    }

    #[tokio::test]
    async fn test_long_line_across_many_chunks() {
        let value = "x".repeat(4096);
        let line = format!("{{\"id\":\"gid://shopify/Product/1\",\"body\":\"{value}\"}}\n");
        let chunks: Vec<String> = line
            .as_bytes()
            .chunks(7)
            .map(|chunk| String::from_utf8(chunk.to_vec()).unwrap())
            .collect();
        let mut reader = LineReader::new(Box::new(BufferedChunks::new(chunks)));

        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some(line.trim()));
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_result_yields_nothing() {
        assert!(drain(vec![], products()).await.unwrap().is_empty());
    }
}
