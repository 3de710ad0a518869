//! GraphQL documents and variables, built fresh for every request.
//!
//! Everything here is a pure function of the stream and the pagination state
//! passed in; nothing is cached between pages.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::extract::stream::{QueryShape, StreamDefinition};

/// Probe used to read the bucket size before planning partitions.
pub const SHOP_PROBE_QUERY: &str = "query { shop { id } }";

/// Status of the shop's current bulk operation.
pub const CURRENT_BULK_OPERATION_QUERY: &str = r"query {
  currentBulkOperation {
    id
    status
    errorCode
    createdAt
    completedAt
    objectCount
    fileSize
    url
    partialDataUrl
  }
}";

/// Timestamp layout accepted by the Admin API search syntax.
pub const FILTER_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Converts a camelCase field name to the snake_case search field.
///
/// ```rust
/// use shopify_extract::extract::query::snake_case;
///
/// assert_eq!(snake_case("updatedAt"), "updated_at");
/// assert_eq!(snake_case("created_at"), "created_at");
/// ```
#[must_use]
pub fn snake_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 4);
    for (i, ch) in field.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Formats a bound for the search syntax.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(FILTER_TIMESTAMP_FORMAT).to_string()
}

/// Builds the `query:` search filter for a window.
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use shopify_extract::extract::query::window_filter;
///
/// let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
/// let end = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
///
/// assert_eq!(
///     window_filter("updatedAt", start, Some(end)),
///     "updated_at:>='2024-01-01T00:00:00' AND updated_at:<'2024-02-01T00:00:00'"
/// );
/// ```
#[must_use]
pub fn window_filter(
    replication_key: &str,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) -> String {
    let field = snake_case(replication_key);
    let mut filter = format!("{field}:>='{}'", format_timestamp(start));
    if let Some(end) = end {
        filter.push_str(&format!(" AND {field}:<'{}'", format_timestamp(end)));
    }
    filter
}

/// Document for one page of a connection.
#[must_use]
pub fn connection_query(stream: &StreamDefinition) -> String {
    format!(
        r"query extractPage($first: Int!, $after: String, $filter: String) {{
  {name}(first: $first, after: $after, query: $filter) {{
    edges {{
      cursor
      node {{
        {selection}
      }}
    }}
    pageInfo {{
      hasNextPage
      endCursor
    }}
  }}
}}",
        name = stream.query_name(),
        selection = stream.selection(),
    )
}

/// Variables for [`connection_query`].
#[must_use]
pub fn page_variables(first: u32, after: Option<&str>, filter: Option<&str>) -> Value {
    json!({
        "first": first,
        "after": after,
        "filter": filter,
    })
}

/// Document and variables for a non-paginated stream.
///
/// Returns `None` for connections.
#[must_use]
pub fn single_query(stream: &StreamDefinition) -> Option<(String, Value)> {
    let name = stream.query_name();
    let selection = stream.selection();
    match stream.shape() {
        QueryShape::Connection => None,
        QueryShape::Object => Some((
            format!("query {{\n  {name} {{\n    {selection}\n  }}\n}}"),
            Value::Null,
        )),
        QueryShape::SingleById { id } => Some((
            format!(
                "query extractOne($id: ID!) {{\n  {name}(id: $id) {{\n    {selection}\n  }}\n}}"
            ),
            json!({ "id": id }),
        )),
    }
}

/// Mutation submitting a bulk export of the whole (filtered) connection.
#[must_use]
pub fn bulk_run_mutation(stream: &StreamDefinition, filter: Option<&str>) -> String {
    let arguments = filter
        .map(|filter| format!("(query: \"{}\")", filter.replace('"', "\\\"")))
        .unwrap_or_default();

    format!(
        r#"mutation {{
  bulkOperationRunQuery(
    query: """
    {{
      {name}{arguments} {{
        edges {{
          node {{
            {selection}
          }}
        }}
      }}
    }}
    """
  ) {{
    bulkOperation {{
      id
      status
    }}
    userErrors {{
      field
      message
    }}
  }}
}}"#,
        name = stream.query_name(),
        selection = stream.selection(),
    )
}

/// Document fetching the record with the smallest replication key.
#[must_use]
pub fn earliest_record_query(stream: &StreamDefinition, sort_key: &str, replication_key: &str) -> String {
    format!(
        r"query earliestRecord($filter: String) {{
  {name}(first: 1, sortKey: {sort_key}, query: $filter) {{
    edges {{
      node {{
        {replication_key}
      }}
    }}
  }}
}}",
        name = stream.query_name(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn products() -> StreamDefinition {
        StreamDefinition::connection("products", "id title updatedAt")
            .with_replication_key("updatedAt")
    }

    #[test]
    fn test_window_filter_without_end() {
        let start = Utc.with_ymd_and_hms(2024, 3, 5, 12, 30, 15).unwrap();
        assert_eq!(
            window_filter("updatedAt", start, None),
            "updated_at:>='2024-03-05T12:30:15'"
        );
    }

    #[test]
    fn test_connection_query_embeds_name_and_selection() {
        let query = connection_query(&products());
        assert!(query.contains("products(first: $first, after: $after, query: $filter)"));
        assert!(query.contains("id title updatedAt"));
        assert!(query.contains("hasNextPage"));
    }

    #[test]
    fn test_page_variables_are_rebuilt_from_state() {
        let first = page_variables(1, None, Some("updated_at:>='2024-01-01T00:00:00'"));
        assert_eq!(first["first"], 1);
        assert_eq!(first["after"], Value::Null);

        let next = page_variables(50, Some("abc"), None);
        assert_eq!(next["after"], "abc");
        assert_eq!(next["filter"], Value::Null);
    }

    #[test]
    fn test_single_query_shapes() {
        assert!(single_query(&products()).is_none());

        let (query, variables) = single_query(&StreamDefinition::object("shop", "id name")).unwrap();
        assert!(query.contains("shop {"));
        assert_eq!(variables, Value::Null);

        let (query, variables) = single_query(&StreamDefinition::single_by_id(
            "product",
            "gid://shopify/Product/1",
            "id",
        ))
        .unwrap();
        assert!(query.contains("product(id: $id)"));
        assert_eq!(variables["id"], "gid://shopify/Product/1");
    }

    #[test]
    fn test_bulk_mutation_with_and_without_filter() {
        let unfiltered = bulk_run_mutation(&products(), None);
        assert!(unfiltered.contains("products {"));
        assert!(unfiltered.contains("userErrors"));

        let filtered = bulk_run_mutation(&products(), Some("updated_at:>='2024-01-01T00:00:00'"));
        assert!(filtered.contains("products(query: \"updated_at:>='2024-01-01T00:00:00'\") {"));
    }

    #[test]
    fn test_earliest_record_query_uses_sort_key() {
        let query = earliest_record_query(&products(), "UPDATED_AT", "updatedAt");
        assert!(query.contains("products(first: 1, sortKey: UPDATED_AT, query: $filter)"));
        assert!(query.contains("updatedAt"));
    }
}
