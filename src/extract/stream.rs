//! Host-supplied description of what to extract.

use std::collections::HashMap;

/// How a stream's root field is queried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryShape {
    /// A paginated connection (`products(first:, after:, query:)`).
    Connection,
    /// A single object with no arguments (`shop`).
    Object,
    /// A single object looked up by id (`product(id:)`).
    SingleById {
        /// The global id to look up.
        id: String,
    },
}

/// One extractable resource.
///
/// # Example
///
/// ```rust
/// use shopify_extract::extract::StreamDefinition;
///
/// let products = StreamDefinition::connection("products", "id title updatedAt")
///     .with_replication_key("updatedAt")
///     .with_nested("ProductVariant", "variants");
///
/// assert_eq!(products.name(), "products");
/// assert_eq!(products.nested_field("ProductVariant"), Some("variants"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamDefinition {
    name: String,
    query_name: String,
    selection: String,
    replication_key: Option<String>,
    shape: QueryShape,
    nesting: HashMap<String, String>,
}

impl StreamDefinition {
    fn new(query_name: impl Into<String>, selection: impl Into<String>, shape: QueryShape) -> Self {
        let query_name = query_name.into();
        Self {
            name: query_name.clone(),
            query_name,
            selection: selection.into(),
            replication_key: None,
            shape,
            nesting: HashMap::new(),
        }
    }

    /// A paginated connection rooted at `query_name`.
    ///
    /// `selection` is the selection set of one node (without braces).
    #[must_use]
    pub fn connection(query_name: impl Into<String>, selection: impl Into<String>) -> Self {
        Self::new(query_name, selection, QueryShape::Connection)
    }

    /// A single object such as `shop`.
    #[must_use]
    pub fn object(query_name: impl Into<String>, selection: impl Into<String>) -> Self {
        Self::new(query_name, selection, QueryShape::Object)
    }

    /// A single object looked up by global id.
    #[must_use]
    pub fn single_by_id(
        query_name: impl Into<String>,
        id: impl Into<String>,
        selection: impl Into<String>,
    ) -> Self {
        Self::new(query_name, selection, QueryShape::SingleById { id: id.into() })
    }

    /// Overrides the stream name used in logs (defaults to the query name).
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the field used for incremental replication, e.g. `updatedAt`.
    #[must_use]
    pub fn with_replication_key(mut self, key: impl Into<String>) -> Self {
        self.replication_key = Some(key.into());
        self
    }

    /// Nests bulk child records of `resource_type` under `field` of their parent.
    #[must_use]
    pub fn with_nested(mut self, resource_type: impl Into<String>, field: impl Into<String>) -> Self {
        self.nesting.insert(resource_type.into(), field.into());
        self
    }

    /// Name used in logs and errors.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root field of the GraphQL query.
    #[must_use]
    pub fn query_name(&self) -> &str {
        &self.query_name
    }

    /// Fields selected on each node.
    #[must_use]
    pub fn selection(&self) -> &str {
        &self.selection
    }

    /// Field whose value orders records for incremental extraction.
    #[must_use]
    pub fn replication_key(&self) -> Option<&str> {
        self.replication_key.as_deref()
    }

    /// How the query is paginated.
    #[must_use]
    pub const fn shape(&self) -> &QueryShape {
        &self.shape
    }

    /// Field that children of `resource_type` are nested under, if mapped.
    #[must_use]
    pub fn nested_field(&self, resource_type: &str) -> Option<&str> {
        self.nesting.get(resource_type).map(String::as_str)
    }

    /// Whether the stream is paginated.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self.shape, QueryShape::Connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_shape() {
        assert!(StreamDefinition::connection("orders", "id").is_connection());
        assert_eq!(
            StreamDefinition::object("shop", "id name").shape(),
            &QueryShape::Object
        );
        let single = StreamDefinition::single_by_id("product", "gid://shopify/Product/1", "id");
        assert_eq!(
            single.shape(),
            &QueryShape::SingleById {
                id: "gid://shopify/Product/1".to_string()
            }
        );
    }

    #[test]
    fn test_name_defaults_to_query_name() {
        let stream = StreamDefinition::connection("orders", "id");
        assert_eq!(stream.name(), "orders");
        assert_eq!(stream.with_name("shop_orders").name(), "shop_orders");
    }

    #[test]
    fn test_unmapped_nested_field() {
        let stream = StreamDefinition::connection("products", "id");
        assert_eq!(stream.nested_field("ProductVariant"), None);
        assert_eq!(stream.replication_key(), None);
    }
}
