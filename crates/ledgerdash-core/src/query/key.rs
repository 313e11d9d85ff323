//! Query keys and their canonical form.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Identity of one cached, fetchable unit of data.
///
/// A key is an ordered list of JSON values. Its canonical form is the compact
/// JSON serialization of that list; `serde_json` keeps object keys sorted, so
/// two keys built from equal parts always canonicalize to the same string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    parts: Vec<Value>,
    canonical: String,
}

impl QueryKey {
    pub fn new(parts: Vec<Value>) -> Self {
        let canonical = Value::Array(parts.clone()).to_string();
        Self { parts, canonical }
    }

    /// Build a key from any serializable parts.
    ///
    /// Parts that cannot be represented as JSON become `null`.
    pub fn from_parts<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Serialize,
    {
        Self::new(
            parts
                .into_iter()
                .map(|p| serde_json::to_value(p).unwrap_or(Value::Null))
                .collect(),
        )
    }

    /// Append one part, returning the extended key.
    pub fn with<P: Serialize>(&self, part: P) -> Self {
        let mut parts = self.parts.clone();
        parts.push(serde_json::to_value(part).unwrap_or(Value::Null));
        Self::new(parts)
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn parts(&self) -> &[Value] {
        &self.parts
    }

    /// Element-wise prefix test: `["account"]` prefixes `["account", 1]`,
    /// `["account", 1]` does not prefix `["account", 10]`.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        prefix.parts.len() <= self.parts.len()
            && prefix.parts.iter().zip(&self.parts).all(|(a, b)| a == b)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// Build a [`QueryKey`] from a list of serializable parts.
///
/// ```
/// use ledgerdash_core::query_key;
/// let key = query_key!["account", 1];
/// assert_eq!(key.canonical(), r#"["account",1]"#);
/// ```
#[macro_export]
macro_rules! query_key {
    ($($part:expr),* $(,)?) => {
        $crate::query::QueryKey::new(vec![$($crate::__serde_json::json!($part)),*])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_form_is_compact_json() {
        let key = QueryKey::new(vec![json!("account"), json!(1)]);
        assert_eq!(key.canonical(), r#"["account",1]"#);
        assert_eq!(key.to_string(), r#"["account",1]"#);
    }

    #[test]
    fn test_object_parts_canonicalize_independent_of_order() {
        let a = QueryKey::new(vec![json!("tx"), json!({"page": 2, "account": 7})]);
        let b = QueryKey::new(vec![json!("tx"), json!({"account": 7, "page": 2})]);
        assert_eq!(a, b);
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn test_prefix_is_element_wise() {
        let account = QueryKey::from_parts(["account"]);
        let account_1 = account.with(1);
        let account_10 = account.with(10);
        let accounts = QueryKey::from_parts(["accounts"]);

        assert!(account_1.starts_with(&account));
        assert!(account_1.starts_with(&account_1));
        assert!(!account_10.starts_with(&account_1));
        assert!(!accounts.starts_with(&account));
        assert!(!account.starts_with(&account_1));
    }

    #[test]
    fn test_empty_prefix_matches_everything() {
        let empty = QueryKey::new(Vec::new());
        assert!(QueryKey::from_parts(["card"]).starts_with(&empty));
    }
}
