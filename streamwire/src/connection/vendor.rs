use pg_escape::quote_literal;

use crate::types::StatementBuilder;

/// Protocol-specific statement authoring.
pub trait VendorFunctionality: Send + Sync + 'static {
    /// Starts a statement for the given text.
    fn create_statement_builder(&self, text: &str) -> StatementBuilder {
        StatementBuilder::new(text)
    }

    /// Quotes `text` as a literal of the vendor's language.
    ///
    /// Returns [`None`] for protocols without a literal syntax.
    fn escape_literal(&self, _text: &str) -> Option<String> {
        None
    }
}

/// Vendor for SQL dialects that quote literals with single quotes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlVendor;

impl VendorFunctionality for SqlVendor {
    fn escape_literal(&self, text: &str) -> Option<String> {
        Some(quote_literal(text))
    }
}

/// Vendor for protocols without a statement language, such as HTTP or pub/sub.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpaqueVendor;

impl VendorFunctionality for OpaqueVendor {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_vendor_doubles_quotes() {
        assert_eq!(
            SqlVendor.escape_literal("it's"),
            Some("'it''s'".to_owned())
        );
        assert_eq!(SqlVendor.escape_literal(""), Some("''".to_owned()));
    }

    #[test]
    fn test_sql_vendor_escapes_backslashes() {
        assert_eq!(
            SqlVendor.escape_literal("a\\b"),
            Some(r"E'a\\b'".to_owned())
        );
    }

    #[test]
    fn test_opaque_vendor_has_no_literals() {
        assert_eq!(OpaqueVendor.escape_literal("subject.>"), None);

        let statement = OpaqueVendor
            .create_statement_builder("subject.orders")
            .bind("payload")
            .build();
        assert_eq!(statement.text(), "subject.orders");
        assert_eq!(statement.parameters().len(), 1);
    }
}
