use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Declared shape of one column of a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub label: String,
    /// Protocol-specific type identifier.
    pub type_id: u32,
    /// Fixed byte size of every value in the column, when the protocol declares one.
    pub declared_size: Option<u32>,
}

impl ColumnMetadata {
    pub fn new(label: impl Into<String>, type_id: u32, declared_size: Option<u32>) -> Self {
        Self {
            label: label.into(),
            type_id,
            declared_size,
        }
    }
}

/// Ordered column metadata shared by every row of a result.
///
/// The label lookup map is built on first use and cached. When labels repeat, the first
/// column with the label wins.
#[derive(Debug, Default)]
pub struct ColumnSet {
    columns: Vec<ColumnMetadata>,
    labels: OnceLock<HashMap<String, usize>>,
}

impl ColumnSet {
    pub fn new(columns: Vec<ColumnMetadata>) -> Self {
        Self {
            columns,
            labels: OnceLock::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ColumnMetadata> {
        self.columns.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnMetadata> {
        self.columns.iter()
    }

    pub fn as_slice(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    /// Returns the position of the first column named `label`.
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels
            .get_or_init(|| {
                let mut labels = HashMap::with_capacity(self.columns.len());
                for (index, column) in self.columns.iter().enumerate() {
                    labels.entry(column.label.clone()).or_insert(index);
                }
                labels
            })
            .get(label)
            .copied()
    }
}

/// Length prefix of a single value as reported by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueLength {
    Null,
    Bytes(u64),
}

impl ValueLength {
    /// Number of payload bytes that follow on the stream.
    pub fn byte_len(&self) -> u64 {
        match self {
            ValueLength::Null => 0,
            ValueLength::Bytes(len) => *len,
        }
    }
}

/// Header of one result produced by a statement, e.g. one row.
///
/// The values of the result follow the header on the stream, one per column, in column order.
#[derive(Debug, Clone)]
pub struct ResultHeader {
    columns: Arc<ColumnSet>,
}

impl ResultHeader {
    pub fn new(columns: Arc<ColumnSet>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &Arc<ColumnSet> {
        &self.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_of_prefers_first_duplicate() {
        let columns = ColumnSet::new(vec![
            ColumnMetadata::new("id", 1, Some(8)),
            ColumnMetadata::new("name", 3, None),
            ColumnMetadata::new("id", 2, Some(4)),
        ]);

        assert_eq!(columns.index_of("id"), Some(0));
        assert_eq!(columns.index_of("name"), Some(1));
        assert_eq!(columns.index_of("missing"), None);
    }

    #[test]
    fn test_null_length_has_no_payload() {
        assert_eq!(ValueLength::Null.byte_len(), 0);
        assert_eq!(ValueLength::Bytes(12).byte_len(), 12);
    }
}
