/// Progress of a [`crate::connection::enumeration::StatementEnumerator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationEvent {
    /// The statement is about to be sent.
    BeforeStart,
    /// The statement was sent and the first result was read.
    AfterStart,
    /// A result became current. `index` counts from zero.
    Item { index: u64, columns: usize },
    /// No further results; the connection is about to be released.
    BeforeEnd,
    /// Enumeration ended after `items` results.
    AfterEnd { items: u64 },
}

/// Observer of enumeration progress, registered before the first advance.
pub trait EnumerationListener: Send + Sync {
    fn on_event(&self, event: &EnumerationEvent);
}

impl<F> EnumerationListener for F
where
    F: Fn(&EnumerationEvent) + Send + Sync,
{
    fn on_event(&self, event: &EnumerationEvent) {
        self(event)
    }
}
