use bytes::Bytes;

/// A single bind value sent alongside a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Bytes),
}

impl From<bool> for Parameter {
    fn from(value: bool) -> Self {
        Parameter::Bool(value)
    }
}

impl From<i32> for Parameter {
    fn from(value: i32) -> Self {
        Parameter::Int(value.into())
    }
}

impl From<i64> for Parameter {
    fn from(value: i64) -> Self {
        Parameter::Int(value)
    }
}

impl From<f64> for Parameter {
    fn from(value: f64) -> Self {
        Parameter::Float(value)
    }
}

impl From<&str> for Parameter {
    fn from(value: &str) -> Self {
        Parameter::Text(value.to_owned())
    }
}

impl From<String> for Parameter {
    fn from(value: String) -> Self {
        Parameter::Text(value)
    }
}

impl From<Bytes> for Parameter {
    fn from(value: Bytes) -> Self {
        Parameter::Bytes(value)
    }
}

impl<T: Into<Parameter>> From<Option<T>> for Parameter {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Parameter::Null)
    }
}

/// How a statement is sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// Plain text, no bind values.
    Simple,
    /// Text plus one set of bind values.
    Parameterized,
    /// Text plus one or more sets of bind values executed as a batch.
    Batched,
}

/// Description of an operation to run remotely.
///
/// A statement carries its text, the bind values of a single execution and, for batches,
/// the bind values of every execution in the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    text: String,
    parameters: Vec<Parameter>,
    batches: Vec<Vec<Parameter>>,
}

impl Statement {
    /// Creates a statement without bind values.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: Vec::new(),
            batches: Vec::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn batches(&self) -> &[Vec<Parameter>] {
        &self.batches
    }
}

/// Builds a [`Statement`] from text and bind values.
///
/// Builders are handed out by a vendor through
/// [`crate::connection::vendor::VendorFunctionality::create_statement_builder`].
#[derive(Debug, Clone)]
pub struct StatementBuilder {
    statement: Statement,
}

impl StatementBuilder {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            statement: Statement::new(text),
        }
    }

    /// Appends a bind value to the single-execution parameter list.
    pub fn bind(mut self, parameter: impl Into<Parameter>) -> Self {
        self.statement.parameters.push(parameter.into());
        self
    }

    /// Appends one parameter set to the batch.
    pub fn add_batch<I, P>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Parameter>,
    {
        self.statement
            .batches
            .push(parameters.into_iter().map(Into::into).collect());
        self
    }

    pub fn build(self) -> Statement {
        self.statement
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_parameters_and_batches() {
        let statement = StatementBuilder::new("insert into t values ($1, $2)")
            .bind(1)
            .bind("a")
            .add_batch([Parameter::Int(2), Parameter::Null])
            .build();

        assert_eq!(statement.text(), "insert into t values ($1, $2)");
        assert_eq!(
            statement.parameters(),
            &[Parameter::Int(1), Parameter::Text("a".to_owned())]
        );
        assert_eq!(statement.batches().len(), 1);
    }

    #[test]
    fn test_optional_parameter_maps_to_null() {
        let missing: Option<i64> = None;
        assert_eq!(Parameter::from(missing), Parameter::Null);
        assert_eq!(Parameter::from(Some(true)), Parameter::Bool(true));
    }
}
