//! The versioned policy document envelope.

use itertools::Itertools;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::PolicyError;
use crate::traits::RenderStatement;
use crate::types::statement::Statement;

/// The policy language version every rendered document declares.
pub const POLICY_VERSION: &str = "2012-10-17";

/// An ordered list of statements that renders as one policy document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    statements: Vec<Statement>,
}

#[derive(Serialize)]
struct Envelope {
    #[serde(rename = "Version")]
    version: &'static str,
    #[serde(rename = "Statement")]
    statement: Vec<Map<String, Value>>,
}

impl Document {
    pub fn new(statements: Vec<Statement>) -> Self {
        Document { statements }
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn push(&mut self, statement: impl Into<Statement>) {
        self.statements.push(statement.into());
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Render as indented JSON. An empty document renders as `None`, meaning
    /// no policy should be attached at all.
    ///
    /// Statement errors, such as principals that cannot be merged, are
    /// returned as they are; only serialization failures are
    /// [`PolicyError::InvalidDocument`].
    pub fn render(&self) -> Result<Option<String>, PolicyError> {
        if self.is_empty() {
            return Ok(None);
        }
        let text = serde_json::to_string_pretty(&self.envelope()?).map_err(|e| self.invalid(e))?;
        debug!(
            event = "Render",
            phase = "Document",
            statements = self.statements.len(),
            bytes = text.len(),
            "Policy document rendered"
        );
        Ok(Some(text))
    }

    /// The rendered document as a JSON value, for handing to the differ.
    pub fn to_value(&self) -> Result<Option<Value>, PolicyError> {
        if self.is_empty() {
            return Ok(None);
        }
        serde_json::to_value(self.envelope()?)
            .map(Some)
            .map_err(|e| self.invalid(e))
    }

    fn envelope(&self) -> Result<Envelope, PolicyError> {
        Ok(Envelope {
            version: POLICY_VERSION,
            statement: self
                .statements
                .iter()
                .map(RenderStatement::render)
                .try_collect()?,
        })
    }

    fn invalid(&self, error: serde_json::Error) -> PolicyError {
        PolicyError::InvalidDocument {
            document: format!("{:?}", self.statements),
            error: error.to_string(),
        }
    }
}

impl From<Vec<Statement>> for Document {
    fn from(statements: Vec<Statement>) -> Self {
        Document::new(statements)
    }
}

impl FromIterator<Statement> for Document {
    fn from_iter<I: IntoIterator<Item = Statement>>(iter: I) -> Self {
        Document::new(iter.into_iter().collect())
    }
}

/// Render a list of statements, see [`Document::render`].
pub fn render(statements: &[Statement]) -> Result<Option<String>, PolicyError> {
    Document::new(statements.to_vec()).render()
}
