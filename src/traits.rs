use serde_json::{Map, Value};

use crate::error::PolicyError;
use crate::fields::ResolvedFields;
use crate::schema::StatementKind;

/// Anything that renders as one canonical statement mapping, e.g. an IAM
/// permission, a bucket policy entry or a KMS grant.
pub trait RenderStatement {
    /// Which registered statement kind this is
    fn kind(&self) -> StatementKind;

    /// Build the canonical mapping, containing only set fields plus the
    /// defaults of the statement kind
    fn render(&self) -> Result<Map<String, Value>, PolicyError>;

    /// The canonical mapping as a JSON value
    fn render_value(&self) -> Result<Value, PolicyError> {
        Ok(Value::Object(self.render()?))
    }
}

/// Builds a statement from the output of the field resolution pipeline.
pub trait FromResolvedFields: Sized {
    fn from_fields(fields: ResolvedFields) -> Result<Self, PolicyError>;
}
