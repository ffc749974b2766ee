//! Witness Schema
//!
//! Fixed field order and visibility of the oracle circuit's witness. The
//! flattened witness vector lists every public field in declaration order,
//! then every secret field in declaration order; arrays contribute one
//! element per entry.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::field::{fr_to_be_bytes, fr_to_u64};
use crate::core::Fr;

/// Errors projecting values onto the schema.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Value count differs from the schema's public width.
    #[error("expected {expected} public values, got {actual}")]
    LengthMismatch {
        /// Public width of the schema.
        expected: usize,
        /// Values supplied.
        actual: usize,
    },
}

/// Whether the verifier sees a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Part of the public witness.
    Public,
    /// Known only to the prover.
    Secret,
}

/// Array or scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// One element.
    Scalar,
    /// Array of the field's length.
    Array,
}

/// Fields in declaration order: KDC, then counter/tag, then record.
pub(crate) const LAYOUT: [(&str, Visibility, Shape); 19] = [
    ("IntermediateHashHSopad", Visibility::Public, Shape::Array),
    ("DerivedHandshakeSecretIn", Visibility::Secret, Shape::Array),
    ("MasterSecretIn", Visibility::Public, Shape::Array),
    ("ApplicationTrafficSecretIn", Visibility::Public, Shape::Array),
    ("TrafficKeyIn", Visibility::Public, Shape::Array),
    ("IvCounter", Visibility::Public, Shape::Array),
    ("Zeros", Visibility::Public, Shape::Array),
    ("ECB1", Visibility::Public, Shape::Array),
    ("ECB0", Visibility::Public, Shape::Array),
    ("Iv", Visibility::Public, Shape::Array),
    ("CipherChunks", Visibility::Public, Shape::Array),
    ("PlainChunks", Visibility::Secret, Shape::Array),
    ("Substring", Visibility::Public, Shape::Array),
    ("SubstringStart", Visibility::Public, Shape::Scalar),
    ("SubstringEnd", Visibility::Public, Shape::Scalar),
    ("ValueStart", Visibility::Public, Shape::Scalar),
    ("ValueEnd", Visibility::Public, Shape::Scalar),
    ("ChunkIndex", Visibility::Public, Shape::Scalar),
    ("Threshold", Visibility::Public, Shape::Scalar),
];

/// One witness field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessField {
    /// Circuit field name.
    pub name: &'static str,
    /// Element count (1 for scalars).
    pub len: usize,
    /// Array or scalar.
    pub shape: Shape,
    /// Public or secret.
    pub visibility: Visibility,
}

/// Ordered field list of one circuit instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessSchema {
    fields: Vec<WitnessField>,
}

impl WitnessSchema {
    pub(crate) fn from_lengths(lengths: [usize; 19]) -> Self {
        let fields = LAYOUT
            .iter()
            .zip(lengths)
            .map(|(&(name, visibility, shape), len)| WitnessField { name, len, shape, visibility })
            .collect();
        Self { fields }
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[WitnessField] {
        &self.fields
    }

    /// Public fields in witness order.
    pub fn public_fields(&self) -> impl Iterator<Item = &WitnessField> {
        self.fields.iter().filter(|f| f.visibility == Visibility::Public)
    }

    /// Secret fields in witness order.
    pub fn secret_fields(&self) -> impl Iterator<Item = &WitnessField> {
        self.fields.iter().filter(|f| f.visibility == Visibility::Secret)
    }

    /// Number of public elements.
    pub fn nb_public(&self) -> usize {
        self.public_fields().map(|f| f.len).sum()
    }

    /// Number of secret elements.
    pub fn nb_secret(&self) -> usize {
        self.secret_fields().map(|f| f.len).sum()
    }

    /// Reproject a flat public vector into `{ field: value | [values] }`.
    ///
    /// Elements that fit in a u64 print as numbers, others as hex strings.
    pub fn public_to_json(&self, public: &[Fr]) -> Result<Value, SchemaError> {
        let expected = self.nb_public();
        if public.len() != expected {
            return Err(SchemaError::LengthMismatch { expected, actual: public.len() });
        }

        let mut out = Map::new();
        let mut rest = public;
        for field in self.public_fields() {
            let (values, tail) = rest.split_at(field.len);
            rest = tail;
            let value = match field.shape {
                Shape::Scalar => element_json(&values[0]),
                Shape::Array => Value::Array(values.iter().map(element_json).collect()),
            };
            out.insert(field.name.to_string(), value);
        }
        Ok(Value::Object(out))
    }
}

fn element_json(fr: &Fr) -> Value {
    match fr_to_u64(fr) {
        Some(v) => Value::from(v),
        None => match fr_to_be_bytes(fr) {
            Ok(bytes) => Value::from(format!("0x{}", hex::encode(bytes))),
            Err(_) => Value::Null,
        },
    }
}
