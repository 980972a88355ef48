//! Normalisation of caller input before it reaches the store.

use crate::{JsonValue, Metadata, ValidationError, Vector};

fn kind_of(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

pub fn validate_vector(vector: &[f32], expected: Option<usize>) -> Result<(), ValidationError> {
    match expected {
        Some(dim) if dim != vector.len() => Err(ValidationError::DimensionMismatch {
            expected: dim,
            got: vector.len(),
        }),
        _ => Ok(()),
    }
}

/// Coerces any numeric sequence to a `Vector`, checking its length.
pub fn coerce_vector<T>(values: &[T], expected: Option<usize>) -> Result<Vector, ValidationError>
where
    T: Copy + Into<f64>,
{
    let vector: Vector = values.iter().map(|&x| x.into() as f32).collect();
    validate_vector(&vector, expected)?;
    Ok(vector)
}

/// Coerces a JSON array of numbers, as produced by dynamically typed callers.
pub fn vector_from_json(
    value: &JsonValue,
    expected: Option<usize>,
) -> Result<Vector, ValidationError> {
    let JsonValue::Array(items) = value else {
        return Err(ValidationError::NotAVector(kind_of(value)));
    };
    let mut vector = Vector::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match item.as_f64() {
            Some(x) => vector.push(x as f32),
            None => {
                return Err(ValidationError::NonNumeric {
                    index,
                    found: kind_of(item),
                })
            }
        }
    }
    validate_vector(&vector, expected)?;
    Ok(vector)
}

pub fn validate_id(id: &str) -> Result<&str, ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::EmptyId);
    }
    Ok(id)
}

/// Accepts an absent value or a JSON object. The value is taken by value,
/// so the store ends up with the only handle to it.
pub fn validate_metadata(metadata: Option<JsonValue>) -> Result<Option<Metadata>, ValidationError> {
    match metadata {
        None => Ok(None),
        Some(JsonValue::Object(map)) => Ok(Some(map)),
        Some(other) => Err(ValidationError::InvalidMetadata(kind_of(&other))),
    }
}

/// Rejects zero and clamps to the number of available records.
pub fn validate_top_k(top_k: usize, available: usize) -> Result<usize, ValidationError> {
    if top_k == 0 {
        return Err(ValidationError::InvalidTopK(top_k));
    }
    Ok(top_k.min(available))
}
