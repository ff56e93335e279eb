//! # Field/Value Reconciliation
//!
//! Multi-field hash reads return values positionally: the `i`th value answers
//! the `i`th requested field. `reconcile` pairs the two sequences into a map
//! and turns every structural violation into a `ShapeError`.

use std::collections::HashMap;
use std::hash::Hash;

use crate::error::{ClientResult, ShapeError};

/// Pairs `fields[i]` with `values[i]`.
///
/// - An upstream error is returned untouched; the sequences are not trusted.
/// - A missing sequence is `ShapeError::NilResult`.
/// - Different lengths are `ShapeError::LengthMismatch`.
/// - Duplicate fields are allowed; the later position wins.
pub fn reconcile<K, V>(
    fields: Option<&[K]>,
    values: ClientResult<Option<Vec<V>>>,
) -> ClientResult<HashMap<K, V>>
where
    K: Eq + Hash + Clone,
{
    let values = values?;
    let (fields, values) = match (fields, values) {
        (Some(fields), Some(values)) => (fields, values),
        _ => return Err(ShapeError::NilResult.into()),
    };
    if fields.len() != values.len() {
        return Err(ShapeError::LengthMismatch {
            fields: fields.len(),
            values: values.len(),
        }
        .into());
    }

    let mut result = HashMap::with_capacity(fields.len());
    for (field, value) in fields.iter().zip(values) {
        result.insert(field.clone(), value);
    }
    Ok(result)
}
