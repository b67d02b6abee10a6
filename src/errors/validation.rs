// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;

/// Structural errors in a job graph.
///
/// Build-time variants are reported by [`JobBuilder`](crate::graph::JobBuilder) before a job can
/// be submitted. Expansion-time variants (`ZipCountMismatch`, `DuplicateMappingKey`,
/// `InvalidMappingKey`) are raised when upstream emissions are known, before any downstream
/// invocation executes. Neither kind is retried.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Two ops in the same job share a name
    DuplicateStepKey {
        step_key: String,
    },
    /// An op declares the same input name twice
    DuplicateInput {
        step_key: String,
        input: String,
    },
    /// An input references an output the upstream op does not declare
    UnknownOutput {
        step_key: String,
        upstream: String,
        output: String,
    },
    /// A fan-out output was bound as a plain value instead of through map or collect
    DynamicOutputNotMapped {
        step_key: String,
        upstream: String,
        output: String,
    },
    /// `collect`, `map` or `zip_with` was applied to an output that does not fan out
    NotDynamic {
        step_key: String,
        upstream: String,
        output: String,
    },
    /// A mapped op declares a fan-out output of its own
    NestedDynamic {
        step_key: String,
        output: String,
    },
    /// Zipped producers emitted a different number of mapped outputs
    ZipCountMismatch {
        step_key: String,
        counts: Vec<(String, usize)>,
    },
    /// A producer emitted the same mapping key twice for one output
    DuplicateMappingKey {
        step_key: String,
        output: String,
        mapping_key: String,
    },
    /// A mapping key contains characters outside `[A-Za-z0-9_]`
    InvalidMappingKey {
        step_key: String,
        mapping_key: String,
    },
}

impl ValidationError {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ValidationError::DuplicateStepKey { .. } => "duplicate_step_key",
            ValidationError::DuplicateInput { .. } => "duplicate_input",
            ValidationError::UnknownOutput { .. } => "unknown_output",
            ValidationError::DynamicOutputNotMapped { .. } => "dynamic_output_not_mapped",
            ValidationError::NotDynamic { .. } => "not_dynamic",
            ValidationError::NestedDynamic { .. } => "nested_dynamic",
            ValidationError::ZipCountMismatch { .. } => "zip_count_mismatch",
            ValidationError::DuplicateMappingKey { .. } => "duplicate_mapping_key",
            ValidationError::InvalidMappingKey { .. } => "invalid_mapping_key",
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::DuplicateStepKey { step_key } => {
                write!(f, "Duplicate step key: '{}'", step_key)
            }
            ValidationError::DuplicateInput { step_key, input } => {
                write!(f, "Step '{}' binds input '{}' more than once", step_key, input)
            }
            ValidationError::UnknownOutput {
                step_key,
                upstream,
                output,
            } => {
                write!(
                    f,
                    "Step '{}' depends on output '{}' of '{}' which does not exist",
                    step_key, output, upstream
                )
            }
            ValidationError::DynamicOutputNotMapped {
                step_key,
                upstream,
                output,
            } => {
                write!(
                    f,
                    "Step '{}' consumes dynamic output '{}.{}' directly; use map or collect",
                    step_key, upstream, output
                )
            }
            ValidationError::NotDynamic {
                step_key,
                upstream,
                output,
            } => {
                write!(
                    f,
                    "Step '{}' maps or collects '{}.{}' which is not a dynamic output",
                    step_key, upstream, output
                )
            }
            ValidationError::NestedDynamic { step_key, output } => {
                write!(
                    f,
                    "Step '{}' is mapped and cannot declare dynamic output '{}'",
                    step_key, output
                )
            }
            ValidationError::ZipCountMismatch { step_key, counts } => {
                write!(f, "Step '{}' zips dynamic outputs of different lengths: ", step_key)?;
                for (i, (producer, count)) in counts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}={}", producer, count)?;
                }
                Ok(())
            }
            ValidationError::DuplicateMappingKey {
                step_key,
                output,
                mapping_key,
            } => {
                write!(
                    f,
                    "Step '{}' emitted mapping key '{}' more than once on output '{}'",
                    step_key, mapping_key, output
                )
            }
            ValidationError::InvalidMappingKey {
                step_key,
                mapping_key,
            } => {
                write!(
                    f,
                    "Step '{}' emitted invalid mapping key '{}': only letters, digits and '_' are allowed",
                    step_key, mapping_key
                )
            }
        }
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_mismatch_lists_every_producer() {
        let err = ValidationError::ZipCountMismatch {
            step_key: "combine".into(),
            counts: vec![("bases.result".into(), 5), ("multipliers.result".into(), 4)],
        };
        assert_eq!(
            err.to_string(),
            "Step 'combine' zips dynamic outputs of different lengths: bases.result=5, multipliers.result=4"
        );
        assert_eq!(err.as_label(), "zip_count_mismatch");
    }
}
