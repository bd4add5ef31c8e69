use crate::deploy::{DeployInputError, ValueChoice};
use crate::traits::{Output, SelectOption, UserInput};
use anyhow::Result;
use std::fmt::Display;

/// A value read off the live runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inference<T> {
    pub value: T,
    /// Human-readable note on where the value was read, e.g. "stack sbx-prod"
    pub provenance: String,
    /// Other values the runtime answers to; asserting one of them is agreement
    pub aliases: Vec<T>,
}

impl<T: PartialEq> Inference<T> {
    pub fn new(value: T, provenance: impl Into<String>) -> Self {
        Self {
            value,
            provenance: provenance.into(),
            aliases: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: T) -> Self {
        if alias != self.value && !self.aliases.contains(&alias) {
            self.aliases.push(alias);
        }
        self
    }

    /// Whether an asserted value names the same thing
    pub fn agrees_with(&self, value: &T) -> bool {
        *value == self.value || self.aliases.contains(value)
    }
}

/// One field's asserted value weighed against what the runtime shows
#[derive(Debug, Clone)]
pub struct ConflictCase<'a, T> {
    pub field: &'a str,
    pub asserted: Option<ValueChoice<T>>,
    pub inferred: Option<Inference<T>>,
    pub interactive: bool,
    pub force: bool,
}

const PICK_INFERRED: &str = "inferred";
const PICK_ASSERTED: &str = "asserted";

/// Settles disagreements between asserted and inferred values
pub struct Reconciler<'a> {
    input: &'a dyn UserInput,
    output: &'a dyn Output,
}

impl<'a> Reconciler<'a> {
    pub fn new(input: &'a dyn UserInput, output: &'a dyn Output) -> Self {
        Self { input, output }
    }

    /// Decide between the asserted and inferred value.
    ///
    /// Returns `None` only when neither side has a value, and adopts the
    /// inference only when nothing was asserted. A mismatch is kept under
    /// `force`, asked about when interactive, and otherwise rejected with a
    /// `Conflict` error, whatever the asserted value's source.
    pub fn reconcile<T>(&self, case: ConflictCase<'_, T>) -> Result<Option<ValueChoice<T>>>
    where
        T: Clone + PartialEq + Display,
    {
        let ConflictCase {
            field,
            asserted,
            inferred,
            interactive,
            force,
        } = case;

        let Some(inferred) = inferred else {
            return Ok(asserted);
        };
        let Some(asserted) = asserted else {
            tracing::debug!(field, value = %inferred.value, provenance = %inferred.provenance, "adopting inferred value");
            return Ok(Some(ValueChoice::inferred(inferred.value)));
        };
        if inferred.agrees_with(&asserted.value) {
            return Ok(Some(asserted));
        }

        if force {
            self.output.warning(&format!(
                "{} mismatch (running={}, deploy={}); keeping {} due to --force",
                field, inferred.value, asserted.value, asserted.value
            ));
            tracing::warn!(
                field,
                running = %inferred.value,
                deploy = %asserted.value,
                "keeping asserted value over running stack due to --force"
            );
            return Ok(Some(asserted));
        }

        if interactive {
            return self.prompt(field, asserted, inferred).map(Some);
        }

        Err(DeployInputError::Conflict {
            field: field.to_string(),
            asserted: asserted.value.to_string(),
            asserted_source: asserted.source.label().to_string(),
            inferred: inferred.value.to_string(),
            inferred_provenance: inferred.provenance,
        }
        .into())
    }

    fn prompt<T>(&self, field: &str, asserted: ValueChoice<T>, inferred: Inference<T>) -> Result<ValueChoice<T>>
    where
        T: Clone + PartialEq + Display,
    {
        let title = format!(
            "{} mismatch (running: {}, current: {})",
            capitalize(field),
            inferred.value,
            asserted.value
        );
        let options = vec![
            SelectOption::new(
                format!(
                    "Use running {} '{}' ({}, recommended)",
                    field, inferred.value, inferred.provenance
                ),
                PICK_INFERRED,
            ),
            SelectOption::new(
                format!("Keep current {} '{}' ({})", field, asserted.value, asserted.source),
                PICK_ASSERTED,
            ),
        ];

        let picked = self.input.select_value(&title, options)?;
        if picked == PICK_INFERRED {
            let mut choice = ValueChoice::inferred(inferred.value);
            choice.explicit = true;
            Ok(choice)
        } else {
            Ok(asserted.confirmed())
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
