//! One primitive for resolving a field from an ordered chain of sources,
//! falling back to a prompt when a terminal is attached.

use crate::deploy::{DeployInputError, RuntimeMode, ValueChoice};
use crate::traits::{Output, UserInput};
use anyhow::Result;
use std::path::PathBuf;

/// Values a field can hold, rendered the way prompts show them
pub trait FieldValue: Clone + PartialEq {
    fn render(&self) -> String;
}

impl FieldValue for String {
    fn render(&self) -> String {
        self.clone()
    }
}

impl FieldValue for PathBuf {
    fn render(&self) -> String {
        self.to_string_lossy().into_owned()
    }
}

impl FieldValue for RuntimeMode {
    fn render(&self) -> String {
        self.as_str().to_string()
    }
}

/// Whether a source settles the field or only proposes a default
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    Final,
    Suggest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate<T> {
    pub choice: ValueChoice<T>,
    pub settle: Settle,
}

impl<T> Candidate<T> {
    pub fn settled(choice: ValueChoice<T>) -> Self {
        Self {
            choice,
            settle: Settle::Final,
        }
    }

    pub fn suggested(choice: ValueChoice<T>) -> Self {
        Self {
            choice,
            settle: Settle::Suggest,
        }
    }
}

type Step<'s, T> = Box<dyn FnOnce() -> Option<Candidate<T>> + 's>;
type Parser<'s, T> = Box<dyn Fn(&str) -> Result<T> + 's>;
type Check<'s, T> = Box<dyn Fn(&T) -> Result<()> + 's>;
type Title<'s, T> = Box<dyn Fn(Option<&ValueChoice<T>>) -> String + 's>;

/// Description of how one field resolves
pub struct Field<'s, T: FieldValue> {
    name: String,
    steps: Vec<Step<'s, T>>,
    parse: Parser<'s, T>,
    check: Option<Check<'s, T>>,
    title: Title<'s, T>,
    options: Option<Vec<String>>,
    manual_option: Option<String>,
    suggestions: Vec<String>,
}

impl<'s, T: FieldValue> Field<'s, T> {
    pub fn new(
        name: impl Into<String>,
        title: impl Into<String>,
        parse: impl Fn(&str) -> Result<T> + 's,
    ) -> Self {
        let title = title.into();
        Self {
            name: name.into(),
            steps: Vec::new(),
            parse: Box::new(parse),
            check: None,
            title: Box::new(move |default: Option<&ValueChoice<T>>| match default {
                Some(choice) => format!("{} (default: {})", title, choice.value.render()),
                None => title.clone(),
            }),
            options: None,
            manual_option: None,
            suggestions: Vec::new(),
        }
    }

    /// Append a source to the chain; earlier sources win
    pub fn step(mut self, source: impl FnOnce() -> Option<Candidate<T>> + 's) -> Self {
        self.steps.push(Box::new(source));
        self
    }

    /// Validation applied to sourced and typed values alike
    pub fn check(mut self, check: impl Fn(&T) -> Result<()> + 's) -> Self {
        self.check = Some(Box::new(check));
        self
    }

    pub fn titled(mut self, title: impl Fn(Option<&ValueChoice<T>>) -> String + 's) -> Self {
        self.title = Box::new(title);
        self
    }

    /// Prompt with a fixed list instead of free text
    pub fn options(mut self, options: Vec<String>) -> Self {
        self.options = Some(options);
        self
    }

    /// Extra option that switches the list prompt to free text
    pub fn manual_option(mut self, label: impl Into<String>) -> Self {
        self.manual_option = Some(label.into());
        self
    }

    pub fn suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// First source in the chain that has a value
    pub fn lookup(&mut self) -> Option<Candidate<T>> {
        std::mem::take(&mut self.steps)
            .into_iter()
            .find_map(|step| step())
    }

    fn validate(&self, value: &T) -> Result<()> {
        match &self.check {
            Some(check) => check(value),
            None => Ok(()),
        }
    }
}

fn is_recoverable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<DeployInputError>()
        .is_some_and(DeployInputError::is_recoverable)
}

/// Runs fields against the prompter
pub struct FieldResolver<'a> {
    input: &'a dyn UserInput,
    output: &'a dyn Output,
    interactive: bool,
}

impl<'a> FieldResolver<'a> {
    pub fn new(input: &'a dyn UserInput, output: &'a dyn Output, interactive: bool) -> Self {
        Self {
            input,
            output,
            interactive,
        }
    }

    pub fn interactive(&self) -> bool {
        self.interactive
    }

    /// Resolve a field through its chain.
    ///
    /// A final source settles the field. A suggestion becomes the prompt's
    /// default, or is accepted as-is without a terminal. With no source at
    /// all the operator is asked, and unattended runs fail.
    pub fn resolve<T: FieldValue>(&self, mut field: Field<'_, T>) -> Result<ValueChoice<T>> {
        let hit = field.lookup();
        self.settle(field, hit)
    }

    /// Finish a field whose chain was already consulted
    pub fn settle<T: FieldValue>(
        &self,
        field: Field<'_, T>,
        hit: Option<Candidate<T>>,
    ) -> Result<ValueChoice<T>> {
        let Some(candidate) = hit else {
            if !self.interactive {
                return Err(DeployInputError::missing(&field.name).into());
            }
            return self.ask(&field, None);
        };

        if let Err(err) = field.validate(&candidate.choice.value) {
            if !self.interactive || !is_recoverable(&err) {
                return Err(err);
            }
            self.output.warning(&err.to_string());
            return self.ask(&field, None);
        }

        match (candidate.settle, self.interactive) {
            (Settle::Suggest, true) => self.ask(&field, Some(candidate.choice)),
            _ => Ok(candidate.choice),
        }
    }

    /// Prompt until the operator gives an acceptable answer.
    ///
    /// Keeping the default (empty answer or the same value) returns the
    /// default untouched, provenance included. Accepting an empty default
    /// is an explicit empty answer.
    pub fn ask<T: FieldValue>(
        &self,
        field: &Field<'_, T>,
        default: Option<ValueChoice<T>>,
    ) -> Result<ValueChoice<T>> {
        let title = (field.title)(default.as_ref());
        let default_text = default.as_ref().map(|d| d.value.render());

        loop {
            let raw = self.prompt_once(field, &title, default_text.as_deref())?;
            let answer = raw.trim();

            if answer.is_empty() {
                if let Some(default) = &default {
                    if default.value.render().is_empty() {
                        return Ok(default.clone().confirmed());
                    }
                    return Ok(default.clone());
                }
                self.output.warning(&format!("{} is required", field.name));
                continue;
            }

            let parsed = (field.parse)(answer).and_then(|value| {
                field.validate(&value)?;
                Ok(value)
            });
            match parsed {
                Ok(value) => {
                    if let Some(default) = &default
                        && default.value == value
                    {
                        return Ok(default.clone());
                    }
                    tracing::debug!(field = %field.name, value = %value.render(), "value entered at prompt");
                    return Ok(ValueChoice::prompted(value));
                }
                Err(err) if is_recoverable(&err) => {
                    self.output.warning(&err.to_string());
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn prompt_once<T: FieldValue>(
        &self,
        field: &Field<'_, T>,
        title: &str,
        default: Option<&str>,
    ) -> Result<String> {
        let default = default.filter(|d| !d.is_empty());
        let mut suggestions: Vec<String> = default.map(str::to_string).into_iter().collect();
        for suggestion in &field.suggestions {
            if !suggestions.contains(suggestion) {
                suggestions.push(suggestion.clone());
            }
        }

        let Some(options) = field.options.as_ref().filter(|o| !o.is_empty()) else {
            return self.input.input(title, &suggestions);
        };

        let mut choices: Vec<String> = default.map(str::to_string).into_iter().collect();
        for option in options {
            if !choices.contains(option) {
                choices.push(option.clone());
            }
        }
        if let Some(manual) = &field.manual_option {
            choices.push(manual.clone());
        }

        let picked = self.input.select(title, choices)?;
        if field.manual_option.as_deref() == Some(picked.as_str()) {
            return self.input.input(title, &suggestions);
        }
        Ok(picked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::ValueSource;
    use crate::traits::{MockOutput, MockResponse, MockUserInput};

    fn text(s: &str) -> Result<String> {
        Ok(s.to_string())
    }

    fn env_field<'s>() -> Field<'s, String> {
        Field::new("env", "Environment name", text)
    }

    #[test]
    fn test_first_hit_short_circuits() {
        let input = MockUserInput::new();
        let output = MockOutput::new();
        let resolver = FieldResolver::new(&input, &output, true);

        let field = env_field()
            .step(|| None)
            .step(|| Some(Candidate::settled(ValueChoice::flag("dev".to_string()))))
            .step(|| panic!("later sources are not consulted"));

        let choice = resolver.resolve(field).unwrap();
        assert_eq!(choice, ValueChoice::flag("dev".to_string()));
        assert!(input.asked().is_empty());
    }

    #[test]
    fn test_suggestion_accepted_silently_when_unattended() {
        let input = MockUserInput::new();
        let output = MockOutput::new();
        let resolver = FieldResolver::new(&input, &output, false);

        let field = env_field().step(|| Some(Candidate::suggested(ValueChoice::stored("qa".to_string()))));
        let choice = resolver.resolve(field).unwrap();
        assert_eq!(choice.source, ValueSource::StoredDefault);
        assert!(!choice.explicit);
    }

    #[test]
    fn test_suggestion_kept_verbatim_on_empty_answer() {
        let input = MockUserInput::with_responses(vec![MockResponse::Input(String::new())]);
        let output = MockOutput::new();
        let resolver = FieldResolver::new(&input, &output, true);

        let field = env_field().step(|| Some(Candidate::suggested(ValueChoice::stored("qa".to_string()))));
        let choice = resolver.resolve(field).unwrap();
        assert_eq!(choice, ValueChoice::stored("qa".to_string()));
        assert_eq!(input.asked(), vec!["Environment name (default: qa)"]);
    }

    #[test]
    fn test_empty_answer_to_empty_default_is_explicit() {
        let input = MockUserInput::with_responses(vec![MockResponse::Input(String::new())]);
        let output = MockOutput::new();
        let resolver = FieldResolver::new(&input, &output, true);

        let field = Field::new("parameter Suffix", "Suffix", text)
            .step(|| Some(Candidate::suggested(ValueChoice::computed(String::new()))));
        let choice = resolver.resolve(field).unwrap();
        assert_eq!(choice, ValueChoice::prompted(String::new()));
        assert!(choice.explicit);
    }

    #[test]
    fn test_typed_answer_is_explicit_prompt() {
        let input = MockUserInput::with_responses(vec![MockResponse::Input(" prod ".into())]);
        let output = MockOutput::new();
        let resolver = FieldResolver::new(&input, &output, true);

        let field = env_field().step(|| Some(Candidate::suggested(ValueChoice::stored("qa".to_string()))));
        let choice = resolver.resolve(field).unwrap();
        assert_eq!(choice, ValueChoice::prompted("prod".to_string()));
    }

    #[test]
    fn test_missing_value_unattended_names_field() {
        let input = MockUserInput::new();
        let output = MockOutput::new();
        let resolver = FieldResolver::new(&input, &output, false);

        let err = resolver.resolve(env_field()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<DeployInputError>(),
            Some(&DeployInputError::missing("env"))
        );
    }

    #[test]
    fn test_empty_answer_reprompts_when_required() {
        let input = MockUserInput::with_responses(vec![
            MockResponse::Input("  ".into()),
            MockResponse::Input("dev".into()),
        ]);
        let output = MockOutput::new();
        let resolver = FieldResolver::new(&input, &output, true);

        let choice = resolver.resolve(env_field()).unwrap();
        assert_eq!(choice.value, "dev");
        assert_eq!(output.get_warnings(), vec!["env is required"]);
    }

    #[test]
    fn test_invalid_answer_reprompts_with_warning() {
        let input = MockUserInput::with_responses(vec![
            MockResponse::Select("podman".into()),
            MockResponse::Select("containerd".into()),
        ]);
        let output = MockOutput::new();
        let resolver = FieldResolver::new(&input, &output, true);

        let field = Field::new("mode", "Runtime mode", |s: &str| Ok(s.parse::<RuntimeMode>()?))
            .options(vec!["podman".into(), "containerd".into()]);
        let choice = resolver.resolve(field).unwrap();
        assert_eq!(choice.value, RuntimeMode::KernelIsolated);
        assert_eq!(output.get_warnings().len(), 1);
    }

    #[test]
    fn test_manual_option_switches_to_text_input() {
        let input = MockUserInput::with_responses(vec![
            MockResponse::Select("Enter path...".into()),
            MockResponse::Input("/typed".into()),
        ]);
        let output = MockOutput::new();
        let resolver = FieldResolver::new(&input, &output, true);

        let field = Field::new("template", "Template path", |s: &str| Ok(PathBuf::from(s)))
            .options(vec!["/recent".into()])
            .manual_option("Enter path...");
        let choice = resolver.resolve(field).unwrap();
        assert_eq!(choice.value, PathBuf::from("/typed"));
    }

    #[test]
    fn test_invalid_sourced_value_fails_unattended() {
        let input = MockUserInput::new();
        let output = MockOutput::new();
        let resolver = FieldResolver::new(&input, &output, false);

        let field = env_field()
            .step(|| Some(Candidate::settled(ValueChoice::flag("bad".to_string()))))
            .check(|_| {
                Err(DeployInputError::InvalidParameterValue {
                    name: "env".into(),
                    reason: "is bad".into(),
                }
                .into())
            });
        assert!(resolver.resolve(field).is_err());
    }
}
