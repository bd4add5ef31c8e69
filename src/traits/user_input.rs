use crate::deploy::DeployInputError;
use anyhow::Result;
#[cfg(test)]
use std::collections::VecDeque;
#[cfg(test)]
use std::sync::Mutex;

/// A selectable option whose display label differs from the value it yields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub label: String,
    pub value: String,
}

impl SelectOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Response type for mock user input
#[cfg(test)]
#[derive(Debug, Clone)]
pub enum MockResponse {
    Input(String),
    Select(String),
    SelectValue(String),
    /// Simulates the operator pressing Esc / Ctrl-C
    Cancel,
}

/// Interactive prompter used while negotiating deployment inputs
pub trait UserInput: Send + Sync {
    /// Free-form text input. The first suggestion, if any, is shown as the default.
    fn input(&self, title: &str, suggestions: &[String]) -> Result<String>;

    /// Pick one of the given options
    fn select(&self, title: &str, options: Vec<String>) -> Result<String>;

    /// Pick one of the labelled options and return its value
    fn select_value(&self, title: &str, options: Vec<SelectOption>) -> Result<String>;
}

/// Real user input implementation using inquire crate
pub struct InquireUserInput;

fn prompt_error(err: inquire::InquireError) -> anyhow::Error {
    match err {
        inquire::InquireError::OperationCanceled | inquire::InquireError::OperationInterrupted => {
            DeployInputError::Cancelled.into()
        }
        other => anyhow::Error::new(other).context("Prompt failed"),
    }
}

impl UserInput for InquireUserInput {
    fn input(&self, title: &str, suggestions: &[String]) -> Result<String> {
        use inquire::Text;

        let help = format!("Suggestions: {}", suggestions.join(", "));
        let mut prompt = Text::new(title);
        if let Some(first) = suggestions.first() {
            prompt = prompt.with_placeholder(first);
        }
        if suggestions.len() > 1 {
            prompt = prompt.with_help_message(&help);
        }
        prompt.prompt().map_err(prompt_error)
    }

    fn select(&self, title: &str, options: Vec<String>) -> Result<String> {
        use inquire::Select;
        Select::new(title, options).prompt().map_err(prompt_error)
    }

    fn select_value(&self, title: &str, options: Vec<SelectOption>) -> Result<String> {
        use inquire::Select;

        let labels: Vec<String> = options.iter().map(|o| o.label.clone()).collect();
        let picked = Select::new(title, labels).prompt().map_err(prompt_error)?;
        options
            .into_iter()
            .find(|o| o.label == picked)
            .map(|o| o.value)
            .ok_or_else(|| anyhow::anyhow!("Selected option '{}' has no value", picked))
    }
}

/// Mock user input implementation for testing
#[cfg(test)]
pub struct MockUserInput {
    responses: Mutex<VecDeque<MockResponse>>,
    asked: Mutex<Vec<String>>,
}

#[cfg(test)]
impl MockUserInput {
    pub fn new() -> Self {
        Self::with_responses(Vec::new())
    }

    pub fn with_responses(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Titles of every prompt shown so far, in order
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }

    /// Number of queued responses not consumed yet
    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }

    fn next_response(&self, title: &str) -> Result<MockResponse> {
        self.asked.lock().unwrap().push(title.to_string());
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("No more mock responses available for '{}'", title))?;
        if matches!(response, MockResponse::Cancel) {
            return Err(DeployInputError::Cancelled.into());
        }
        Ok(response)
    }
}

#[cfg(test)]
impl Default for MockUserInput {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl UserInput for MockUserInput {
    fn input(&self, title: &str, _suggestions: &[String]) -> Result<String> {
        match self.next_response(title)? {
            MockResponse::Input(answer) => Ok(answer),
            other => anyhow::bail!("Expected Input response for '{}' but got {:?}", title, other),
        }
    }

    fn select(&self, title: &str, options: Vec<String>) -> Result<String> {
        match self.next_response(title)? {
            MockResponse::Select(answer) => {
                if options.contains(&answer) {
                    Ok(answer)
                } else {
                    anyhow::bail!(
                        "Mock response '{}' is not in the provided options: {:?}",
                        answer,
                        options
                    )
                }
            }
            other => anyhow::bail!("Expected Select response for '{}' but got {:?}", title, other),
        }
    }

    fn select_value(&self, title: &str, options: Vec<SelectOption>) -> Result<String> {
        match self.next_response(title)? {
            MockResponse::SelectValue(answer) => {
                if options.iter().any(|o| o.value == answer) {
                    Ok(answer)
                } else {
                    anyhow::bail!(
                        "Mock response '{}' is not among option values: {:?}",
                        answer,
                        options
                    )
                }
            }
            other => anyhow::bail!(
                "Expected SelectValue response for '{}' but got {:?}",
                title,
                other
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_records_prompt_titles() {
        let input = MockUserInput::with_responses(vec![
            MockResponse::Input("dev".to_string()),
            MockResponse::Select("docker".to_string()),
        ]);

        assert_eq!(input.input("Environment", &[]).unwrap(), "dev");
        assert_eq!(
            input
                .select("Mode", vec!["docker".to_string(), "containerd".to_string()])
                .unwrap(),
            "docker"
        );
        assert_eq!(input.asked(), vec!["Environment", "Mode"]);
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn test_mock_select_value_rejects_unknown_value() {
        let input = MockUserInput::with_responses(vec![MockResponse::SelectValue("x".into())]);
        let result = input.select_value("Pick", vec![SelectOption::new("Proceed", "proceed")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_mock_cancel_maps_to_cancelled_error() {
        let input = MockUserInput::with_responses(vec![MockResponse::Cancel]);
        let err = input.input("Template path", &[]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployInputError>(),
            Some(DeployInputError::Cancelled)
        ));
    }
}
