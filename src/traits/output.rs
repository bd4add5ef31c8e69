#[cfg(test)]
use std::sync::Mutex;

/// Output message captured by MockOutput for testing
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub enum OutputMessage {
    Success(String),
    Warning(String),
    Info(String),
    Section(String),
    Subsection(String),
    KeyValue(String, String),
    Dimmed(String),
    State(String),
    Blank,
}

/// Trait for terminal output operations to enable testing with mocks
pub trait Output: Send + Sync {
    fn success(&self, message: &str);

    fn warning(&self, message: &str);

    fn info(&self, message: &str);

    fn section(&self, title: &str);

    fn subsection(&self, title: &str);

    fn key_value(&self, key: &str, value: &str);

    /// Print a key-value pair with highlighted value
    fn key_value_highlight(&self, key: &str, value: &str);

    fn dimmed(&self, message: &str);

    fn blank(&self);

    fn environment_badge(&self, env_name: &str);

    /// Print an environment's operational state; `live` when containers are running
    fn state_badge(&self, state: &str, live: bool);
}

/// Real terminal output implementation using the output module
pub struct TerminalOutput;

impl Output for TerminalOutput {
    fn success(&self, message: &str) {
        crate::output::success(message);
    }

    fn warning(&self, message: &str) {
        crate::output::warning(message);
    }

    fn info(&self, message: &str) {
        crate::output::info(message);
    }

    fn section(&self, title: &str) {
        crate::output::section(title);
    }

    fn subsection(&self, title: &str) {
        crate::output::subsection(title);
    }

    fn key_value(&self, key: &str, value: &str) {
        crate::output::key_value(key, value);
    }

    fn key_value_highlight(&self, key: &str, value: &str) {
        crate::output::key_value_highlight(key, value);
    }

    fn dimmed(&self, message: &str) {
        crate::output::dimmed(message);
    }

    fn blank(&self) {
        crate::output::blank();
    }

    fn environment_badge(&self, env_name: &str) {
        crate::output::environment_badge(env_name);
    }

    fn state_badge(&self, state: &str, live: bool) {
        crate::output::state_badge(state, live);
    }
}

/// Mock output implementation for testing (captures output)
#[cfg(test)]
pub struct MockOutput {
    messages: Mutex<Vec<OutputMessage>>,
}

#[cfg(test)]
impl MockOutput {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn contains_message(&self, message: &OutputMessage) -> bool {
        self.messages.lock().unwrap().contains(message)
    }

    /// All warning texts, in emission order
    pub fn get_warnings(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| {
                if let OutputMessage::Warning(msg) = m {
                    Some(msg.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Value printed for a key, if any
    pub fn value_for(&self, key: &str) -> Option<String> {
        self.messages.lock().unwrap().iter().find_map(|m| match m {
            OutputMessage::KeyValue(k, v) if k == key => Some(v.clone()),
            _ => None,
        })
    }

    pub fn to_text(&self) -> String {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|msg| match msg {
                OutputMessage::Success(s) => format!("✓ {}", s),
                OutputMessage::Warning(s) => format!("⚠ {}", s),
                OutputMessage::Info(s) => s.clone(),
                OutputMessage::Section(s) => format!("\n=== {} ===", s),
                OutputMessage::Subsection(s) => format!("\n--- {} ---", s),
                OutputMessage::KeyValue(k, v) => format!("{}: {}", k, v),
                OutputMessage::Dimmed(s) => s.clone(),
                OutputMessage::State(s) => format!("State: {}", s),
                OutputMessage::Blank => String::new(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn push(&self, message: OutputMessage) {
        self.messages.lock().unwrap().push(message);
    }
}

#[cfg(test)]
impl Default for MockOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl Output for MockOutput {
    fn success(&self, message: &str) {
        self.push(OutputMessage::Success(message.to_string()));
    }

    fn warning(&self, message: &str) {
        self.push(OutputMessage::Warning(message.to_string()));
    }

    fn info(&self, message: &str) {
        self.push(OutputMessage::Info(message.to_string()));
    }

    fn section(&self, title: &str) {
        self.push(OutputMessage::Section(title.to_string()));
    }

    fn subsection(&self, title: &str) {
        self.push(OutputMessage::Subsection(title.to_string()));
    }

    fn key_value(&self, key: &str, value: &str) {
        self.push(OutputMessage::KeyValue(key.to_string(), value.to_string()));
    }

    fn key_value_highlight(&self, key: &str, value: &str) {
        self.push(OutputMessage::KeyValue(key.to_string(), value.to_string()));
    }

    fn dimmed(&self, message: &str) {
        self.push(OutputMessage::Dimmed(message.to_string()));
    }

    fn blank(&self) {
        self.push(OutputMessage::Blank);
    }

    fn environment_badge(&self, env_name: &str) {
        self.push(OutputMessage::KeyValue(
            "Environment".to_string(),
            env_name.to_string(),
        ));
    }

    fn state_badge(&self, state: &str, _live: bool) {
        self.push(OutputMessage::State(state.to_string()));
    }
}
