//! Requests passed from listeners to the dispatcher.

/// A request to run the registered command `command_id`.
///
/// Carries only the identifier: authentication happens before a request is
/// created, and lookup happens in the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command_id: String,
}

impl CommandRequest {
    pub fn new(command_id: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
        }
    }
}
