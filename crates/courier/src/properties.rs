//! Broker-native message properties used as protocol fields.

/// Priority assumed when a message carries none.
pub const DEFAULT_PRIORITY: u8 = 20;

/// AMQP delivery mode for messages that survive a broker restart.
pub const PERSISTENT: u8 = 2;

/// The subset of message properties the protocol reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub priority: Option<u8>,
    pub delivery_mode: Option<u8>,
}

impl MessageProperties {
    /// Properties for a persistent message.
    pub fn persistent() -> Self {
        Self {
            delivery_mode: Some(PERSISTENT),
            ..Self::default()
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn is_persistent(&self) -> bool {
        self.delivery_mode == Some(PERSISTENT)
    }

    /// Resolves the routing metadata of an incoming request.
    ///
    /// `reply_to` on the message wins; the responder's default output queue is
    /// used only when the requester did not name one. Empty strings count as
    /// absent.
    pub fn resolve(&self, default_output_queue: &str) -> Result<RequestMetadata, MissingMetadata> {
        let correlation_id = non_empty(self.correlation_id.as_deref());
        let reply_to = non_empty(self.reply_to.as_deref()).or_else(|| non_empty(Some(default_output_queue)));

        match (correlation_id, reply_to) {
            (Some(correlation_id), Some(reply_to)) => Ok(RequestMetadata {
                correlation_id: correlation_id.to_string(),
                reply_to: reply_to.to_string(),
                priority: self.priority.unwrap_or(DEFAULT_PRIORITY),
            }),
            (correlation_id, reply_to) => Err(MissingMetadata {
                correlation_id: correlation_id.is_none(),
                reply_to: reply_to.is_none(),
            }),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Routing metadata of a request once defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMetadata {
    pub correlation_id: String,
    pub reply_to: String,
    pub priority: u8,
}

/// Which required fields were absent from a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingMetadata {
    pub correlation_id: bool,
    pub reply_to: bool,
}

impl std::fmt::Display for MissingMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.correlation_id, self.reply_to) {
            (true, true) => write!(f, "missing correlation_id and reply_to"),
            (true, false) => write!(f, "missing correlation_id"),
            (false, true) => write!(f, "missing reply_to"),
            (false, false) => write!(f, "metadata complete"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let props = MessageProperties::default().with_correlation_id("abc");
        let meta = props.resolve("default_out").unwrap();
        assert_eq!(meta.correlation_id, "abc");
        assert_eq!(meta.reply_to, "default_out");
        assert_eq!(meta.priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn test_requester_reply_to_wins() {
        let props = MessageProperties::default()
            .with_correlation_id("abc")
            .with_reply_to("bot_output")
            .with_priority(120);
        let meta = props.resolve("default_out").unwrap();
        assert_eq!(meta.reply_to, "bot_output");
        assert_eq!(meta.priority, 120);
    }

    #[test]
    fn test_missing_correlation_id() {
        let props = MessageProperties::default().with_reply_to("bot_output");
        let missing = props.resolve("default_out").unwrap_err();
        assert!(missing.correlation_id);
        assert!(!missing.reply_to);
        assert_eq!(missing.to_string(), "missing correlation_id");
    }

    #[test]
    fn test_empty_strings_count_as_absent() {
        let props = MessageProperties::default().with_correlation_id("").with_reply_to("");
        let missing = props.resolve("").unwrap_err();
        assert!(missing.correlation_id && missing.reply_to);
    }

    #[test]
    fn test_persistent_builder() {
        assert!(MessageProperties::persistent().is_persistent());
        assert!(!MessageProperties::default().is_persistent());
    }
}
