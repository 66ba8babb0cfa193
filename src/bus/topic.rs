//! Topic naming shared by publishers and subscriber adapters.

/// Every file state transition, any owner
pub const FILE_TOPIC: &str = "file";

/// Page render requests for the widget renderer
pub const WIDGET_TOPIC: &str = "widget";

/// Topics with this prefix keep undelivered messages until the first subscriber arrives
pub const FIRE_ONCE_PREFIX: &str = "once.";

/// Transitions and error notifications of a single owner
pub fn user_topic(token: &str) -> String {
    format!("user.{token}")
}

/// One-shot topic for answering a single request
pub fn once_topic(namespace: &str, request_id: &str) -> String {
    format!("{FIRE_ONCE_PREFIX}{namespace}.{request_id}")
}

pub fn is_fire_once(topic: &str) -> bool {
    topic.starts_with(FIRE_ONCE_PREFIX)
}
