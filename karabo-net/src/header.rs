//! The reserved header keys every RPC message carries, and the pipe/colon
//! framing used for the multi-valued ones (`slotInstanceIds`,
//! `slotFunctions`). Parsing is defensive: a malformed frame yields an
//! empty list rather than panicking, since a header is attacker- or
//! bug-adjacent input from the wire.

use karabo_data::{Clock, Container, SystemClock};

pub const SIGNAL_INSTANCE_ID: &str = "signalInstanceId";
pub const SIGNAL_FUNCTION: &str = "signalFunction";
pub const SLOT_INSTANCE_IDS: &str = "slotInstanceIds";
pub const SLOT_FUNCTIONS: &str = "slotFunctions";
pub const REPLY_TO: &str = "replyTo";
pub const REPLY_FROM: &str = "replyFrom";
pub const ERROR: &str = "error";
pub const ERROR_MESSAGE: &str = "errorMessage";
pub const HOST_NAME: &str = "hostName";
pub const USER_NAME: &str = "userName";
pub const MQ_TIMESTAMP: &str = "MQTimestamp";

/// A thin, typed view over the reserved keys of a message [`Container`].
/// The body of the message (the RPC arguments, `a1..aN`) lives alongside
/// these keys in the same container.
#[derive(Debug, Clone, Default)]
pub struct Header(pub Container);

/// Frame a list of ids as Karabo's `|id1|id2|...|` delimiter convention.
fn frame_list(ids: &[&str]) -> String {
    if ids.is_empty() {
        return String::new();
    }
    format!("|{}|", ids.join("|"))
}

/// Parse a `|id1|id2|...|` frame back into its ids. Tolerates a missing
/// leading/trailing pipe and empty segments rather than erroring.
fn parse_list(frame: &str) -> Vec<String> {
    frame.split('|').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect()
}

/// Frame `(instanceId, [slotNames])` pairs as `|id:slotA,slotB|...|`.
fn frame_slot_functions(pairs: &[(&str, &[&str])]) -> String {
    if pairs.is_empty() {
        return String::new();
    }
    let joined: Vec<String> = pairs.iter().map(|(id, slots)| format!("{id}:{}", slots.join(","))).collect();
    format!("|{}|", joined.join("|"))
}

fn parse_slot_functions(frame: &str) -> Vec<(String, Vec<String>)> {
    parse_list(frame)
        .into_iter()
        .filter_map(|entry| {
            let (id, slots) = entry.split_once(':')?;
            let slots = slots.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect();
            Some((id.to_owned(), slots))
        })
        .collect()
}

impl Header {
    pub fn new() -> Self {
        Self(Container::new())
    }

    pub fn signal(signal_instance_id: &str, signal_function: &str) -> Self {
        let mut h = Self::new();
        h.0.set_unchecked(SIGNAL_INSTANCE_ID, signal_instance_id);
        h.0.set_unchecked(SIGNAL_FUNCTION, signal_function);
        h.stamp_origin();
        h
    }

    /// Fill in the reserved `hostName`/`userName`/`MQTimestamp` triple
    /// every outgoing header carries, read from the process environment
    /// and the system clock.
    fn stamp_origin(&mut self) {
        let host = std::env::var("HOSTNAME").or_else(|_| std::env::var("HOST")).unwrap_or_else(|_| "unknown".to_string());
        let user = std::env::var("USER").or_else(|_| std::env::var("USERNAME")).unwrap_or_else(|_| "unknown".to_string());
        self.0.set_unchecked(HOST_NAME, host);
        self.0.set_unchecked(USER_NAME, user);
        self.0.set_unchecked(MQ_TIMESTAMP, SystemClock.now().epoch_secs * 1000);
    }

    pub fn host_name(&self) -> Option<&str> {
        self.0.get(HOST_NAME).and_then(karabo_data::Value::as_str)
    }

    pub fn user_name(&self) -> Option<&str> {
        self.0.get(USER_NAME).and_then(karabo_data::Value::as_str)
    }

    pub fn mq_timestamp_millis(&self) -> Option<i64> {
        self.0.get(MQ_TIMESTAMP).and_then(karabo_data::Value::as_i64)
    }

    pub fn signal_instance_id(&self) -> Option<&str> {
        self.0.get(SIGNAL_INSTANCE_ID).and_then(karabo_data::Value::as_str)
    }

    pub fn signal_function(&self) -> Option<&str> {
        self.0.get(SIGNAL_FUNCTION).and_then(karabo_data::Value::as_str)
    }

    pub fn set_slot_instance_ids(&mut self, ids: &[&str]) {
        self.0.set_unchecked(SLOT_INSTANCE_IDS, frame_list(ids));
    }

    pub fn slot_instance_ids(&self) -> Vec<String> {
        self.0.get(SLOT_INSTANCE_IDS).and_then(karabo_data::Value::as_str).map(parse_list).unwrap_or_default()
    }

    pub fn set_slot_functions(&mut self, pairs: &[(&str, &[&str])]) {
        self.0.set_unchecked(SLOT_FUNCTIONS, frame_slot_functions(pairs));
    }

    pub fn slot_functions(&self) -> Vec<(String, Vec<String>)> {
        self.0.get(SLOT_FUNCTIONS).and_then(karabo_data::Value::as_str).map(parse_slot_functions).unwrap_or_default()
    }

    pub fn set_reply_to(&mut self, reply_id: &str) {
        self.0.set_unchecked(REPLY_TO, reply_id);
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.0.get(REPLY_TO).and_then(karabo_data::Value::as_str)
    }

    pub fn set_reply_from(&mut self, instance_id: &str) {
        self.0.set_unchecked(REPLY_FROM, instance_id);
    }

    pub fn reply_from(&self) -> Option<&str> {
        self.0.get(REPLY_FROM).and_then(karabo_data::Value::as_str)
    }

    pub fn set_error(&mut self, message: &str) {
        self.0.set_unchecked(ERROR, true);
        self.0.set_unchecked(ERROR_MESSAGE, message);
    }

    pub fn is_error(&self) -> bool {
        matches!(self.0.get(ERROR), Some(karabo_data::Value::Bool(true)))
    }

    pub fn error_message(&self) -> Option<&str> {
        self.0.get(ERROR_MESSAGE).and_then(karabo_data::Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_instance_ids_roundtrip() {
        let mut h = Header::new();
        h.set_slot_instance_ids(&["deviceA", "deviceB"]);
        assert_eq!(h.slot_instance_ids(), vec!["deviceA", "deviceB"]);
    }

    #[test]
    fn slot_functions_roundtrip() {
        let mut h = Header::new();
        h.set_slot_functions(&[("deviceA", &["slotA", "slotB"]), ("deviceB", &["slotC"])]);
        let parsed = h.slot_functions();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], ("deviceA".to_string(), vec!["slotA".to_string(), "slotB".to_string()]));
        assert_eq!(parsed[1], ("deviceB".to_string(), vec!["slotC".to_string()]));
    }

    #[test]
    fn malformed_frame_yields_empty_list() {
        assert_eq!(parse_list(""), Vec::<String>::new());
        assert_eq!(parse_slot_functions("garbage-no-colon"), Vec::<(String, Vec<String>)>::new());
    }

    #[test]
    fn error_flag_roundtrip() {
        let mut h = Header::new();
        assert!(!h.is_error());
        h.set_error("slot handler panicked");
        assert!(h.is_error());
        assert_eq!(h.error_message(), Some("slot handler panicked"));
    }

    #[test]
    fn signal_headers_carry_origin_stamp() {
        let h = Header::signal("deviceA", "signalStateChanged");
        assert!(h.host_name().is_some());
        assert!(h.user_name().is_some());
        assert!(h.mq_timestamp_millis().unwrap() > 0);
    }
}
