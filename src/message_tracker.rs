//! Message delivery tracking (C5): inbound dispatch, ACK matching, and the
//! two-tier retry state machine for outbound messages.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub timestamp: DateTime<Utc>,
    pub from_call: String,
    pub to_call: String,
    pub message: String,
    pub message_id: Option<String>,
    pub direction: Direction,
    pub digipeated: bool,
    pub ack_received: bool,
    pub failed: bool,
    pub retry_count: u32,
    pub last_sent: DateTime<Utc>,
    pub read: bool,
}

impl Message {
    fn retry_interval(&self, config: &RetryConfig) -> Duration {
        if self.digipeated {
            Duration::seconds(config.retry_slow_seconds)
        } else {
            Duration::seconds(config.retry_fast_seconds)
        }
    }

    /// ACKs carry no message_id of their own and are never retried.
    fn is_ack_or_rej(&self) -> bool {
        self.message_id.is_none() && extract_reply_id(&self.message).is_some()
    }

    pub fn is_due(&self, now: DateTime<Utc>, config: &RetryConfig) -> bool {
        self.direction == Direction::Sent
            && !self.ack_received
            && !self.failed
            && !self.is_ack_or_rej()
            && now - self.last_sent >= self.retry_interval(config)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_fast_seconds: i64,
    pub retry_slow_seconds: i64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 3,
            retry_fast_seconds: 20,
            retry_slow_seconds: 600,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MessageTracker {
    my_callsign: String,
    sent: Vec<Message>,
    /// Messages addressed to us (directly, via an alias, or ALL).
    personal: Vec<Message>,
    /// Every inbound message observed, addressed to us or not.
    monitored: Vec<Message>,
    #[serde(skip)]
    config: RetryConfig,
}

/// What happened when an inbound message/ACK/REJ packet was dispatched.
#[derive(Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// An ACK matched one of our pending sent messages.
    Acked { message_id: String },
    /// The message was addressed to us and is new (not a duplicate).
    DeliveredToMe,
    /// The message was addressed to us but matches an already-recorded
    /// message under the duplicate rules (same id, same text, or fuzzy).
    DuplicateToMe,
    /// We heard our own previously sent message or ACK echoed back via a
    /// digipeater: treat it as implicit proof of digipeat and move the
    /// matching sent message to the slow retry tier.
    ImplicitDigipeat { message_id: String },
    /// A telemetry config line (`PARM.`/`UNIT.`/`EQNS.`/`BITS.`): counted
    /// as a packet upstream but never enqueued.
    TelemetryConfig,
    /// Not addressed to us and not a reply to anything we sent.
    NotForMe,
}

impl MessageTracker {
    pub fn new(my_callsign: &str, config: RetryConfig) -> Self {
        MessageTracker {
            my_callsign: my_callsign.to_ascii_uppercase(),
            sent: Vec::new(),
            personal: Vec::new(),
            monitored: Vec::new(),
            config,
        }
    }

    /// Restores identity and live config onto a tracker just deserialized
    /// from a snapshot, whose `my_callsign`/`config` fields are not
    /// persisted (they come from the current run's configuration, not a
    /// frozen one).
    pub fn rehydrate(&mut self, my_callsign: &str, config: RetryConfig) {
        self.my_callsign = my_callsign.to_ascii_uppercase();
        self.config = config;
    }

    /// True if `addressee` is addressed to us: `ALL`, a `BSS*` alias, or
    /// our base callsign (SSID ignored on both sides).
    pub fn is_for_me(&self, addressee: &str) -> bool {
        let trimmed = addressee.trim();
        if trimmed.eq_ignore_ascii_case("ALL") || trimmed.to_ascii_uppercase().starts_with("BSS") {
            return true;
        }
        base_callsign(trimmed).eq_ignore_ascii_case(base_callsign(&self.my_callsign))
    }

    pub fn add_sent_message(
        &mut self,
        to_call: &str,
        text: &str,
        message_id: Option<&str>,
        now: DateTime<Utc>,
    ) {
        self.sent.push(Message {
            timestamp: now,
            from_call: self.my_callsign.clone(),
            to_call: to_call.to_string(),
            message: text.to_string(),
            message_id: message_id.map(|id| id.to_string()),
            direction: Direction::Sent,
            digipeated: false,
            ack_received: false,
            failed: false,
            retry_count: 0,
            last_sent: now,
            read: true,
        });
    }

    /// Dispatches an inbound packet: ACK/REJ matching (SSID-loose, with
    /// base-callsign fallback), implicit-digipeat detection (our own sent
    /// text or ACK heard coming back via a digipeater), telemetry-config
    /// suppression, or plain addressed-to-me delivery with duplicate
    /// detection.
    pub fn dispatch_inbound(
        &mut self,
        from: &str,
        addressee: &str,
        text: &str,
        message_id: Option<&str>,
        is_ack: bool,
        is_rej: bool,
        heard_via_digipeater: bool,
        now: DateTime<Utc>,
    ) -> DispatchOutcome {
        if is_ack || is_rej {
            // REJ carries no handling of its own here: the original this is
            // grounded on matches "ack"/"rej" the same way at the outer
            // dispatch layer but has no inner branch for rej at all, so a
            // REJ is silently swallowed once station activity is recorded
            // upstream. `failed` is set in exactly one place: retry
            // exhaustion, in `due_retries` below.
            if is_ack {
                if let Some(id) = extract_reply_id(text) {
                    if let Some(msg) = self.find_sent_mut(from, &id) {
                        msg.ack_received = true;
                        return DispatchOutcome::Acked { message_id: id };
                    }
                }
            }
            return DispatchOutcome::NotForMe;
        }

        if heard_via_digipeater && base_callsign(from).eq_ignore_ascii_case(base_callsign(&self.my_callsign)) {
            if let Some(id) = message_id {
                if let Some(msg) = self
                    .sent
                    .iter_mut()
                    .find(|m| m.message_id.as_deref() == Some(id))
                {
                    msg.digipeated = true;
                    return DispatchOutcome::ImplicitDigipeat {
                        message_id: id.to_string(),
                    };
                }
            } else if let Some(msg) = self.sent.iter_mut().find(|m| {
                m.message_id.is_none() && m.to_call.eq_ignore_ascii_case(addressee) && m.message == text
            }) {
                msg.digipeated = true;
                msg.ack_received = true;
                return DispatchOutcome::ImplicitDigipeat {
                    message_id: String::new(),
                };
            }
        }

        if is_telemetry_config(text) {
            return DispatchOutcome::TelemetryConfig;
        }

        let message = Message {
            timestamp: now,
            from_call: from.to_string(),
            to_call: addressee.to_string(),
            message: text.to_string(),
            message_id: message_id.map(|id| id.to_string()),
            direction: Direction::Received,
            digipeated: false,
            ack_received: false,
            failed: false,
            retry_count: 0,
            last_sent: now,
            read: false,
        };
        self.monitored.push(message.clone());

        if !self.is_for_me(addressee) {
            return DispatchOutcome::NotForMe;
        }

        if self.is_duplicate_personal(from, text, message_id, now) {
            DispatchOutcome::DuplicateToMe
        } else {
            self.personal.push(message);
            DispatchOutcome::DeliveredToMe
        }
    }

    fn is_duplicate_personal(
        &self,
        from: &str,
        text: &str,
        message_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        self.personal.iter().any(|m| {
            if !m.from_call.eq_ignore_ascii_case(from) {
                return false;
            }
            if let (Some(a), Some(b)) = (&m.message_id, message_id) {
                if a.eq_ignore_ascii_case(b) {
                    return true;
                }
            }
            if m.message == text {
                return true;
            }
            let within_window = (now - m.timestamp).num_seconds().abs() <= 30;
            if within_window {
                let a: String = m.message.chars().take(20).collect();
                let b: String = text.chars().take(20).collect();
                if !a.is_empty() && !b.is_empty() && (a.starts_with(&b) || b.starts_with(&a)) {
                    return true;
                }
            }
            false
        })
    }

    /// Earliest sent message matching `message_id`, addressed to `from`
    /// (SSID-loose, falling back to base-callsign-only).
    fn find_sent_mut(&mut self, from: &str, message_id: &str) -> Option<&mut Message> {
        if let Some(pos) = self.sent.iter().position(|m| {
            m.direction == Direction::Sent
                && m.message_id.as_deref() == Some(message_id)
                && m.to_call.eq_ignore_ascii_case(from)
        }) {
            return self.sent.get_mut(pos);
        }
        let base = base_callsign(from);
        let pos = self.sent.iter().position(|m| {
            m.direction == Direction::Sent
                && m.message_id.as_deref() == Some(message_id)
                && base_callsign(&m.to_call).eq_ignore_ascii_case(base)
        })?;
        self.sent.get_mut(pos)
    }

    /// Messages whose retry interval has elapsed and haven't exceeded
    /// `max_retries`, advancing their retry count and marking exhausted
    /// ones failed. ACKs/REJs we sent are never retried.
    pub fn due_retries(&mut self, now: DateTime<Utc>) -> Vec<Message> {
        let config = self.config;
        let mut due = Vec::new();
        for msg in self.sent.iter_mut() {
            if !msg.is_due(now, &config) {
                continue;
            }
            if msg.retry_count >= config.max_retries {
                msg.failed = true;
                continue;
            }
            msg.retry_count += 1;
            msg.last_sent = now;
            due.push(msg.clone());
        }
        due
    }

    pub fn pending_count(&self) -> usize {
        self.sent.iter().filter(|m| !m.ack_received && !m.failed).count()
    }

    pub fn sent_messages(&self) -> &[Message] {
        &self.sent
    }

    pub fn personal_messages(&self) -> &[Message] {
        &self.personal
    }

    pub fn monitored_messages(&self) -> &[Message] {
        &self.monitored
    }

    /// Clears all tracked sent, personal, and monitored messages.
    pub fn clear_messages(&mut self) {
        self.sent.clear();
        self.personal.clear();
        self.monitored.clear();
    }
}

/// Formats the info field for an outbound ack: `:AAAAAAAAA:ackNNNNN`. The
/// addressee is left-justified and space-padded/truncated to 9 characters,
/// matching the fixed-width addressee field every APRS message carries.
pub fn format_ack_info(to_call: &str, message_id: &str) -> String {
    format!(":{:<9.9}:ack{}", to_call, message_id)
}

fn is_telemetry_config(text: &str) -> bool {
    text.starts_with("PARM.") || text.starts_with("UNIT.") || text.starts_with("EQNS.") || text.starts_with("BITS.")
}

/// Extracts the id from an `ackNNNNN`/`rejNNNNN` reply body, stripping any
/// trailing `}`. `None` if the remainder isn't 1-5 alphanumerics.
fn extract_reply_id(text: &str) -> Option<String> {
    let rest = text.strip_prefix("ack").or_else(|| text.strip_prefix("rej"))?;
    let id = rest.trim_end_matches('}');
    if id.is_empty() || id.len() > 5 || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        None
    } else {
        Some(id.to_string())
    }
}

fn base_callsign(call: &str) -> &str {
    call.split('-').next().unwrap_or(call)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn ack_matches_and_marks_acked() {
        let mut tracker = MessageTracker::new("K1FSY-9", RetryConfig::default());
        tracker.add_sent_message("N0CALL", "hi", Some("42"), t(0));
        let outcome = tracker.dispatch_inbound("N0CALL", "K1FSY-9", "ack42", None, true, false, false, t(1));
        assert_eq!(outcome, DispatchOutcome::Acked { message_id: "42".to_string() });
        assert!(tracker.sent_messages()[0].ack_received);
    }

    #[test]
    fn ack_matches_with_ssid_loose_fallback() {
        let mut tracker = MessageTracker::new("K1FSY-9", RetryConfig::default());
        tracker.add_sent_message("N0CALL-5", "hi", Some("7"), t(0));
        let outcome = tracker.dispatch_inbound("N0CALL", "K1FSY-9", "ack7", None, true, false, false, t(1));
        assert_eq!(outcome, DispatchOutcome::Acked { message_id: "7".to_string() });
    }

    #[test]
    fn rej_is_a_no_op() {
        let mut tracker = MessageTracker::new("K1FSY-9", RetryConfig::default());
        tracker.add_sent_message("N0CALL", "hi", Some("1"), t(0));
        let outcome = tracker.dispatch_inbound("N0CALL", "K1FSY-9", "rej1", None, false, true, false, t(1));
        assert_eq!(outcome, DispatchOutcome::NotForMe);
        // `failed` only ever comes from retry exhaustion, never a REJ.
        assert!(!tracker.sent_messages()[0].failed);
        assert_eq!(tracker.sent_messages()[0].retry_count, 0);
    }

    #[test]
    fn fast_retry_fires_before_slow() {
        let mut tracker = MessageTracker::new("K1FSY-9", RetryConfig::default());
        tracker.add_sent_message("N0CALL", "hi", Some("1"), t(0));
        assert!(tracker.due_retries(t(5)).is_empty());
        let due = tracker.due_retries(t(21));
        assert_eq!(due.len(), 1);
    }

    #[test]
    fn exceeding_max_retries_marks_failed() {
        let mut tracker = MessageTracker::new(
            "K1FSY-9",
            RetryConfig { max_retries: 1, ..RetryConfig::default() },
        );
        tracker.add_sent_message("N0CALL", "hi", Some("1"), t(0));
        tracker.due_retries(t(21));
        tracker.due_retries(t(42));
        assert!(tracker.sent_messages()[0].failed);
    }

    #[test]
    fn slow_tier_waits_longer_once_digipeated() {
        let mut tracker = MessageTracker::new("K1FSY-9", RetryConfig::default());
        tracker.add_sent_message("N0CALL", "hi", Some("1"), t(0));
        tracker.dispatch_inbound("K1FSY-9", "N0CALL", "hi", Some("1"), false, false, true, t(1));
        assert!(tracker.due_retries(t(30)).is_empty());
        assert_eq!(tracker.due_retries(t(605)).len(), 1);
    }

    #[test]
    fn implicit_digipeat_moves_to_slow_tier() {
        let mut tracker = MessageTracker::new("K1FSY-9", RetryConfig::default());
        tracker.add_sent_message("N0CALL", "hi", Some("1"), t(0));
        let outcome = tracker.dispatch_inbound("K1FSY-9", "N0CALL", "hi", Some("1"), false, false, true, t(1));
        assert_eq!(outcome, DispatchOutcome::ImplicitDigipeat { message_id: "1".to_string() });
        assert!(tracker.sent_messages()[0].digipeated);
    }

    #[test]
    fn implicit_digipeat_on_echoed_ack_marks_it_acked_too() {
        let mut tracker = MessageTracker::new("K1FSY-9", RetryConfig::default());
        tracker.add_sent_message("N0CALL", "ack9", None, t(0));
        let outcome = tracker.dispatch_inbound("K1FSY-9", "N0CALL", "ack9", None, false, false, true, t(1));
        assert_eq!(outcome, DispatchOutcome::ImplicitDigipeat { message_id: String::new() });
        let sent = &tracker.sent_messages()[0];
        assert!(sent.digipeated);
        assert!(sent.ack_received);
    }

    #[test]
    fn delivered_to_me_detects_duplicates() {
        let mut tracker = MessageTracker::new("K1FSY-9", RetryConfig::default());
        let first = tracker.dispatch_inbound("N0CALL", "K1FSY-9", "hello", None, false, false, false, t(0));
        assert_eq!(first, DispatchOutcome::DeliveredToMe);
        let second = tracker.dispatch_inbound("N0CALL", "K1FSY-9", "hello", None, false, false, false, t(1));
        assert_eq!(second, DispatchOutcome::DuplicateToMe);
        assert_eq!(tracker.personal_messages().len(), 1);
        assert_eq!(tracker.monitored_messages().len(), 2);
    }

    #[test]
    fn fuzzy_duplicate_within_window_and_prefix() {
        let mut tracker = MessageTracker::new("K1FSY-9", RetryConfig::default());
        tracker.dispatch_inbound(
            "N0CALL",
            "K1FSY-9",
            "weather is clear and sunny today",
            None,
            false,
            false,
            false,
            t(0),
        );
        let outcome = tracker.dispatch_inbound(
            "N0CALL",
            "K1FSY-9",
            "weather is clear and sunny",
            None,
            false,
            false,
            false,
            t(10),
        );
        assert_eq!(outcome, DispatchOutcome::DuplicateToMe);
    }

    #[test]
    fn base_call_and_all_alias_are_for_me() {
        let tracker = MessageTracker::new("K1FSY-9", RetryConfig::default());
        assert!(tracker.is_for_me("K1FSY"));
        assert!(tracker.is_for_me("ALL"));
        assert!(tracker.is_for_me("BSSWX"));
        assert!(!tracker.is_for_me("N0CALL"));
    }

    #[test]
    fn telemetry_config_is_counted_but_not_enqueued() {
        let mut tracker = MessageTracker::new("K1FSY-9", RetryConfig::default());
        let outcome =
            tracker.dispatch_inbound("N0CALL", "K1FSY-9", "PARM.Temp,Volts", None, false, false, false, t(0));
        assert_eq!(outcome, DispatchOutcome::TelemetryConfig);
        assert!(tracker.personal_messages().is_empty());
    }

    #[test]
    fn ack_info_pads_addressee_to_nine_chars() {
        assert_eq!(format_ack_info("N0CALL", "42"), ":N0CALL   :ack42");
        assert_eq!(format_ack_info("LONGCALL9", "1"), ":LONGCALL9:ack1");
    }

    #[test]
    fn clear_messages_empties_all_lists() {
        let mut tracker = MessageTracker::new("K1FSY-9", RetryConfig::default());
        tracker.add_sent_message("N0CALL", "hi", Some("1"), t(0));
        tracker.dispatch_inbound("N0CALL", "K1FSY-9", "hello", None, false, false, false, t(0));
        tracker.clear_messages();
        assert!(tracker.sent_messages().is_empty());
        assert!(tracker.personal_messages().is_empty());
        assert!(tracker.monitored_messages().is_empty());
    }
}
