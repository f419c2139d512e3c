//! Classification of HCI diagnostic warnings.
//!
//! The adapter stack reports malformed wire data as free-text warnings such as
//! `processLeExtendedAdvertisingReport: Caught illegal packet (too short)`. This
//! module maps those strings onto a closed set of [`WarningCategory`] tags so
//! they can be counted and scraped reliably.
//!
//! Matching is plain case-sensitive substring containment against a fixed,
//! ordered table. The first matching context wins, then the first matching
//! phrase inside that context.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Substring that marks a warning as an illegal-packet report.
pub const ILLEGAL_MARKER: &str = "illegal";

/// Stable taxonomy of illegal-packet warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WarningCategory {
    /// Extended advertising report shorter than its declared layout.
    ExtAdvTooShort,
    /// Extended advertising report whose EIR length exceeds the packet.
    ExtAdvEirOversize,
    /// Extended advertising report that overflowed the reassembly buffer.
    ExtAdvBufferOverflow,
    /// Any other extended advertising report failure.
    ExtAdvOther,
    /// Malformed LE meta event on the HCI socket.
    SocketLeMetaMalformed,
    /// HCI event packet too short on the HCI socket.
    SocketEventTooShort,
    /// Malformed ACL data packet on the HCI socket.
    SocketAclMalformed,
    /// Any other HCI socket failure.
    SocketOther,
    /// Malformed command-complete event.
    CmdCompleteMalformed,
    /// Illegal packet reported from an unrecognized context.
    OtherIllegalPacket,
}

impl WarningCategory {
    /// Every category, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::ExtAdvTooShort,
        Self::ExtAdvEirOversize,
        Self::ExtAdvBufferOverflow,
        Self::ExtAdvOther,
        Self::SocketLeMetaMalformed,
        Self::SocketEventTooShort,
        Self::SocketAclMalformed,
        Self::SocketOther,
        Self::CmdCompleteMalformed,
        Self::OtherIllegalPacket,
    ];

    /// The tag used in log lines and summaries.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExtAdvTooShort => "ext_adv_too_short",
            Self::ExtAdvEirOversize => "ext_adv_eir_oversize",
            Self::ExtAdvBufferOverflow => "ext_adv_buffer_overflow",
            Self::ExtAdvOther => "ext_adv_other",
            Self::SocketLeMetaMalformed => "socket_le_meta_malformed",
            Self::SocketEventTooShort => "socket_event_too_short",
            Self::SocketAclMalformed => "socket_acl_malformed",
            Self::SocketOther => "socket_other",
            Self::CmdCompleteMalformed => "cmd_complete_malformed",
            Self::OtherIllegalPacket => "other_illegal_packet",
        }
    }
}

impl fmt::Display for WarningCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A function context embedded in the warning text and its phrase table.
struct ContextRule {
    context: &'static str,
    phrases: &'static [(&'static str, WarningCategory)],
    fallback: WarningCategory,
}

/// Contexts in priority order.
const RULES: &[ContextRule] = &[
    ContextRule {
        context: "processLeExtendedAdvertisingReport",
        phrases: &[
            ("too short", WarningCategory::ExtAdvTooShort),
            ("eir length", WarningCategory::ExtAdvEirOversize),
            ("buffer overflow", WarningCategory::ExtAdvBufferOverflow),
        ],
        fallback: WarningCategory::ExtAdvOther,
    },
    ContextRule {
        context: "onSocketData",
        phrases: &[
            ("LE meta packet", WarningCategory::SocketLeMetaMalformed),
            ("HCI event packet", WarningCategory::SocketEventTooShort),
            ("ACL packet", WarningCategory::SocketAclMalformed),
        ],
        fallback: WarningCategory::SocketOther,
    },
    ContextRule {
        context: "processCmdCompleteEvent",
        phrases: &[],
        fallback: WarningCategory::CmdCompleteMalformed,
    },
];

/// Classify a diagnostic message.
///
/// Returns `None` when the message is not an illegal-packet report.
#[must_use]
pub fn classify(message: &str) -> Option<WarningCategory> {
    if !message.contains(ILLEGAL_MARKER) {
        return None;
    }

    let category = RULES
        .iter()
        .find(|rule| message.contains(rule.context))
        .map_or(WarningCategory::OtherIllegalPacket, |rule| {
            rule.phrases
                .iter()
                .find(|(phrase, _)| message.contains(phrase))
                .map_or(rule.fallback, |(_, category)| *category)
        });

    Some(category)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_illegal_messages_are_unclassified() {
        assert_eq!(classify(""), None);
        assert_eq!(classify("adapter reset"), None);
        assert_eq!(
            classify("processLeExtendedAdvertisingReport: too short"),
            None
        );
        // Case-sensitive marker.
        assert_eq!(classify("onSocketData: Illegal ACL packet"), None);
    }

    #[test]
    fn test_extended_advertising_table() {
        let ctx = "processLeExtendedAdvertisingReport: Caught illegal packet";
        assert_eq!(
            classify(&format!("{ctx} (too short)")),
            Some(WarningCategory::ExtAdvTooShort)
        );
        assert_eq!(
            classify(&format!("{ctx}: eir length 40 > 31")),
            Some(WarningCategory::ExtAdvEirOversize)
        );
        assert_eq!(
            classify(&format!("{ctx} (buffer overflow)")),
            Some(WarningCategory::ExtAdvBufferOverflow)
        );
        assert_eq!(classify(ctx), Some(WarningCategory::ExtAdvOther));
    }

    #[test]
    fn test_socket_table() {
        let ctx = "onSocketData: Caught illegal packet";
        assert_eq!(
            classify(&format!("{ctx}: LE meta packet truncated")),
            Some(WarningCategory::SocketLeMetaMalformed)
        );
        assert_eq!(
            classify(&format!("{ctx}: HCI event packet too short")),
            Some(WarningCategory::SocketEventTooShort)
        );
        assert_eq!(
            classify(&format!("{ctx}: ACL packet length mismatch")),
            Some(WarningCategory::SocketAclMalformed)
        );
        assert_eq!(classify(ctx), Some(WarningCategory::SocketOther));
    }

    #[test]
    fn test_cmd_complete_and_unknown_context() {
        assert_eq!(
            classify("processCmdCompleteEvent: illegal packet (too short)"),
            Some(WarningCategory::CmdCompleteMalformed)
        );
        assert_eq!(
            classify("processLeConnComplete: illegal packet"),
            Some(WarningCategory::OtherIllegalPacket)
        );
    }

    #[test]
    fn test_first_context_wins() {
        let message = "onSocketData -> processLeExtendedAdvertisingReport: illegal ACL packet";
        assert_eq!(classify(message), Some(WarningCategory::ExtAdvOther));
    }

    #[test]
    fn test_category_tags_are_snake_case() {
        for category in WarningCategory::ALL {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{category}\""));
        }
    }
}
