//! Inter-node control protocol
//!
//! Each control frame is one line of text: a single-character opcode
//! followed by space-delimited fields, or one of the reserved sentinel
//! strings. Field counts are fixed per opcode; the last field of opcodes
//! carrying free text takes the remainder of the line.
//!
//! ```text
//! D <cmdnode> <src> <dest> <seq> <digit>     DTMF digit relay
//! L <list>                                   node-list advertisement
//! M <dest> <src> <text...>                   text message
//! T <src> <dest> <payload...>                telemetry / variable event
//! C <src> <group> <directive...>             CTCSS group tone control
//! K <dest> <src> <seq> <secs|?>              top-keyed-node report/query
//! I <src> <payload...>                       identification report
//! G <src> <coords...>                        location report
//! DISCONNECT | !NEWKEY! | !NEWKEY1!          sentinels
//! ```

pub mod linklist;

use serde::Serialize;
use std::fmt;

use crate::error::ProtocolError;

/// Destination meaning "everyone"
pub const BROADCAST: &str = "0";

/// Disconnect-now sentinel
pub const DISCONNECT: &str = "DISCONNECT";

/// Capability sentinel for redundant-retransmit peers
pub const NEWKEY: &str = "!NEWKEY!";

/// Capability sentinel for edge-reporting peers with linger
pub const NEWKEY1: &str = "!NEWKEY1!";

/// Peer keying capability, learned from the handshake.
///
/// Ordered so a link's capability can only be raised during a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyProtocol {
    /// Continuous indication, no handshake seen
    #[default]
    Legacy = 0,
    /// Key indication re-sent periodically
    Redundant = 1,
    /// Edge reports, unkey absorbed by a linger timer
    Linger = 2,
}

impl KeyProtocol {
    pub fn sentinel(self) -> Option<&'static str> {
        match self {
            KeyProtocol::Legacy => None,
            KeyProtocol::Redundant => Some(NEWKEY),
            KeyProtocol::Linger => Some(NEWKEY1),
        }
    }
}

/// Seconds-since-edge field of a `K` frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopKeySince {
    Query,
    Seconds(u64),
}

/// Where a message is headed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    /// Meaningful only to the adjacent node; never relayed
    LinkLocal,
    /// Consumed locally and relayed to every other peer
    Broadcast,
    /// Addressed to one node
    Node(&'a str),
}

/// One decoded control frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Disconnect,
    NewKey(KeyProtocol),
    Dtmf {
        cmd_node: String,
        src: String,
        dest: String,
        seq: u32,
        digit: char,
    },
    NodeList(String),
    Text {
        dest: String,
        src: String,
        text: String,
    },
    Telemetry {
        src: String,
        dest: String,
        payload: String,
    },
    ToneControl {
        src: String,
        group: String,
        directive: String,
    },
    TopKey {
        dest: String,
        src: String,
        seq: u32,
        since: TopKeySince,
    },
    Ident {
        src: String,
        payload: String,
    },
    Location {
        src: String,
        coords: String,
    },
}

impl Message {
    /// Decode one frame. Trailing NULs and line endings are ignored.
    pub fn parse(frame: &str) -> Result<Message, ProtocolError> {
        let line = frame.trim_end_matches(['\0', '\r', '\n']);
        if line.trim().is_empty() {
            return Err(ProtocolError::Empty);
        }

        match line {
            DISCONNECT => return Ok(Message::Disconnect),
            NEWKEY => return Ok(Message::NewKey(KeyProtocol::Redundant)),
            NEWKEY1 => return Ok(Message::NewKey(KeyProtocol::Linger)),
            _ => {}
        }

        let (opcode, rest) = match line.split_once(' ') {
            Some((op, rest)) => (op, rest),
            None => (line, ""),
        };
        let mut chars = opcode.chars();
        let op = match (chars.next(), chars.next()) {
            (Some(c), None) => c,
            _ => return Err(ProtocolError::UnknownOpcode(opcode.to_string())),
        };

        match op {
            'D' => {
                let f = exact(op, rest, 5)?;
                let digit = single_char("digit", f[4])?;
                Ok(Message::Dtmf {
                    cmd_node: f[0].to_string(),
                    src: f[1].to_string(),
                    dest: f[2].to_string(),
                    seq: number("sequence", f[3])?,
                    digit,
                })
            }
            'L' => Ok(Message::NodeList(rest.trim().to_string())),
            'M' => {
                let f = with_tail(op, rest, 3)?;
                Ok(Message::Text {
                    dest: f[0].to_string(),
                    src: f[1].to_string(),
                    text: f[2].to_string(),
                })
            }
            'T' => {
                let f = with_tail(op, rest, 3)?;
                Ok(Message::Telemetry {
                    src: f[0].to_string(),
                    dest: f[1].to_string(),
                    payload: f[2].to_string(),
                })
            }
            'C' => {
                let f = with_tail(op, rest, 3)?;
                Ok(Message::ToneControl {
                    src: f[0].to_string(),
                    group: f[1].to_string(),
                    directive: f[2].to_string(),
                })
            }
            'K' => {
                let f = exact(op, rest, 4)?;
                let since = match f[3] {
                    "?" => TopKeySince::Query,
                    secs => TopKeySince::Seconds(number("seconds", secs)?),
                };
                Ok(Message::TopKey {
                    dest: f[0].to_string(),
                    src: f[1].to_string(),
                    seq: number("sequence", f[2])?,
                    since,
                })
            }
            'I' => {
                let f = with_tail(op, rest, 2)?;
                Ok(Message::Ident {
                    src: f[0].to_string(),
                    payload: f[1].to_string(),
                })
            }
            'G' => {
                let f = with_tail(op, rest, 2)?;
                Ok(Message::Location {
                    src: f[0].to_string(),
                    coords: f[1].to_string(),
                })
            }
            _ => Err(ProtocolError::UnknownOpcode(opcode.to_string())),
        }
    }

    pub fn opcode(&self) -> Option<char> {
        match self {
            Message::Disconnect | Message::NewKey(_) => None,
            Message::Dtmf { .. } => Some('D'),
            Message::NodeList(_) => Some('L'),
            Message::Text { .. } => Some('M'),
            Message::Telemetry { .. } => Some('T'),
            Message::ToneControl { .. } => Some('C'),
            Message::TopKey { .. } => Some('K'),
            Message::Ident { .. } => Some('I'),
            Message::Location { .. } => Some('G'),
        }
    }

    /// Declared originating node, if the frame carries one
    pub fn source(&self) -> Option<&str> {
        match self {
            Message::Disconnect | Message::NewKey(_) | Message::NodeList(_) => None,
            Message::Dtmf { src, .. }
            | Message::Text { src, .. }
            | Message::Telemetry { src, .. }
            | Message::ToneControl { src, .. }
            | Message::TopKey { src, .. }
            | Message::Ident { src, .. }
            | Message::Location { src, .. } => Some(src),
        }
    }

    pub fn route(&self) -> Route<'_> {
        let dest = match self {
            Message::Disconnect | Message::NewKey(_) | Message::NodeList(_) => {
                return Route::LinkLocal
            }
            Message::ToneControl { .. } | Message::Ident { .. } | Message::Location { .. } => {
                return Route::Broadcast
            }
            Message::Dtmf { dest, .. }
            | Message::Text { dest, .. }
            | Message::Telemetry { dest, .. }
            | Message::TopKey { dest, .. } => dest.as_str(),
        };
        if dest == BROADCAST {
            Route::Broadcast
        } else {
            Route::Node(dest)
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Disconnect => f.write_str(DISCONNECT),
            Message::NewKey(level) => f.write_str(level.sentinel().unwrap_or(NEWKEY)),
            Message::Dtmf {
                cmd_node,
                src,
                dest,
                seq,
                digit,
            } => write!(f, "D {} {} {} {} {}", cmd_node, src, dest, seq, digit),
            Message::NodeList(list) if list.is_empty() => f.write_str("L"),
            Message::NodeList(list) => write!(f, "L {}", list),
            Message::Text { dest, src, text } => write!(f, "M {} {} {}", dest, src, text),
            Message::Telemetry { src, dest, payload } => {
                write!(f, "T {} {} {}", src, dest, payload)
            }
            Message::ToneControl {
                src,
                group,
                directive,
            } => write!(f, "C {} {} {}", src, group, directive),
            Message::TopKey {
                dest,
                src,
                seq,
                since,
            } => match since {
                TopKeySince::Query => write!(f, "K {} {} {} ?", dest, src, seq),
                TopKeySince::Seconds(secs) => write!(f, "K {} {} {} {}", dest, src, seq, secs),
            },
            Message::Ident { src, payload } => write!(f, "I {} {}", src, payload),
            Message::Location { src, coords } => write!(f, "G {} {}", src, coords),
        }
    }
}

/// Exactly `n` whitespace-separated fields
fn exact(op: char, rest: &str, n: usize) -> Result<Vec<&str>, ProtocolError> {
    let fields: Vec<&str> = rest.split_whitespace().collect();
    if fields.len() != n {
        return Err(ProtocolError::FieldCount {
            opcode: op,
            expected: n,
            got: fields.len(),
        });
    }
    Ok(fields)
}

/// `n - 1` single-token fields followed by a non-empty free-text tail
fn with_tail(op: char, rest: &str, n: usize) -> Result<Vec<&str>, ProtocolError> {
    let mut fields = Vec::with_capacity(n);
    let mut remainder = rest.trim_start();
    for _ in 0..n - 1 {
        match remainder.split_once(char::is_whitespace) {
            Some((field, tail)) if !field.is_empty() => {
                fields.push(field);
                remainder = tail.trim_start();
            }
            _ => {
                let got = fields.len() + usize::from(!remainder.is_empty());
                return Err(ProtocolError::FieldCount {
                    opcode: op,
                    expected: n,
                    got,
                });
            }
        }
    }
    let tail = remainder.trim_end();
    if tail.is_empty() {
        return Err(ProtocolError::FieldCount {
            opcode: op,
            expected: n,
            got: fields.len(),
        });
    }
    fields.push(tail);
    Ok(fields)
}

fn number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ProtocolError> {
    value.parse().map_err(|_| ProtocolError::InvalidField {
        field,
        value: value.to_string(),
    })
}

fn single_char(field: &'static str, value: &str) -> Result<char, ProtocolError> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(ProtocolError::InvalidField {
            field,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_sentinels() {
        assert_eq!(Message::parse("DISCONNECT"), Ok(Message::Disconnect));
        assert_eq!(
            Message::parse("!NEWKEY!"),
            Ok(Message::NewKey(KeyProtocol::Redundant))
        );
        assert_eq!(
            Message::parse("!NEWKEY1!\0"),
            Ok(Message::NewKey(KeyProtocol::Linger))
        );
    }

    #[test]
    fn test_parse_dtmf() {
        let msg = Message::parse("D 2001 2000 2001 17 *").unwrap();
        assert_eq!(
            msg,
            Message::Dtmf {
                cmd_node: "2001".into(),
                src: "2000".into(),
                dest: "2001".into(),
                seq: 17,
                digit: '*',
            }
        );
        assert_eq!(msg.route(), Route::Node("2001"));
        assert_eq!(msg.source(), Some("2000"));
    }

    #[test]
    fn test_parse_text_keeps_spaces() {
        let msg = Message::parse("M 0 2000 net starts  in 5 minutes").unwrap();
        match &msg {
            Message::Text { dest, src, text } => {
                assert_eq!(dest, "0");
                assert_eq!(src, "2000");
                assert_eq!(text, "net starts  in 5 minutes");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(msg.route(), Route::Broadcast);
        assert_eq!(msg.to_string(), "M 0 2000 net starts  in 5 minutes");
    }

    #[test]
    fn test_parse_topkey_query() {
        let msg = Message::parse("K 2001 2000 3 ?").unwrap();
        assert!(matches!(
            msg,
            Message::TopKey {
                since: TopKeySince::Query,
                seq: 3,
                ..
            }
        ));
        assert_eq!(msg.to_string(), "K 2001 2000 3 ?");
    }

    #[test]
    fn test_node_list_may_be_empty() {
        assert_eq!(Message::parse("L"), Ok(Message::NodeList(String::new())));
        assert_eq!(Message::NodeList(String::new()).to_string(), "L");
        assert_eq!(
            Message::parse("L T2001,R2002"),
            Ok(Message::NodeList("T2001,R2002".into()))
        );
    }

    #[test]
    fn test_broadcast_only_opcodes() {
        for frame in ["C 2000 5 on", "I 2000 WB6NIL/R", "G 2000 37.1N 121.9W"] {
            let msg = Message::parse(frame).unwrap();
            assert_eq!(msg.route(), Route::Broadcast, "{}", frame);
            assert_eq!(msg.source(), Some("2000"));
        }
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!(Message::parse(""), Err(ProtocolError::Empty));
        assert!(matches!(
            Message::parse("X 1 2 3"),
            Err(ProtocolError::UnknownOpcode(_))
        ));
        assert!(matches!(
            Message::parse("DD 1 2 3"),
            Err(ProtocolError::UnknownOpcode(_))
        ));
        assert!(matches!(
            Message::parse("D 2001 2000 2001 17"),
            Err(ProtocolError::FieldCount {
                opcode: 'D',
                expected: 5,
                got: 4
            })
        ));
        assert!(matches!(
            Message::parse("D 2001 2000 2001 seventeen 5"),
            Err(ProtocolError::InvalidField { field: "sequence", .. })
        ));
        assert!(matches!(
            Message::parse("D 2001 2000 2001 1 55"),
            Err(ProtocolError::InvalidField { field: "digit", .. })
        ));
        assert!(matches!(
            Message::parse("M 0 2000"),
            Err(ProtocolError::FieldCount { opcode: 'M', .. })
        ));
        assert!(matches!(
            Message::parse("K 2001 2000 3 soon"),
            Err(ProtocolError::InvalidField { field: "seconds", .. })
        ));
    }

    #[test]
    fn test_capability_ordering() {
        assert!(KeyProtocol::Legacy < KeyProtocol::Redundant);
        assert!(KeyProtocol::Redundant < KeyProtocol::Linger);
        assert_eq!(KeyProtocol::Legacy.sentinel(), None);
    }

    proptest! {
        #[test]
        fn parse_never_panics(frame in "\\PC{0,80}") {
            let _ = Message::parse(&frame);
        }

        #[test]
        fn parsed_messages_reserialize_to_valid_frames(frame in "[DLMTCKIG] [a-z0-9 ?*]{0,40}") {
            if let Ok(msg) = Message::parse(&frame) {
                let again = Message::parse(&msg.to_string());
                prop_assert_eq!(again, Ok(msg));
            }
        }
    }
}
