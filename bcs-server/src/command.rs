//! Command-mode vocabulary and message-kind tags.
//!
//! A client switches a line into command mode by sending a tab while its
//! inbound queue is empty. The next line is matched against [`COMMANDS`] in
//! table order; the first hit wins and anything else is an unknown command.

/// Routing class of a pending message.
///
/// Non-normal kinds are recorded in the session's inbound queue as a tab
/// followed by the tag byte, ahead of the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Normal,
    NbMsg,
    MsgAll,
    Tell,
    Channels,
    Bci,
}

impl MessageKind {
    pub fn tag(self) -> u8 {
        match self {
            Self::Normal => 1,
            Self::NbMsg => 2,
            Self::MsgAll => 3,
            Self::Tell => 4,
            Self::Channels => 5,
            Self::Bci => 6,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Normal),
            2 => Some(Self::NbMsg),
            3 => Some(Self::MsgAll),
            4 => Some(Self::Tell),
            5 => Some(Self::Channels),
            6 => Some(Self::Bci),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Tag the next line.
    Tag(MessageKind),
    /// Reply with the netbot roster.
    NbNames,
    /// Reply with the human-readable roster.
    Names,
    Disconnect,
    LocalEcho,
    Pong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Match {
    Exact,
    Prefix,
}

/// Lookup table in dispatch order.
const COMMANDS: &[(&str, Match, CommandKind)] = &[
    ("NBMSG", Match::Exact, CommandKind::Tag(MessageKind::NbMsg)),
    ("BCI", Match::Exact, CommandKind::Tag(MessageKind::Bci)),
    ("NBNAMES", Match::Exact, CommandKind::NbNames),
    ("NAMES", Match::Exact, CommandKind::Names),
    ("DISCONNECT", Match::Exact, CommandKind::Disconnect),
    ("MSGALL", Match::Exact, CommandKind::Tag(MessageKind::MsgAll)),
    ("TELL", Match::Exact, CommandKind::Tag(MessageKind::Tell)),
    ("CHANNELS", Match::Exact, CommandKind::Tag(MessageKind::Channels)),
    ("LOCALECHO", Match::Prefix, CommandKind::LocalEcho),
    ("PONG", Match::Exact, CommandKind::Pong),
];

/// Case-sensitive lookup of a full command line.
pub fn lookup(line: &[u8]) -> Option<CommandKind> {
    COMMANDS.iter().find_map(|&(word, mode, kind)| {
        let hit = match mode {
            Match::Exact => line == word.as_bytes(),
            Match::Prefix => line.starts_with(word.as_bytes()),
        };
        hit.then_some(kind)
    })
}

/// `LOCALECHO 1` turns echo on; any other argument turns it off.
pub fn local_echo_requested(line: &[u8]) -> bool {
    line.get(10) == Some(&b'1')
}
