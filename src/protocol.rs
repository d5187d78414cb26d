//! Chat text protocol.
//!
//! Classifies a decoded inbound message:
//! - Chat: anything not starting with `/`, relayed to every other client
//! - Command: `/`-prefixed text, whitespace-delimited tokens
//!
//! The only recognised command is `/nick <name>`.

/// Reply queued for the sender of any command other than `/nick`.
pub const UNSUPPORTED_REPLY: &[u8] = b"Unsupported command\n";

const COMMAND_PREFIX: char = '/';
const NICK_COMMAND: &str = "/nick";

/// Parsed inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<'a> {
    /// Plain chat text, relayed unmodified
    Chat,

    /// Well-formed rename: `/nick <name>`
    Nick(&'a str),

    /// `/nick` with zero or more than one argument; ignored
    MalformedNick,

    /// Any other `/`-prefixed text
    Unsupported(&'a str),
}

/// Classify one decoded message.
pub fn parse(text: &str) -> Message<'_> {
    if !text.starts_with(COMMAND_PREFIX) {
        return Message::Chat;
    }

    let mut tokens = text.split_whitespace();
    // A leading '/' guarantees at least one token
    let command = tokens.next().unwrap_or_default();
    if command != NICK_COMMAND {
        return Message::Unsupported(command);
    }

    match (tokens.next(), tokens.next()) {
        (Some(name), None) => Message::Nick(name),
        _ => Message::MalformedNick,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat() {
        assert_eq!(parse("hello\n"), Message::Chat);
        assert_eq!(parse(" /nick bob\n"), Message::Chat);
        assert_eq!(parse("\n"), Message::Chat);
        assert_eq!(parse(""), Message::Chat);
    }

    #[test]
    fn test_parse_nick() {
        assert_eq!(parse("/nick alice\n"), Message::Nick("alice"));
        assert_eq!(parse("/nick\talice  \r\n"), Message::Nick("alice"));
    }

    #[test]
    fn test_parse_malformed_nick() {
        assert_eq!(parse("/nick\n"), Message::MalformedNick);
        assert_eq!(parse("/nick"), Message::MalformedNick);
        assert_eq!(parse("/nick alice bob\n"), Message::MalformedNick);
    }

    #[test]
    fn test_parse_unsupported() {
        assert_eq!(parse("/quit\n"), Message::Unsupported("/quit"));
        assert_eq!(parse("/nickname bob"), Message::Unsupported("/nickname"));
        assert_eq!(parse("/\n"), Message::Unsupported("/"));
        assert_eq!(parse("/ nick bob"), Message::Unsupported("/"));
    }
}
