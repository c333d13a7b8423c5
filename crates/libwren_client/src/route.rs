//! Message-target routing: which buffer a message is displayed in, and the display tags attached
//! to it.

use libwren_common::{ChanName, Notify};

use std::collections::HashMap;

/// Where the user asked a kind of message to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSpec {
    /// Drop to the core buffer, outside any IRC buffer.
    Core,
    /// The server's root buffer.
    Server,
    /// The currently focused buffer, when it belongs to this server.
    Current,
    /// The private-conversation buffer of the source nick.
    Private,
}

/// Where `BufferSpec::Private` goes when no private buffer exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrivateFallback {
    #[default]
    Server,
    Current,
}

/// The resolved display buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Core,
    Server,
    Current,
    Private(String),
    Chan(ChanName),
}

/// The per-message routing table: keys are `<server>.<message>` or `<message>`, where message is
/// a command name, a numeric, or an alias like `whois`.
#[derive(Debug, Clone, Default)]
pub struct Router {
    pub targets: HashMap<String, BufferSpec>,
    pub private_fallback: PrivateFallback,
}

impl Router {
    fn spec_for(&self, server_name: &str, message: &str) -> Option<BufferSpec> {
        self.targets
            .get(&format!("{}.{}", server_name, message))
            .or_else(|| self.targets.get(message))
            .copied()
    }

    /// Resolves the display buffer for a message.
    ///
    /// `message` is the command/numeric, `alias` an optional friendlier name tried second (e.g.
    /// `311` has alias `whois`). `nick` is the source nick, used for private routing;
    /// `has_private_buffer` tells whether a conversation with that nick is already open.
    pub fn target_for(
        &self,
        server_name: &str,
        message: &str,
        alias: Option<&str>,
        nick: Option<&str>,
        has_private_buffer: impl Fn(&str) -> bool,
    ) -> Target {
        let spec = self
            .spec_for(server_name, message)
            .or_else(|| alias.and_then(|alias| self.spec_for(server_name, alias)));

        match spec {
            None => Target::Server,
            Some(BufferSpec::Core) => Target::Core,
            Some(BufferSpec::Server) => Target::Server,
            Some(BufferSpec::Current) => Target::Current,
            Some(BufferSpec::Private) => match nick {
                Some(nick) if has_private_buffer(nick) => Target::Private(nick.to_owned()),
                _ => match self.private_fallback {
                    PrivateFallback::Server => Target::Server,
                    PrivateFallback::Current => Target::Current,
                },
            },
        }
    }
}

/// Display tags attached to a delivered message.
pub fn message_tags(
    command: &str,
    numeric: bool,
    irc_tags: &[(String, Option<String>)],
    self_msg: bool,
    notify: Notify,
    no_highlight: bool,
) -> Vec<String> {
    let mut tags = Vec::with_capacity(irc_tags.len() + 4);

    tags.push(format!("irc_{}", command.to_lowercase()));
    if numeric {
        tags.push("irc_numeric".to_owned());
    }

    for (key, value) in irc_tags {
        match value {
            None => tags.push(format!("irc_tag_{}", escape_tag(key))),
            Some(value) => tags.push(format!(
                "irc_tag_{}_{}",
                escape_tag(key),
                escape_tag(value)
            )),
        }
    }

    if self_msg {
        tags.push("self_msg".to_owned());
    }

    tags.push(
        match notify {
            Notify::None => "notify_none",
            Notify::Message => "notify_message",
            Notify::Private => "notify_private",
            Notify::Highlight => "notify_highlight",
        }
        .to_owned(),
    );

    if no_highlight {
        tags.push("no_highlight".to_owned());
    }

    tags
}

// Display tags are comma-separated downstream; spaces, commas and semicolons cannot survive.
fn escape_tag(s: &str) -> String {
    s.replace([' ', ',', ';'], "_")
}

/// Does `msg` mention `nick` as a word of its own? Used for highlight decisions.
pub fn contains_nick(msg: &str, nick: &str) -> bool {
    if nick.is_empty() {
        return false;
    }
    let mut rest = msg;
    let mut offset = 0;
    while let Some(idx) = rest.to_lowercase().find(&nick.to_lowercase()) {
        let start = offset + idx;
        let end = start + nick.len();
        let before_ok = msg[..start]
            .chars()
            .next_back()
            .map(|c| !c.is_alphanumeric() && c != '_')
            .unwrap_or(true);
        let after_ok = msg[end..]
            .chars()
            .next()
            .map(|c| !c.is_alphanumeric() && c != '_')
            .unwrap_or(true);
        if before_ok && after_ok {
            return true;
        }
        match rest.get(idx + nick.len()..) {
            Some(r) => {
                offset = end;
                rest = r;
            }
            None => break,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_private(_: &str) -> bool {
        false
    }

    #[test]
    fn default_target_is_server() {
        let router = Router::default();
        assert_eq!(
            router.target_for("srv", "invite", None, None, no_private),
            Target::Server
        );
    }

    #[test]
    fn server_scoped_spec_wins() {
        let mut router = Router::default();
        router.targets.insert("whois".to_owned(), BufferSpec::Current);
        router
            .targets
            .insert("srv.whois".to_owned(), BufferSpec::Core);

        assert_eq!(
            router.target_for("srv", "311", Some("whois"), None, no_private),
            Target::Core
        );
        assert_eq!(
            router.target_for("other", "311", Some("whois"), None, no_private),
            Target::Current
        );
    }

    #[test]
    fn private_with_fallback() {
        let mut router = Router::default();
        router.targets.insert("notice".to_owned(), BufferSpec::Private);

        // a private buffer exists
        assert_eq!(
            router.target_for("srv", "notice", None, Some("bob"), |nick| nick == "bob"),
            Target::Private("bob".to_owned())
        );

        // none exists: fall back to the server buffer
        assert_eq!(
            router.target_for("srv", "notice", None, Some("eve"), no_private),
            Target::Server
        );

        router.private_fallback = PrivateFallback::Current;
        assert_eq!(
            router.target_for("srv", "notice", None, Some("eve"), no_private),
            Target::Current
        );
    }

    #[test]
    fn tags_for_numeric() {
        let tags = message_tags("324", true, &[], false, Notify::None, false);
        assert!(tags.contains(&"irc_324".to_owned()));
        assert!(tags.contains(&"irc_numeric".to_owned()));
        assert!(tags.contains(&"notify_none".to_owned()));
    }

    #[test]
    fn tags_for_privmsg() {
        let irc_tags = vec![(
            "msgid".to_owned(),
            Some("abc; def".to_owned()),
        )];
        let tags = message_tags("PRIVMSG", false, &irc_tags, true, Notify::Message, true);
        assert!(tags.contains(&"irc_privmsg".to_owned()));
        assert!(tags.contains(&"irc_tag_msgid_abc__def".to_owned()));
        assert!(tags.contains(&"self_msg".to_owned()));
        assert!(tags.contains(&"notify_message".to_owned()));
        assert!(tags.contains(&"no_highlight".to_owned()));
    }

    #[test]
    fn nick_mention() {
        assert!(contains_nick("wren: hi", "wren"));
        assert!(contains_nick("hey WREN!", "wren"));
        assert!(!contains_nick("wrennish things", "wren"));
        assert!(!contains_nick("no mention here", "wren"));
        assert!(!contains_nick("", "wren"));
    }
}
