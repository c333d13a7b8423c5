#![allow(clippy::write_with_newline)]

//! IRC wire protocol message parsers and generators.
//!
//! This library is for implementing clients rather than servers or services, and does not support
//! the IRC message format in full generality. Inbound frames are reassembled by [`MsgBuffer`],
//! parsed into [`Msg`] values; outbound messages are built with the free functions at the top of
//! the crate (all of which append the trailing `"\r\n"`).

pub mod tags;

mod framer;

pub use framer::{MsgBuffer, MAX_FRAME_LEN};

use libwren_common::ChanName;

use std::fmt;

pub fn pass(pass: &str) -> String {
    format!("PASS {}\r\n", pass)
}

pub fn quit(reason: Option<&str>) -> String {
    match reason {
        None => "QUIT\r\n".to_string(),
        Some(reason) => format!("QUIT :{}\r\n", reason),
    }
}

pub fn user(username: &str, realname: &str) -> String {
    format!("USER {} 0 * :{}\r\n", username, realname)
}

pub fn nick(arg: &str) -> String {
    format!("NICK {}\r\n", arg)
}

pub fn ping(arg: &str) -> String {
    format!("PING :{}\r\n", arg)
}

pub fn pong(arg: &str) -> String {
    format!("PONG :{}\r\n", arg)
}

/// `JOIN` for a list of channels, with optional keys. Channels with keys must come first, as keys
/// are matched to channels positionally.
pub fn join(chans: &str, keys: Option<&str>) -> String {
    match keys {
        None => format!("JOIN {}\r\n", chans),
        Some(keys) => format!("JOIN {} {}\r\n", chans, keys),
    }
}

pub fn part(chan: &str, reason: Option<&str>) -> String {
    match reason {
        None => format!("PART {}\r\n", chan),
        Some(reason) => format!("PART {} :{}\r\n", chan, reason),
    }
}

pub fn kick(chan: &str, nick: &str, reason: Option<&str>) -> String {
    match reason {
        None => format!("KICK {} {}\r\n", chan, nick),
        Some(reason) => format!("KICK {} {} :{}\r\n", chan, nick, reason),
    }
}

pub fn topic(chan: &str, new_topic: Option<&str>) -> String {
    match new_topic {
        None => format!("TOPIC {}\r\n", chan),
        Some(t) => format!("TOPIC {} :{}\r\n", chan, t),
    }
}

pub fn mode(target: &str, modes_args: &str) -> String {
    if modes_args.is_empty() {
        format!("MODE {}\r\n", target)
    } else {
        format!("MODE {} {}\r\n", target, modes_args)
    }
}

pub fn invite(nick: &str, chan: &str) -> String {
    format!("INVITE {} {}\r\n", nick, chan)
}

pub fn privmsg(msgtarget: &str, msg: &str) -> String {
    // IRC messages need to be shorter than 512 bytes (see RFC 1459 or 2812). This should be dealt
    // with at call sites as we can't show how we split messages into multiple messages at this
    // point.
    assert!(msgtarget.len() + msg.len() + 12 <= 512);
    format!("PRIVMSG {} :{}\r\n", msgtarget, msg)
}

pub fn notice(msgtarget: &str, msg: &str) -> String {
    assert!(msgtarget.len() + msg.len() + 11 <= 512);
    format!("NOTICE {} :{}\r\n", msgtarget, msg)
}

pub fn action(msgtarget: &str, msg: &str) -> String {
    assert!(msgtarget.len() + msg.len() + 21 <= 512); // See comments in `privmsg`
    format!("PRIVMSG {} :\x01ACTION {}\x01\r\n", msgtarget, msg)
}

/// A CTCP request. `ty` must already be sanitized (no `\x01` byte).
pub fn ctcp_request(msgtarget: &str, ty: &str, args: Option<&str>) -> String {
    match args {
        None => format!("PRIVMSG {} :\x01{}\x01\r\n", msgtarget, ty),
        Some(args) => format!("PRIVMSG {} :\x01{} {}\x01\r\n", msgtarget, ty, args),
    }
}

/// A CTCP reply. `ty` must already be sanitized (no `\x01` byte).
pub fn ctcp_reply(msgtarget: &str, ty: &str, args: Option<&str>) -> String {
    match args {
        None => format!("NOTICE {} :\x01{}\x01\r\n", msgtarget, ty),
        Some(args) => format!("NOTICE {} :\x01{} {}\x01\r\n", msgtarget, ty, args),
    }
}

pub fn away(msg: Option<&str>) -> String {
    match msg {
        None => "AWAY\r\n".to_string(),
        Some(msg) => format!("AWAY :{}\r\n", msg),
    }
}

pub fn whois(nick: &str) -> String {
    format!("WHOIS {}\r\n", nick)
}

pub fn whowas(nick: &str) -> String {
    format!("WHOWAS {}\r\n", nick)
}

pub fn who(mask: &str) -> String {
    format!("WHO {}\r\n", mask)
}

pub fn names(chan: &str) -> String {
    format!("NAMES {}\r\n", chan)
}

pub fn list(args: Option<&str>) -> String {
    match args {
        None => "LIST\r\n".to_string(),
        Some(args) => format!("LIST {}\r\n", args),
    }
}

pub fn cap_ls() -> String {
    // The version suffix is advisory; old servers answer with a single-line `CAP LS` reply and we
    // accept both shapes.
    "CAP LS 302\r\n".to_string()
}

pub fn cap_req(cap_identifiers: &[&str]) -> String {
    format!("CAP REQ :{}\r\n", cap_identifiers.join(" "))
}

pub fn cap_end() -> String {
    "CAP END\r\n".to_string()
}

pub fn authenticate(msg: &str) -> String {
    format!("AUTHENTICATE {}\r\n", msg)
}

/// Sender of a message ("prefix" in the RFC). We parse the prefix part of the message according to
/// the RFC because users of this library sometimes need to distinguish a server from a user: a
/// PRIVMSG coming from a server is routed to the server buffer, one from a user to a private
/// buffer.
///
/// (Note that the ambiguity in the RFC makes this a best-effort thing. When we get a PRIVMSG from
/// e.g. "foo" it's not possible to know whether "foo" is a server or a user.)
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Pfx {
    /// Sender is a server.
    Server(String),

    /// Sender is a nick.
    User {
        /// Nick of the sender
        nick: String,
        /// `user@host` part
        user: String,
    },

    /// Sender could be a server or a nick, it's unclear. According to the RFC if we have something
    /// like "localhost" which doesn't have '!', '@', or a character that 'servername' can have but
    /// 'nickname' cannot, we can't tell whether the sender is a server or a nick.
    Ambiguous(String),
}

impl Pfx {
    /// Nick of the sender, when the sender can be a user. Ambiguous prefixes are interpreted as
    /// nicks; some bouncers relay user messages with a bare-nick prefix.
    pub fn nick(&self) -> Option<&str> {
        match self {
            Pfx::User { nick, .. } | Pfx::Ambiguous(nick) => Some(nick),
            Pfx::Server(_) => None,
        }
    }

    /// `nick!user@host` rendering, as used for modelist setters.
    pub fn host(&self) -> String {
        match self {
            Pfx::Server(s) | Pfx::Ambiguous(s) => s.clone(),
            Pfx::User { nick, user } if user.is_empty() => nick.clone(),
            Pfx::User { nick, user } => format!("{}!{}", nick, user),
        }
    }
}

// RFC 2812 section 2.3.1
fn parse_pfx(pfx: &str) -> Pfx {
    match pfx.find(['!', '@']) {
        Some(idx) => Pfx::User {
            nick: pfx[0..idx].to_owned(),
            user: pfx[idx + 1..].to_owned(),
        },
        None => {
            // Chars that nicks can have but servernames cannot
            match pfx.find(['[', ']', '\\', '`', '_', '^', '{', '|', '}']) {
                Some(_) => Pfx::User {
                    nick: pfx.to_owned(),
                    user: "".to_owned(),
                },
                None => {
                    // Nicks can't have '.'
                    match pfx.find('.') {
                        Some(_) => Pfx::Server(pfx.to_owned()),
                        None => Pfx::Ambiguous(pfx.to_owned()),
                    }
                }
            }
        }
    }
}

/// Target of a message
///
/// Masks are not parsed, as rules for masks are not clear in RFC 2812 (for example, `#x.y` can be
/// a channel name or a host mask, there is no way to disambiguate), and in practice servers use
/// masks that are not valid according to the RFC. The rule we follow is: if a target starts with
/// one of the server's channel-type characters (here the RFC set, re-checked by the client against
/// CHANTYPES) it's a `Chan`, otherwise it's a `User`.
#[derive(Debug, PartialEq, Eq)]
pub enum MsgTarget {
    Chan(ChanName),
    User(String),
}

impl MsgTarget {
    pub fn display(&self) -> &str {
        match self {
            MsgTarget::Chan(chan) => chan.display(),
            MsgTarget::User(nick) => nick,
        }
    }
}

/// An IRC message
#[derive(Debug, PartialEq, Eq)]
pub struct Msg {
    /// IRCv3 message tags, in wire order, values unescaped. Empty when the frame had no tag
    /// section.
    pub tags: Vec<(String, Option<String>)>,

    /// Sender of the message. According to RFC 2812 it's optional:
    ///
    /// > If the prefix is missing from the message, it is assumed to have originated from the
    /// > connection from which it was received from.
    pub pfx: Option<Pfx>,

    pub cmd: Cmd,
}

impl Msg {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Timestamp of the message in `(seconds, microseconds)` since the epoch, from the
    /// server-time `@time=` tag when present. `None` means "use the local clock".
    pub fn time(&self) -> Option<(i64, u32)> {
        self.tag("time").and_then(tags::parse_server_time)
    }
}

/// A client-to-client protocol message. See <https://defs.ircdocs.horse/defs/ctcp.html>
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum CTCP {
    Action,
    Version,
    Ping,
    Dcc,
    Other(String),
}

impl CTCP {
    fn parse(s: &str) -> CTCP {
        if s.eq_ignore_ascii_case("ACTION") {
            CTCP::Action
        } else if s.eq_ignore_ascii_case("VERSION") {
            CTCP::Version
        } else if s.eq_ignore_ascii_case("PING") {
            CTCP::Ping
        } else if s.eq_ignore_ascii_case("DCC") {
            CTCP::Dcc
        } else {
            CTCP::Other(s.to_owned())
        }
    }

    pub fn type_str(&self) -> &str {
        match self {
            CTCP::Action => "ACTION",
            CTCP::Version => "VERSION",
            CTCP::Ping => "PING",
            CTCP::Dcc => "DCC",
            CTCP::Other(s) => s,
        }
    }
}

/// An IRC command or reply
#[derive(Debug, PartialEq, Eq)]
pub enum Cmd {
    /// A PRIVMSG or NOTICE. Check `is_notice` field. When the body was CTCP-wrapped, `ctcp` holds
    /// the type and `msg` the arguments after it.
    PRIVMSG {
        target: MsgTarget,
        msg: String,
        is_notice: bool,
        ctcp: Option<CTCP>,
    },

    JOIN {
        chan: ChanName,
    },

    PART {
        chan: ChanName,
        msg: Option<String>,
    },

    QUIT {
        msg: Option<String>,
        /// Channels of the user that just quit. This is not a part of the IRC message, but
        /// something the client fills in for consumers before forwarding the event.
        chans: Vec<ChanName>,
    },

    NICK {
        nick: String,
        /// Channels of the user, filled in by the client like `QUIT.chans`.
        chans: Vec<ChanName>,
    },

    KICK {
        chan: ChanName,
        nick: String,
        msg: Option<String>,
    },

    TOPIC {
        chan: ChanName,
        topic: String,
    },

    MODE {
        target: String,
        modes: String,
        params: Vec<String>,
        /// Whether the change is eligible for smart-filter display suppression. Not part of the
        /// IRC message; the client fills it in before forwarding the event.
        smart_filtered: bool,
    },

    INVITE {
        nick: String,
        chan: ChanName,
    },

    ACCOUNT {
        /// `None` for `ACCOUNT *` (logged out).
        account: Option<String>,
    },

    AWAY {
        msg: Option<String>,
    },

    WALLOPS {
        msg: String,
    },

    PING {
        server: String,
    },

    PONG {
        params: Vec<String>,
    },

    ERROR {
        msg: String,
    },

    CAP {
        client: String,
        subcommand: String,
        params: Vec<String>,
    },

    AUTHENTICATE {
        param: String,
    },

    /// An IRC message other than the ones listed above.
    Other {
        cmd: String,
        params: Vec<String>,
    },

    /// Numeric replies are kept generic as there are just too many replies; the client handles
    /// the subset it needs by number.
    Reply {
        num: u16,
        params: Vec<String>,
    },
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// The frame is blank, or ends after the tag/prefix sections.
    NoCommand,
    /// The frame exceeds [`MAX_FRAME_LEN`].
    TooLong { len: usize },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::NoCommand => write!(f, "message without a command"),
            ParseError::TooLong { len } => {
                write!(f, "frame of {} bytes exceeds {} byte limit", len, MAX_FRAME_LEN)
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// An intermediate type used during parsing.
enum MsgType<'a> {
    Cmd(&'a str),
    Num(u16),
}

/// Parses one frame, without its CR/LF terminator.
pub fn parse_one_message(mut msg: &str) -> Result<Msg, ParseError> {
    // Servers are not supposed to send leading whitespace, but bouncers have been seen doing it.
    msg = msg.trim_start_matches(' ');

    let tags: Vec<(String, Option<String>)> = {
        if let Some(rest) = msg.strip_prefix('@') {
            let ws_idx = rest.find(' ').ok_or(ParseError::NoCommand)?;
            let tag_section = &rest[..ws_idx];
            msg = rest[ws_idx + 1..].trim_start_matches(' ');
            tags::parse_tags(tag_section)
        } else {
            Vec::new()
        }
    };

    let pfx: Option<Pfx> = {
        if let Some(rest) = msg.strip_prefix(':') {
            let ws_idx = rest.find(' ').ok_or(ParseError::NoCommand)?;
            let pfx = &rest[..ws_idx];
            msg = rest[ws_idx + 1..].trim_start_matches(' ');
            Some(parse_pfx(pfx))
        } else {
            None
        }
    };

    let msg_ty: MsgType = {
        let cmd = match msg.find(' ') {
            Some(ws_idx) => {
                let cmd = &msg[..ws_idx];
                msg = &msg[ws_idx + 1..];
                cmd
            }
            None => {
                let cmd = msg;
                msg = "";
                cmd
            }
        };
        if cmd.is_empty() {
            return Err(ParseError::NoCommand);
        }
        match cmd.parse::<u16>() {
            Ok(num) => MsgType::Num(num),
            Err(_) => MsgType::Cmd(cmd),
        }
    };

    let params = parse_params(msg);
    let cmd = match msg_ty {
        MsgType::Cmd(cmd_) if cmd_.eq_ignore_ascii_case("PRIVMSG") || cmd_.eq_ignore_ascii_case("NOTICE") => {
            if params.len() != 2 {
                return Ok(Msg {
                    tags,
                    pfx,
                    cmd: Cmd::Other {
                        cmd: cmd_.to_owned(),
                        params: params.into_iter().map(str::to_owned).collect(),
                    },
                });
            }
            let is_notice = cmd_.eq_ignore_ascii_case("NOTICE");
            let target = params[0];
            let mut msg = params[1];
            let target = if target.starts_with(['#', '&', '+', '!']) {
                MsgTarget::Chan(ChanName::new(target.to_owned()))
            } else {
                MsgTarget::User(target.to_owned())
            };

            // CTCP extraction: at most one pair of \x01 is stripped. Some software splits
            // messages incorrectly, so a missing closing delimiter is tolerated.
            let mut ctcp: Option<CTCP> = None;
            if !msg.is_empty() && msg.as_bytes()[0] == 0x01 {
                msg = &msg[1..];
                for (byte_idx, byte) in msg.as_bytes().iter().enumerate() {
                    if *byte == 0x01 {
                        let ctcp_type = &msg[0..byte_idx];
                        ctcp = Some(CTCP::parse(ctcp_type));
                        msg = &msg[byte_idx + 1..];
                        break;
                    } else if *byte == b' ' {
                        let ctcp_type = &msg[0..byte_idx];
                        ctcp = Some(CTCP::parse(ctcp_type));
                        msg = &msg[byte_idx + 1..];
                        if !msg.is_empty() && msg.as_bytes()[msg.len() - 1] == 0x01 {
                            msg = &msg[..msg.len() - 1];
                        }
                        break;
                    }
                }
                if ctcp.is_none() {
                    // \x01TYPE with no space and no closing delimiter
                    ctcp = Some(CTCP::parse(msg));
                    msg = "";
                }
            }

            Cmd::PRIVMSG {
                target,
                msg: msg.to_owned(),
                is_notice,
                ctcp,
            }
        }
        // extended-join adds account and realname params; the channel is always first
        MsgType::Cmd("JOIN") if !params.is_empty() => Cmd::JOIN {
            chan: ChanName::new(params[0].to_owned()),
        },
        MsgType::Cmd("PART") if params.len() == 1 || params.len() == 2 => Cmd::PART {
            chan: ChanName::new(params[0].to_owned()),
            msg: params.get(1).map(|s| (*s).to_owned()),
        },
        MsgType::Cmd("QUIT") if params.len() <= 1 => Cmd::QUIT {
            msg: params.first().map(|s| (*s).to_owned()),
            chans: Vec::new(),
        },
        MsgType::Cmd("NICK") if params.len() == 1 => Cmd::NICK {
            nick: params[0].to_owned(),
            chans: Vec::new(),
        },
        MsgType::Cmd("KICK") if params.len() == 2 || params.len() == 3 => Cmd::KICK {
            chan: ChanName::new(params[0].to_owned()),
            nick: params[1].to_owned(),
            msg: params.get(2).map(|s| (*s).to_owned()),
        },
        MsgType::Cmd("TOPIC") if params.len() == 2 => Cmd::TOPIC {
            chan: ChanName::new(params[0].to_owned()),
            topic: params[1].to_owned(),
        },
        MsgType::Cmd("MODE") if params.len() >= 2 => Cmd::MODE {
            target: params[0].to_owned(),
            modes: params[1].to_owned(),
            params: params[2..].iter().map(|s| (*s).to_owned()).collect(),
            smart_filtered: false,
        },
        MsgType::Cmd("INVITE") if params.len() == 2 => Cmd::INVITE {
            nick: params[0].to_owned(),
            chan: ChanName::new(params[1].to_owned()),
        },
        MsgType::Cmd("ACCOUNT") if params.len() == 1 => Cmd::ACCOUNT {
            account: if params[0] == "*" {
                None
            } else {
                Some(params[0].to_owned())
            },
        },
        MsgType::Cmd("AWAY") => Cmd::AWAY {
            msg: params.first().map(|s| (*s).to_owned()),
        },
        MsgType::Cmd("WALLOPS") if params.len() == 1 => Cmd::WALLOPS {
            msg: params[0].to_owned(),
        },
        MsgType::Cmd("PING") if !params.is_empty() => Cmd::PING {
            server: params[0].to_owned(),
        },
        MsgType::Cmd("PONG") if !params.is_empty() => Cmd::PONG {
            params: params.into_iter().map(str::to_owned).collect(),
        },
        MsgType::Cmd("ERROR") if params.len() == 1 => Cmd::ERROR {
            msg: params[0].to_owned(),
        },
        // Multiline `CAP LS * :...` replies put a `*` param before the caps; everything after the
        // subcommand is kept as-is for the client to interpret
        MsgType::Cmd("CAP") if params.len() >= 2 => Cmd::CAP {
            client: params[0].to_owned(),
            subcommand: params[1].to_owned(),
            params: params[2..].iter().map(|s| (*s).to_owned()).collect(),
        },
        MsgType::Cmd("AUTHENTICATE") if params.len() == 1 => Cmd::AUTHENTICATE {
            param: params[0].to_owned(),
        },
        MsgType::Num(n) => Cmd::Reply {
            num: n,
            params: params.into_iter().map(str::to_owned).collect(),
        },
        MsgType::Cmd(cmd) => Cmd::Other {
            cmd: cmd.to_owned(),
            params: params.into_iter().map(str::to_owned).collect(),
        },
    };

    Ok(Msg { tags, pfx, cmd })
}

fn parse_params(chrs: &str) -> Vec<&str> {
    // Spec:
    //
    //     params     =  *14( SPACE middle ) [ SPACE ":" trailing ]
    //                =/ 14( SPACE middle ) [ SPACE [ ":" ] trailing ]
    //
    //     nospcrlfcl =  %x01-09 / %x0B-0C / %x0E-1F / %x21-39 / %x3B-FF
    //                     ; any octet except NUL, CR, LF, " " and ":"
    //     middle     =  nospcrlfcl *( ":" / nospcrlfcl )
    //     trailing   =  *( ":" / " " / nospcrlfcl )

    let mut params = Vec::new();
    let mut char_indices = chrs.char_indices();

    while let Some((idx, c)) = char_indices.next() {
        if c == ':' {
            params.push(&chrs[idx + 1..]); // Skip ':'
            break;
        }

        if params.len() == 14 {
            params.push(&chrs[idx..]);
            break;
        }

        if c == ' ' {
            continue;
        }

        loop {
            match char_indices.next() {
                Some((idx_, c)) => {
                    if c == ' ' {
                        params.push(&chrs[idx..idx_]);
                        break;
                    }
                }
                None => {
                    params.push(&chrs[idx..]);
                    break;
                }
            }
        }
    }

    params
}

/// Nicks may have prefixes, indicating it is an operator, founder, or something else.
///
/// Channel Membership Prefixes: <http://modern.ircdocs.horse/#channel-membership-prefixes>
///
/// Returns the nick without prefix.
pub fn drop_nick_prefix(nick: &str) -> &str {
    static PREFIXES: [char; 5] = ['~', '&', '@', '%', '+'];

    if nick.starts_with(PREFIXES) {
        &nick[1..]
    } else {
        nick
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libwren_common::ChanNameRef;

    fn parse_buf(buf: &mut MsgBuffer) -> Vec<Result<Msg, ParseError>> {
        let mut ret = vec![];
        while let Some(msg) = buf.next_msg() {
            ret.push(msg);
        }
        ret
    }

    #[test]
    fn test_parse_params() {
        assert_eq!(parse_params("p1 p2 p3"), vec!["p1", "p2", "p3"]);
        let empty: Vec<&str> = vec![];
        assert_eq!(parse_params(""), empty);
        assert_eq!(parse_params(":foo bar baz "), vec!["foo bar baz "]);
        assert_eq!(parse_params(":"), vec![""]);
        assert_eq!(parse_params("x:"), vec!["x:"]);
        assert_eq!(parse_params("x:y:z"), vec!["x:y:z"]);
        assert_eq!(parse_params(":::::"), vec!["::::"]);

        let params = parse_params("1 2 3 4 5 6 7 8 9 10 11 12 13 14 blah blah blah");
        assert_eq!(params.len(), 15);
        assert_eq!(params[params.len() - 1], "blah blah blah");

        assert_eq!(parse_params("   "), empty);
        assert_eq!(parse_params("x y : : :"), vec!["x", "y", " : :"]);
        assert_eq!(parse_params("aaa://aaa"), vec!["aaa://aaa"]);
    }

    #[test]
    fn test_privmsg_parsing() {
        let mut buf = MsgBuffer::new();
        buf.push_bytes(b":nick!~nick@unaffiliated/nick PRIVMSG wren :a b c\r\n");
        assert_eq!(
            buf.next_msg().unwrap().unwrap(),
            Msg {
                tags: vec![],
                pfx: Some(Pfx::User {
                    nick: "nick".to_owned(),
                    user: "~nick@unaffiliated/nick".to_owned(),
                }),
                cmd: Cmd::PRIVMSG {
                    target: MsgTarget::User("wren".to_owned()),
                    msg: "a b c".to_owned(),
                    is_notice: false,
                    ctcp: None,
                },
            }
        );
        assert!(buf.next_msg().is_none());
    }

    #[test]
    fn test_notice_parsing() {
        let mut buf = MsgBuffer::new();
        buf.push_bytes(b":irc.server.net NOTICE * :*** Looking up your hostname...\r\n");
        assert_eq!(
            buf.next_msg().unwrap().unwrap(),
            Msg {
                tags: vec![],
                pfx: Some(Pfx::Server("irc.server.net".to_owned())),
                cmd: Cmd::PRIVMSG {
                    target: MsgTarget::User("*".to_owned()),
                    msg: "*** Looking up your hostname...".to_owned(),
                    is_notice: true,
                    ctcp: None,
                },
            }
        );
    }

    #[test]
    fn test_tagged_parsing() {
        let mut buf = MsgBuffer::new();
        buf.push_bytes(
            b"@time=2023-07-08T21:11:19.123Z;+example/x=a\\sb :a!b@c PRIVMSG #chan :hi\r\n",
        );
        let msg = buf.next_msg().unwrap().unwrap();
        assert_eq!(msg.tag("time"), Some("2023-07-08T21:11:19.123Z"));
        assert_eq!(msg.tag("+example/x"), Some("a b"));
        let (secs, usecs) = msg.time().unwrap();
        assert_eq!(secs, 1688850679);
        assert_eq!(usecs, 123000);
    }

    #[test]
    fn test_numeric_parsing() {
        let mut buf = MsgBuffer::new();
        buf.push_bytes(
            b":irc.server.net 001 wren :Welcome to the Example Internet Relay Chat Network wren\r\n\
              :irc.server.net 005 wren CHANTYPES=# CHANMODES=eIbq,k,flj,CFLMPQScgimnprstz \
              PREFIX=(ov)@+ CASEMAPPING=rfc1459 :are supported by this server\r\n",
        );
        let msgs = parse_buf(&mut buf);
        assert_eq!(msgs.len(), 2);
        for msg in msgs {
            assert_eq!(
                msg.unwrap().pfx,
                Some(Pfx::Server("irc.server.net".to_owned()))
            );
        }
    }

    #[test]
    fn test_join_part_parsing() {
        let mut buf = MsgBuffer::new();
        buf.push_bytes(b":wren!~u@host JOIN #wren\r\n:wren!~u@host PART #wren\r\n");
        assert_eq!(
            buf.next_msg().unwrap().unwrap().cmd,
            Cmd::JOIN {
                chan: ChanNameRef::new("#wren").to_owned(),
            }
        );
        assert_eq!(
            buf.next_msg().unwrap().unwrap().cmd,
            Cmd::PART {
                chan: ChanNameRef::new("#wren").to_owned(),
                msg: None,
            }
        );
    }

    #[test]
    fn test_mode_parsing() {
        let mut buf = MsgBuffer::new();
        buf.push_bytes(b":oper!o@h MODE #chan +ovk-l alice bob secret\r\n");
        assert_eq!(
            buf.next_msg().unwrap().unwrap().cmd,
            Cmd::MODE {
                target: "#chan".to_owned(),
                modes: "+ovk-l".to_owned(),
                params: vec!["alice".to_owned(), "bob".to_owned(), "secret".to_owned()],
                smart_filtered: false,
            }
        );
    }

    #[test]
    fn test_ctcp_action_parsing() {
        let mut buf = MsgBuffer::new();
        buf.push_bytes(b":dan!u@localhost PRIVMSG #ircv3 :\x01ACTION writes some specs!\x01\r\n");
        assert_eq!(
            buf.next_msg().unwrap().unwrap().cmd,
            Cmd::PRIVMSG {
                target: MsgTarget::Chan(ChanNameRef::new("#ircv3").to_owned()),
                msg: "writes some specs!".to_owned(),
                is_notice: false,
                ctcp: Some(CTCP::Action),
            }
        );

        // From https://modern.ircdocs.horse/ctcp.html:
        //
        // > The final <delim> MUST be sent, but parsers SHOULD accept incoming messages which lack
        // > it (particularly for CTCP ACTION).
        let mut buf = MsgBuffer::new();
        buf.push_bytes(b":a!b@c PRIVMSG target :\x01ACTION msg contents\r\n");
        assert_eq!(
            buf.next_msg().unwrap().unwrap().cmd,
            Cmd::PRIVMSG {
                target: MsgTarget::User("target".to_owned()),
                msg: "msg contents".to_owned(),
                is_notice: false,
                ctcp: Some(CTCP::Action),
            }
        );
    }

    #[test]
    fn test_ctcp_version_parsing() {
        for frame in [
            ":a!b@c PRIVMSG target :\x01VERSION\x01\r\n".as_bytes(),
            ":a!b@c PRIVMSG target :\x01VERSION \x01\r\n".as_bytes(),
        ] {
            let mut buf = MsgBuffer::new();
            buf.push_bytes(frame);
            assert_eq!(
                buf.next_msg().unwrap().unwrap().cmd,
                Cmd::PRIVMSG {
                    target: MsgTarget::User("target".to_owned()),
                    msg: "".to_owned(),
                    is_notice: false,
                    ctcp: Some(CTCP::Version),
                }
            );
        }
    }

    #[test]
    fn test_ctcp_ping_parsing() {
        let mut buf = MsgBuffer::new();
        buf.push_bytes(b":bob!u@h PRIVMSG alice :\x01PING 12345 67890\x01\r\n");
        assert_eq!(
            buf.next_msg().unwrap().unwrap().cmd,
            Cmd::PRIVMSG {
                target: MsgTarget::User("alice".to_owned()),
                msg: "12345 67890".to_owned(),
                is_notice: false,
                ctcp: Some(CTCP::Ping),
            }
        );
    }

    #[test]
    fn test_error_parsing() {
        let mut buf = MsgBuffer::new();
        buf.push_bytes(b"ERROR :Closing Link: 1.2.3.4 (Excess Flood)\r\n");
        assert_eq!(
            buf.next_msg().unwrap().unwrap(),
            Msg {
                tags: vec![],
                pfx: None,
                cmd: Cmd::ERROR {
                    msg: "Closing Link: 1.2.3.4 (Excess Flood)".to_owned(),
                },
            },
        );
    }

    #[test]
    fn test_blank_frames() {
        assert_eq!(parse_one_message(""), Err(ParseError::NoCommand));
        assert_eq!(parse_one_message("   "), Err(ParseError::NoCommand));
        assert_eq!(parse_one_message(":prefix.only"), Err(ParseError::NoCommand));
    }

    #[test]
    fn test_command_without_params() {
        assert_eq!(
            parse_one_message("AWAY").unwrap().cmd,
            Cmd::AWAY { msg: None }
        );
    }

    #[test]
    fn test_parse_pfx() {
        use Pfx::*;
        assert_eq!(parse_pfx("xyz"), Ambiguous("xyz".to_string()));
        assert_eq!(parse_pfx("xy.z"), Server("xy.z".to_string()));
        assert_eq!(
            parse_pfx("xyz[m]"),
            User {
                nick: "xyz[m]".to_string(),
                user: "".to_string()
            }
        );
        assert_eq!(
            parse_pfx("alice!alice@x.y.im"),
            User {
                nick: "alice".to_string(),
                user: "alice@x.y.im".to_string(),
            }
        );
    }
}
