//! CTCP reply templates and their evaluation.
//!
//! Requests arrive inside PRIVMSG (replies inside NOTICE) wrapped in `\x01`. The reply for a type
//! comes from a user-editable template table; templates reference `${...}` variables evaluated
//! here. An empty template blocks the CTCP silently, an absent one follows the "unknown CTCP"
//! configuration. `ACTION`, `DCC` and `PING` are handled structurally and never looked up.

use std::collections::HashMap;

/// Built-in replies, used when the user has not overridden the type.
const DEFAULT_REPLIES: [(&str, &str); 4] = [
    ("clientinfo", "${clientinfo}"),
    ("source", "${download}"),
    ("time", "${time}"),
    ("version", "wren ${version}"),
];

/// User-editable CTCP configuration, shared by every server.
#[derive(Debug, Clone)]
pub struct CtcpConfig {
    /// Reply templates keyed by lowercase CTCP type, optionally scoped to one server with a
    /// `<server>.<type>` key. An empty value blocks the CTCP.
    pub replies: HashMap<String, String>,

    /// Show a line for blocked CTCP requests.
    pub display_blocked: bool,

    /// Show a line for CTCP requests we have no reply for.
    pub display_unknown: bool,

    /// strftime format for `${time}`, rendered in local time.
    pub time_format: String,
}

impl Default for CtcpConfig {
    fn default() -> CtcpConfig {
        CtcpConfig {
            replies: HashMap::new(),
            display_blocked: true,
            display_unknown: false,
            time_format: "%a, %d %b %Y %H:%M:%S %z".to_owned(),
        }
    }
}

/// Values substituted into reply templates.
#[derive(Debug, Clone, Default)]
pub struct ReplyCtx {
    pub username: String,
    pub realname: String,
}

impl CtcpConfig {
    /// Reply template for a CTCP type: the server-scoped user option wins, then the global user
    /// option, then the built-in default. `None` means the CTCP is unknown.
    pub fn reply_for(&self, server_name: &str, ctcp: &str) -> Option<&str> {
        let ctcp_lower = ctcp.to_lowercase();

        if let Some(reply) = self.replies.get(&format!("{}.{}", server_name, ctcp_lower)) {
            return Some(reply);
        }
        if let Some(reply) = self.replies.get(&ctcp_lower) {
            return Some(reply);
        }
        DEFAULT_REPLIES
            .iter()
            .find(|(name, _)| *name == ctcp_lower)
            .map(|(_, reply)| *reply)
    }

    /// Space-separated uppercase list of CTCP types we answer: defaults and user templates that
    /// are non-empty, plus the structural ACTION/DCC/PING. This is the `${clientinfo}` value.
    pub fn supported_ctcp(&self, server_name: &str) -> String {
        let mut list: Vec<String> = vec!["action".to_owned(), "dcc".to_owned(), "ping".to_owned()];

        for (name, _) in DEFAULT_REPLIES.iter() {
            match self.reply_for(server_name, name) {
                Some(reply) if !reply.is_empty() => list.push((*name).to_owned()),
                _ => {}
            }
        }
        for key in self.replies.keys() {
            // strip a server scope if present
            let name = match key.rsplit_once('.') {
                Some((scope, name)) if scope == server_name => name,
                Some(_) => continue,
                None => key.as_str(),
            };
            match self.reply_for(server_name, name) {
                Some(reply) if !reply.is_empty() => {
                    if !list.iter().any(|n| n == name) {
                        list.push(name.to_owned());
                    }
                }
                _ => {}
            }
        }

        list.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()));
        list.iter()
            .map(|s| s.to_uppercase())
            .collect::<Vec<String>>()
            .join(" ")
    }

    /// Evaluates a reply template, substituting the `${...}` variables.
    pub fn eval_reply(&self, server_name: &str, format: &str, ctx: &ReplyCtx) -> String {
        let version = env!("CARGO_PKG_VERSION");
        let osinfo = format!("{} / {}", std::env::consts::OS, std::env::consts::ARCH);
        let site = "https://github.com/wren-irc/wren";
        let time = time::strftime(&self.time_format, &time::now()).unwrap_or_default();

        let mut out = String::with_capacity(format.len());
        let mut rest = format;
        while let Some(idx) = rest.find("${") {
            out.push_str(&rest[..idx]);
            rest = &rest[idx + 2..];
            match rest.find('}') {
                None => {
                    // unterminated variable, keep the text as-is
                    out.push_str("${");
                    break;
                }
                Some(end) => {
                    let var = &rest[..end];
                    rest = &rest[end + 1..];
                    match var {
                        "clientinfo" => out.push_str(&self.supported_ctcp(server_name)),
                        "version" => out.push_str(version),
                        // no git metadata is compiled in; versiongit degrades to the version
                        "git" => {}
                        "versiongit" => out.push_str(version),
                        "compilation" => out.push_str(option_env!("WREN_BUILD_DATE").unwrap_or("")),
                        "osinfo" => out.push_str(&osinfo),
                        "site" => out.push_str(site),
                        "download" => out.push_str(site),
                        "time" => out.push_str(&time),
                        "username" => out.push_str(&ctx.username),
                        "realname" => out.push_str(&ctx.realname),
                        _ => {
                            // unknown variables are kept verbatim
                            out.push_str("${");
                            out.push_str(var);
                            out.push('}');
                        }
                    }
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Replaces any `\x01` by a space. Applied to every outbound CTCP type and argument: an embedded
/// delimiter would let a message smuggle a second CTCP past connection-tracking firewalls
/// (CVE-2022-2663).
pub fn sanitize(s: &str) -> String {
    s.replace('\x01', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_replies() {
        let cfg = CtcpConfig::default();
        assert_eq!(cfg.reply_for("srv", "VERSION"), Some("wren ${version}"));
        assert_eq!(cfg.reply_for("srv", "time"), Some("${time}"));
        assert_eq!(cfg.reply_for("srv", "frobnicate"), None);
    }

    #[test]
    fn server_scoped_reply_wins() {
        let mut cfg = CtcpConfig::default();
        cfg.replies
            .insert("version".to_owned(), "generic".to_owned());
        cfg.replies
            .insert("myserv.version".to_owned(), "scoped".to_owned());
        assert_eq!(cfg.reply_for("myserv", "VERSION"), Some("scoped"));
        assert_eq!(cfg.reply_for("other", "VERSION"), Some("generic"));
    }

    #[test]
    fn empty_template_blocks() {
        let mut cfg = CtcpConfig::default();
        cfg.replies.insert("version".to_owned(), "".to_owned());
        assert_eq!(cfg.reply_for("srv", "VERSION"), Some(""));
        // blocked CTCPs are not advertised
        assert!(!cfg.supported_ctcp("srv").contains("VERSION"));
    }

    #[test]
    fn supported_list() {
        let cfg = CtcpConfig::default();
        assert_eq!(
            cfg.supported_ctcp("srv"),
            "ACTION CLIENTINFO DCC PING SOURCE TIME VERSION"
        );
    }

    #[test]
    fn eval_variables() {
        let cfg = CtcpConfig::default();
        let ctx = ReplyCtx {
            username: "alice".to_owned(),
            realname: "Alice L.".to_owned(),
        };
        assert_eq!(
            cfg.eval_reply("srv", "wren ${version}", &ctx),
            format!("wren {}", env!("CARGO_PKG_VERSION"))
        );
        assert_eq!(cfg.eval_reply("srv", "${username}/${realname}", &ctx), "alice/Alice L.");
        // unknown variables survive verbatim
        assert_eq!(cfg.eval_reply("srv", "${nope}", &ctx), "${nope}");
    }

    #[test]
    fn sanitize_strips_delimiter() {
        assert_eq!(sanitize("a\x01b"), "a b");
        // symmetric: sanitized content round-trips through a wrapped body
        let body = sanitize("PING x\x01y");
        assert!(!body.contains('\x01'));
    }

    #[test]
    fn time_formatting() {
        let tm = time::at_utc(time::Timespec::new(1688850679, 0));
        assert_eq!(
            time::strftime("%a, %d %b %Y %H:%M:%S", &tm).unwrap(),
            "Sat, 08 Jul 2023 21:11:19"
        );
    }

    #[test]
    fn eval_time_not_empty() {
        let cfg = CtcpConfig::default();
        let out = cfg.eval_reply("srv", "${time}", &ReplyCtx::default());
        // local time with the default format: "Sat, 08 Jul 2023 21:11:19 +0200"
        assert!(!out.is_empty());
        assert!(!out.contains("${"));
    }
}
