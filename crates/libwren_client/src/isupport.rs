//! ISUPPORT (`005` numeric) tokens and the server fields derived from them.

use libwren_common::Casemapping;

use std::collections::HashMap;

pub(crate) const DEFAULT_PREFIX_MODES: &str = "ohv";
pub(crate) const DEFAULT_PREFIX_CHARS: &str = "@%+";
pub(crate) const DEFAULT_CHANTYPES: &str = "#&+!";

/// Server properties advertised in `005`. Starts from RFC defaults; each `005` line refines it.
#[derive(Debug, Clone)]
pub struct Isupport {
    pub casemapping: Casemapping,
    pub chantypes: String,

    /// The four CHANMODES classes A,B,C,D. A letter in class A manipulates a modelist and always
    /// takes a parameter; B always takes one; C only when set; D never.
    pub chanmodes: [String; 4],

    /// Parallel strings: `prefix_modes[i]` is the mode letter displayed as `prefix_chars[i]`,
    /// ordered from most to least privileged.
    pub prefix_modes: String,
    pub prefix_chars: String,

    /// Prefix characters that may prefix a channel name to restrict a message to holders of that
    /// prefix (e.g. `@#chan`). Defaults to `prefix_chars` when the token is absent.
    pub statusmsg: Option<String>,

    pub network: Option<String>,
    pub monitor_limit: Option<u32>,
    pub clienttagdeny: Option<String>,

    /// Every token as received, for consumers that need the long tail (`NICKLEN`, `TARGMAX`, ...).
    pub tokens: HashMap<String, Option<String>>,
}

impl Default for Isupport {
    fn default() -> Isupport {
        Isupport {
            casemapping: Casemapping::default(),
            chantypes: DEFAULT_CHANTYPES.to_owned(),
            chanmodes: [
                "b".to_owned(),
                "k".to_owned(),
                "l".to_owned(),
                "imnpst".to_owned(),
            ],
            prefix_modes: DEFAULT_PREFIX_MODES.to_owned(),
            prefix_chars: DEFAULT_PREFIX_CHARS.to_owned(),
            statusmsg: None,
            network: None,
            monitor_limit: None,
            clienttagdeny: None,
            tokens: HashMap::new(),
        }
    }
}

impl Isupport {
    /// Applies the tokens of one `005` line. `params` excludes the leading client nick and the
    /// trailing "are supported by this server" text.
    pub fn apply_tokens<'a, I: Iterator<Item = &'a str>>(&mut self, params: I) {
        for token in params {
            if token.is_empty() {
                continue;
            }
            // `-KEY` withdraws a previously advertised token
            if let Some(key) = token.strip_prefix('-') {
                self.tokens.remove(&key.to_ascii_uppercase());
                continue;
            }
            let (key, value) = match token.find('=') {
                Some(idx) => (&token[..idx], Some(&token[idx + 1..])),
                None => (token, None),
            };
            let key = key.to_ascii_uppercase();
            match (key.as_str(), value) {
                ("CASEMAPPING", Some(value)) => {
                    self.casemapping = Casemapping::parse(value);
                }
                ("CHANTYPES", Some(value)) => {
                    self.chantypes = value.to_owned();
                }
                ("CHANMODES", Some(value)) => {
                    let mut classes = value.split(',');
                    let a = classes.next().unwrap_or("").to_owned();
                    let b = classes.next().unwrap_or("").to_owned();
                    let c = classes.next().unwrap_or("").to_owned();
                    let d = classes.next().unwrap_or("").to_owned();
                    self.chanmodes = [a, b, c, d];
                }
                ("PREFIX", Some(value)) => {
                    if let Some((modes, chars)) = parse_prefix(value) {
                        self.prefix_modes = modes.to_owned();
                        self.prefix_chars = chars.to_owned();
                    }
                }
                ("STATUSMSG", Some(value)) => {
                    self.statusmsg = Some(value.to_owned());
                }
                ("NETWORK", Some(value)) => {
                    self.network = Some(value.to_owned());
                }
                ("MONITOR", value) => {
                    self.monitor_limit = value.and_then(|v| v.parse().ok()).or(Some(0));
                }
                ("CLIENTTAGDENY", Some(value)) => {
                    self.clienttagdeny = Some(value.to_owned());
                }
                _ => {}
            }
            self.tokens.insert(key, value.map(str::to_owned));
        }
    }

    pub fn is_channel(&self, name: &str) -> bool {
        match name.chars().next() {
            None => false,
            Some(c) => self.chantypes.contains(c),
        }
    }

    /// Index of a mode letter in the prefix ranking, `None` when it's not a prefix mode.
    pub fn prefix_mode_index(&self, mode: char) -> Option<usize> {
        self.prefix_modes.chars().position(|c| c == mode)
    }

    pub fn prefix_char_index(&self, prefix: char) -> Option<usize> {
        self.prefix_chars.chars().position(|c| c == prefix)
    }

    pub fn prefix_char_for_mode(&self, mode: char) -> Option<char> {
        self.prefix_mode_index(mode)
            .and_then(|idx| self.prefix_chars.chars().nth(idx))
    }

    /// Is `c` a STATUSMSG prefix (as in `@#chan` targets)?
    pub fn is_statusmsg_prefix(&self, c: char) -> bool {
        match &self.statusmsg {
            Some(statusmsg) => statusmsg.contains(c),
            None => self.prefix_chars.contains(c),
        }
    }
}

/// Parses a `PREFIX` value of the form `(modes)chars`. The two halves must have equal length.
fn parse_prefix(value: &str) -> Option<(&str, &str)> {
    let rest = value.strip_prefix('(')?;
    let close = rest.find(')')?;
    let modes = &rest[..close];
    let chars = &rest[close + 1..];
    if modes.is_empty() || modes.len() != chars.len() {
        return None;
    }
    Some((modes, chars))
}
