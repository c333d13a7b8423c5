//! This crate implements common types used by other libwren crates: the
//! casemapping-aware identifier comparison and the buffer-addressing types
//! shared with the UI collaborator.

mod casemap;

pub use casemap::{irc_cmp, irc_cmp_n, irc_eq, Casemapping};

use std::borrow::Borrow;
use std::hash::{Hash, Hasher};
use std::ops::Deref;

/// Channel names according to RFC 2812, section 1.3. Channel names are case insensitive, so this
/// type defines `Eq`, and `Hash` traits that work in a case-insensitive way. `ChanName::display`
/// method shows the channel name with the original casing.
///
/// `Eq` and `Hash` always fold with the default `rfc1459` mapping; comparisons that must honor a
/// server-advertised mapping go through [`irc_cmp`] instead.
#[derive(Debug, Clone)]
pub struct ChanName(String);

/// Slice version of `ChanName`
#[derive(Debug)]
pub struct ChanNameRef(str);

impl Deref for ChanName {
    type Target = ChanNameRef;

    fn deref(&self) -> &Self::Target {
        self.as_ref()
    }
}

impl AsRef<ChanNameRef> for ChanName {
    fn as_ref(&self) -> &ChanNameRef {
        ChanNameRef::new(self.0.as_ref())
    }
}

impl Borrow<ChanNameRef> for ChanName {
    fn borrow(&self) -> &ChanNameRef {
        self.as_ref()
    }
}

// Used to normalize channel names. Rules are:
//
// - ASCII characters are mapped to their lowercase versions
// - '[', ']', '\\', '~' are mapped to '{', '}', '|', '^', respectively. See RFC 2812 section 2.2.
// - Non-ASCII characters are left unchanged.
fn to_lower(c: char) -> char {
    match c {
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        '~' => '^',
        _ => c.to_ascii_lowercase(),
    }
}

impl ChanName {
    pub fn new(name: String) -> Self {
        ChanName(name)
    }

    pub fn display(&self) -> &str {
        &self.0
    }
}

impl ChanNameRef {
    pub fn new(name: &str) -> &Self {
        unsafe { &*(name as *const str as *const ChanNameRef) }
    }

    pub fn display(&self) -> &str {
        &self.0
    }

    pub fn normalized(&self) -> String {
        self.0.chars().map(to_lower).collect()
    }
}

impl ToOwned for ChanNameRef {
    type Owned = ChanName;

    fn to_owned(&self) -> Self::Owned {
        ChanName(self.0.to_owned())
    }
}

impl PartialEq for ChanName {
    fn eq(&self, other: &Self) -> bool {
        let self_borrowed: &ChanNameRef = self.borrow();
        let other_borrowed: &ChanNameRef = other.borrow();
        self_borrowed.eq(other_borrowed)
    }
}

impl Eq for ChanName {}

impl PartialEq<ChanNameRef> for ChanName {
    fn eq(&self, other: &ChanNameRef) -> bool {
        let self_borrowed: &ChanNameRef = self.borrow();
        self_borrowed.eq(other)
    }
}

impl Hash for ChanName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let self_borrowed: &ChanNameRef = self.borrow();
        self_borrowed.hash(state)
    }
}

impl PartialEq for ChanNameRef {
    fn eq(&self, other: &Self) -> bool {
        // All characters in ASCII have the same encoding length so we can compare byte lengths.
        if self.0.as_bytes().len() != other.0.as_bytes().len() {
            return false;
        }

        self.0
            .chars()
            .map(to_lower)
            .zip(other.0.chars().map(to_lower))
            .all(|(a, b)| a == b)
    }
}

impl Eq for ChanNameRef {}

impl PartialEq<ChanName> for ChanNameRef {
    fn eq(&self, other: &ChanName) -> bool {
        let other_borrowed: &ChanNameRef = other.borrow();
        self.eq(other_borrowed)
    }
}

impl Hash for ChanNameRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for c in self.0.chars() {
            to_lower(c).hash(state);
        }
    }
}

/// A channel to join, with an optional key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chan {
    Name(ChanName),
    WithKey { name: ChanName, key: String },
}

impl Chan {
    /// Parses a `"#chan"` or `"#chan key"` entry.
    pub fn from_entry(entry: &str) -> Chan {
        match entry.split_once(' ') {
            Some((name, key)) if !key.trim().is_empty() => Chan::WithKey {
                name: ChanName::new(name.to_owned()),
                key: key.trim().to_owned(),
            },
            _ => Chan::Name(ChanName::new(entry.trim().to_owned())),
        }
    }

    pub fn name(&self) -> &ChanNameRef {
        match self {
            Chan::Name(name) => name.as_ref(),
            Chan::WithKey { name, .. } => name.as_ref(),
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Chan::Name(_) => None,
            Chan::WithKey { key, .. } => Some(key),
        }
    }
}

/// Where to show a message in the UI collaborator. Buffers are owned by the UI; the engine only
/// names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgTarget<'a> {
    /// A server buffer.
    Server { serv: &'a str },

    /// A channel buffer.
    Chan { serv: &'a str, chan: &'a ChanNameRef },

    /// A private conversation buffer.
    User { serv: &'a str, nick: &'a str },

    /// The server buffer plus every channel/private buffer of the server. Used for connection
    /// status changes.
    AllServTabs { serv: &'a str },

    /// The currently focused buffer, whatever it is.
    CurrentTab,
}

/// Where a user input (message or command) originated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsgSource {
    Serv { serv: String },
    Chan { serv: String, chan: ChanName },
    User { serv: String, nick: String },
}

impl MsgSource {
    pub fn serv_name(&self) -> &str {
        match self {
            MsgSource::Serv { serv } | MsgSource::Chan { serv, .. } | MsgSource::User { serv, .. } => serv,
        }
    }

    pub fn to_target(&self) -> MsgTarget {
        match self {
            MsgSource::Serv { serv } => MsgTarget::Server { serv },
            MsgSource::Chan { serv, chan } => MsgTarget::Chan {
                serv,
                chan: chan.as_ref(),
            },
            MsgSource::User { serv, nick } => MsgTarget::User { serv, nick },
        }
    }
}

/// Attention level of a delivered message, used by the UI for tab styling and by the router when
/// synthesizing `notify_*` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Notify {
    None,
    Message,
    Private,
    Highlight,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chan_entry_parsing() {
        assert_eq!(
            Chan::from_entry("#wren"),
            Chan::Name(ChanName::new("#wren".to_owned()))
        );
        assert_eq!(
            Chan::from_entry("#wren sekrit"),
            Chan::WithKey {
                name: ChanName::new("#wren".to_owned()),
                key: "sekrit".to_owned(),
            }
        );
        assert_eq!(Chan::from_entry("#wren ").key(), None);
    }

    #[test]
    fn chan_name_eq() {
        assert_eq!(
            ChanName::new("#Foo[]".to_owned()),
            ChanName::new("#foo{}".to_owned())
        );
        assert_eq!(
            ChanNameRef::new("#wren\\test~"),
            ChanNameRef::new("#WREN|TEST^")
        );
        assert!(ChanNameRef::new("#abc") != ChanNameRef::new("#abcd"));
    }
}
