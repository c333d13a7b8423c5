//! Per-server channel, nick and modelist state.

use libwren_common::{irc_eq, Casemapping, ChanName, ChanNameRef};

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

/// Capacity of the per-channel speaking history.
pub(crate) const SPEAKING_HISTORY_CAP: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanKind {
    Channel,
    /// A private conversation; `name` is the remote nick.
    Private,
}

/// State transitions:
///    NotJoined -> Joined: When we get a JOIN message for the channel
///    Joined -> Parting: When we send a PART for the channel
///    Parting/Joined -> NotJoined: PART/KICK echo, or connection reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    NotJoined,
    Joined,
    Parting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub text: String,
    pub setter: Option<String>,
    pub time: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nick {
    pub name: String,
    pub host: Option<String>,
    pub account: Option<String>,
    pub realname: Option<String>,

    /// Subset of the server's prefix chars, stored in the server's ranking order. The first char
    /// is what the nicklist shows.
    pub prefixes: String,

    pub is_away: bool,
}

impl Nick {
    pub(crate) fn new(name: String) -> Nick {
        Nick {
            name,
            host: None,
            account: None,
            realname: None,
            prefixes: String::new(),
            is_away: false,
        }
    }

    /// Adds or removes a prefix char, keeping `prefixes` ordered like `ranking`.
    pub(crate) fn set_prefix(&mut self, add: bool, prefix: char, ranking: &str) {
        if add {
            if self.prefixes.contains(prefix) {
                return;
            }
            let rank = ranking.find(prefix).unwrap_or(ranking.len());
            let insert_at = self
                .prefixes
                .char_indices()
                .find(|(_, c)| ranking.find(*c).unwrap_or(ranking.len()) > rank)
                .map(|(i, _)| i)
                .unwrap_or(self.prefixes.len());
            self.prefixes.insert(insert_at, prefix);
        } else {
            self.prefixes.retain(|c| c != prefix);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelistItem {
    pub mask: String,
    pub setter: Option<String>,
    pub time: u64,
}

/// The masks associated with one class-A mode letter (ban list, quiet list, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modelist {
    pub letter: char,
    pub items: Vec<ModelistItem>,

    /// Set while a `367`-style enumeration is in flight; the first item of an enumeration
    /// replaces whatever was held before.
    pub(crate) receiving: bool,
}

impl Modelist {
    pub(crate) fn add(&mut self, mask: &str, setter: Option<&str>, time: u64) {
        self.items.push(ModelistItem {
            mask: mask.to_owned(),
            setter: setter.map(str::to_owned),
            time,
        });
    }

    pub(crate) fn remove(&mut self, mask: &str) {
        if let Some(idx) = self.items.iter().position(|item| item.mask == mask) {
            self.items.remove(idx);
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SpeakingEntry {
    pub(crate) nick: String,
    pub(crate) time: u64,
    pub(crate) highlighted: bool,
}

/// Bounded FIFO of recent speakers, consulted by mode smart-filtering and nick completion.
#[derive(Debug, Default)]
pub(crate) struct SpeakingHistory {
    entries: VecDeque<SpeakingEntry>,
}

impl SpeakingHistory {
    pub(crate) fn record(&mut self, nick: &str, highlighted: bool) {
        self.record_at(nick, highlighted, unix_now());
    }

    pub(crate) fn record_at(&mut self, nick: &str, highlighted: bool, time: u64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.nick == nick) {
            entry.time = time;
            entry.highlighted = entry.highlighted || highlighted;
            return;
        }
        if self.entries.len() == SPEAKING_HISTORY_CAP {
            self.entries.pop_front();
        }
        self.entries.push_back(SpeakingEntry {
            nick: nick.to_owned(),
            time,
            highlighted,
        });
    }

    /// Did `nick` speak within the last `window` seconds?
    pub(crate) fn spoke_recently(&self, nick: &str, window: u64, casemapping: Casemapping) -> bool {
        let now = unix_now();
        self.entries
            .iter()
            .any(|e| irc_eq(&e.nick, nick, casemapping) && now.saturating_sub(e.time) <= window)
    }

    pub(crate) fn rename(&mut self, old_nick: &str, new_nick: &str) {
        for e in self.entries.iter_mut() {
            if e.nick == old_nick {
                e.nick = new_nick.to_owned();
            }
        }
    }

    /// Recent speakers, newest first. Used for completion ranking.
    pub(crate) fn nicks_newest_first(&self) -> Vec<&str> {
        self.entries.iter().rev().map(|e| e.nick.as_str()).collect()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug)]
pub struct Chan {
    pub name: ChanName,
    pub kind: ChanKind,
    pub join_state: JoinState,

    pub topic: Option<Topic>,

    /// Rendered mode string: `+<flags> <args>`, `None` when no mode is set.
    pub modes: Option<String>,
    pub key: Option<String>,
    pub limit: u32,

    /// Insertion-ordered; lookups fold with the server casemapping.
    pub nicks: Vec<Nick>,

    /// One entry per class-A letter seen on this channel.
    pub modelists: Vec<Modelist>,

    pub(crate) speaking: SpeakingHistory,

    /// A parted channel kept around for history: no nicks remain and it is excluded from
    /// autojoin reconstruction.
    pub part: bool,

    /// Nicks accumulated from `353` lines, committed on `366`.
    pub(crate) names_buffer: Option<Vec<Nick>>,
}

impl Chan {
    pub(crate) fn new(name: ChanName, kind: ChanKind) -> Chan {
        Chan {
            name,
            kind,
            join_state: JoinState::NotJoined,
            topic: None,
            modes: None,
            key: None,
            limit: 0,
            nicks: Vec::new(),
            modelists: Vec::new(),
            speaking: SpeakingHistory::default(),
            part: false,
            names_buffer: None,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.join_state = JoinState::NotJoined;
        self.nicks.clear();
        self.modes = None;
        self.limit = 0;
        self.modelists.clear();
        self.speaking.clear();
        self.names_buffer = None;
    }

    pub fn find_nick(&self, nick: &str, casemapping: Casemapping) -> Option<&Nick> {
        self.nicks.iter().find(|n| irc_eq(&n.name, nick, casemapping))
    }

    pub(crate) fn find_nick_mut(&mut self, nick: &str, casemapping: Casemapping) -> Option<&mut Nick> {
        self.nicks
            .iter_mut()
            .find(|n| irc_eq(&n.name, nick, casemapping))
    }

    /// Adds a nick if not already present (folded comparison). Returns whether it was added, so
    /// repeated JOINs stay no-ops.
    pub(crate) fn add_nick(&mut self, nick: Nick, casemapping: Casemapping) -> bool {
        if self.find_nick(&nick.name, casemapping).is_some() {
            return false;
        }
        self.nicks.push(nick);
        true
    }

    pub(crate) fn remove_nick(&mut self, nick: &str, casemapping: Casemapping) -> bool {
        match self
            .nicks
            .iter()
            .position(|n| irc_eq(&n.name, nick, casemapping))
        {
            None => false,
            Some(idx) => {
                self.nicks.remove(idx);
                true
            }
        }
    }

    pub(crate) fn modelist(&self, letter: char) -> Option<&Modelist> {
        self.modelists.iter().find(|l| l.letter == letter)
    }

    /// Modelist for `letter`, created on first use. The caller has checked that `letter` is a
    /// class-A mode of the server.
    pub(crate) fn modelist_mut(&mut self, letter: char) -> &mut Modelist {
        if let Some(idx) = self.modelists.iter().position(|l| l.letter == letter) {
            return &mut self.modelists[idx];
        }
        self.modelists.push(Modelist {
            letter,
            items: Vec::new(),
            receiving: false,
        });
        self.modelists.last_mut().unwrap()
    }
}

/// The per-server channel collection. Iteration order is join order; name lookups fold with the
/// live casemapping.
#[derive(Debug, Default)]
pub(crate) struct ChanStore {
    chans: Vec<Chan>,
}

impl ChanStore {
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Chan> {
        self.chans.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Chan> {
        self.chans.iter_mut()
    }

    pub(crate) fn len(&self) -> usize {
        self.chans.len()
    }

    pub(crate) fn find(&self, name: &ChanNameRef, casemapping: Casemapping) -> Option<&Chan> {
        self.chans
            .iter()
            .find(|c| irc_eq(c.name.display(), name.display(), casemapping))
    }

    pub(crate) fn find_mut(
        &mut self,
        name: &ChanNameRef,
        casemapping: Casemapping,
    ) -> Option<&mut Chan> {
        self.chans
            .iter_mut()
            .find(|c| irc_eq(c.name.display(), name.display(), casemapping))
    }

    /// Channel for `name`, created (with the given kind) when missing. Names are unique under the
    /// folding.
    pub(crate) fn get_or_create(
        &mut self,
        name: &ChanNameRef,
        kind: ChanKind,
        casemapping: Casemapping,
    ) -> &mut Chan {
        if let Some(idx) = self
            .chans
            .iter()
            .position(|c| irc_eq(c.name.display(), name.display(), casemapping))
        {
            return &mut self.chans[idx];
        }
        self.chans.push(Chan::new(name.to_owned(), kind));
        self.chans.last_mut().unwrap()
    }

    pub(crate) fn remove(&mut self, name: &ChanNameRef, casemapping: Casemapping) -> Option<Chan> {
        self.chans
            .iter()
            .position(|c| irc_eq(c.name.display(), name.display(), casemapping))
            .map(|idx| self.chans.remove(idx))
    }

    pub(crate) fn reset_all(&mut self) {
        for chan in &mut self.chans {
            chan.reset();
        }
    }

    /// Rebuilds an autojoin value from the joined channels: channels with keys first (in join
    /// order, so keys can be matched positionally), then keyless ones. Parted channels are
    /// excluded. Returns `None` when nothing is joined.
    pub(crate) fn build_autojoin(&self) -> Option<String> {
        let mut chans_with_key: Vec<&Chan> = Vec::new();
        let mut chans_without_key: Vec<&Chan> = Vec::new();

        for chan in &self.chans {
            if chan.kind != ChanKind::Channel || chan.part {
                continue;
            }
            match chan.key {
                Some(_) => chans_with_key.push(chan),
                None => chans_without_key.push(chan),
            }
        }

        let mut names: Vec<&str> = Vec::with_capacity(chans_with_key.len() + chans_without_key.len());
        let mut keys: Vec<&str> = Vec::with_capacity(chans_with_key.len());
        for chan in chans_with_key {
            names.push(chan.name.display());
            keys.push(chan.key.as_deref().unwrap());
        }
        for chan in chans_without_key {
            names.push(chan.name.display());
        }

        if names.is_empty() {
            None
        } else if keys.is_empty() {
            Some(names.join(","))
        } else {
            Some(format!("{} {}", names.join(","), keys.join(",")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libwren_common::Casemapping::Rfc1459;

    fn chan(name: &str) -> Chan {
        Chan::new(ChanName::new(name.to_owned()), ChanKind::Channel)
    }

    #[test]
    fn nick_prefix_ordering() {
        let mut nick = Nick::new("alice".to_owned());
        nick.set_prefix(true, '+', "@%+");
        nick.set_prefix(true, '@', "@%+");
        assert_eq!(nick.prefixes, "@+");
        nick.set_prefix(true, '%', "@%+");
        assert_eq!(nick.prefixes, "@%+");

        // Idempotent
        nick.set_prefix(true, '%', "@%+");
        assert_eq!(nick.prefixes, "@%+");

        nick.set_prefix(false, '@', "@%+");
        assert_eq!(nick.prefixes, "%+");
        nick.set_prefix(false, '@', "@%+");
        assert_eq!(nick.prefixes, "%+");
    }

    #[test]
    fn repeated_join_is_noop() {
        let mut c = chan("#test");
        assert!(c.add_nick(Nick::new("Alice".to_owned()), Rfc1459));
        assert!(!c.add_nick(Nick::new("alice".to_owned()), Rfc1459));
        assert_eq!(c.nicks.len(), 1);
        // Original casing is kept
        assert_eq!(c.nicks[0].name, "Alice");
    }

    #[test]
    fn chan_lookup_folds() {
        let mut store = ChanStore::default();
        store.get_or_create(ChanNameRef::new("#Test[x]"), ChanKind::Channel, Rfc1459);
        assert!(store.find(ChanNameRef::new("#test{x}"), Rfc1459).is_some());
        assert_eq!(store.len(), 1);

        // Same name again does not create a duplicate
        store.get_or_create(ChanNameRef::new("#TEST[X]"), ChanKind::Channel, Rfc1459);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn speaking_history_bounded() {
        let mut hist = SpeakingHistory::default();
        for i in 0..(SPEAKING_HISTORY_CAP + 10) {
            hist.record(&format!("nick{}", i), false);
        }
        assert_eq!(hist.len(), SPEAKING_HISTORY_CAP);
        // The oldest entries were dropped
        assert!(!hist.spoke_recently("nick0", u64::MAX, Rfc1459));
        assert!(hist.spoke_recently("nick10", u64::MAX, Rfc1459));
    }

    #[test]
    fn speaking_history_window() {
        let mut hist = SpeakingHistory::default();
        hist.record_at("old", false, unix_now().saturating_sub(600));
        hist.record("new", false);
        assert!(!hist.spoke_recently("old", 300, Rfc1459));
        assert!(hist.spoke_recently("new", 300, Rfc1459));
        assert!(hist.spoke_recently("OLD", 3600, Rfc1459));
    }

    #[test]
    fn build_autojoin_ordering() {
        let mut store = ChanStore::default();
        assert_eq!(store.build_autojoin(), None);

        store.get_or_create(ChanNameRef::new("#a"), ChanKind::Channel, Rfc1459);
        store.get_or_create(ChanNameRef::new("#b"), ChanKind::Channel, Rfc1459);
        store.get_or_create(ChanNameRef::new("#c"), ChanKind::Channel, Rfc1459);
        assert_eq!(store.build_autojoin().as_deref(), Some("#a,#b,#c"));

        store
            .find_mut(ChanNameRef::new("#b"), Rfc1459)
            .unwrap()
            .key = Some("kb".to_owned());
        store
            .find_mut(ChanNameRef::new("#c"), Rfc1459)
            .unwrap()
            .key = Some("kc".to_owned());
        assert_eq!(store.build_autojoin().as_deref(), Some("#b,#c,#a kb,kc"));

        // A parted channel is excluded
        store.find_mut(ChanNameRef::new("#a"), Rfc1459).unwrap().part = true;
        assert_eq!(store.build_autojoin().as_deref(), Some("#b,#c kb,kc"));
    }

    #[test]
    fn private_chans_not_in_autojoin() {
        let mut store = ChanStore::default();
        store.get_or_create(ChanNameRef::new("alice"), ChanKind::Private, Rfc1459);
        assert_eq!(store.build_autojoin(), None);
    }
}
