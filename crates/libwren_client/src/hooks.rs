//! The public hook surface: signals, modifiers and infolists.
//!
//! Consumers (the scripting layer, the transfer engine) register callbacks here; the engine
//! invokes them inline and synchronously. Callbacks must never block. There are no process-wide
//! registries: hooks live on the engine value they were registered with.

use crate::dcc::DccOffer;

use std::rc::Rc;

/// Payload of a signal. Strings at the boundary; structured payloads for the transfer handoff.
#[derive(Debug)]
pub enum SignalData<'a> {
    Str(&'a str),
    Dcc(&'a DccOffer),
    Xfer(&'a XferPayload),
}

/// Structured payload of the `xfer_add` / `xfer_accept_resume` / `xfer_start_resume` signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XferPayload {
    pub plugin_name: String,
    /// The server name.
    pub plugin_id: String,
    /// `file_recv_active`, `file_recv_passive` or `chat_recv`.
    pub type_string: String,
    pub protocol_string: String,
    pub remote_nick: String,
    pub local_nick: String,
    pub filename: Option<String>,
    pub size: Option<u64>,
    pub start_offset: Option<u64>,
    pub remote_address: Option<String>,
    pub port: u16,
    pub token: Option<String>,
    pub proxy: Option<String>,
}

pub type SignalCb = Rc<dyn Fn(&str, &SignalData)>;

/// A modifier rewrites a string; returning `None` leaves it unchanged, returning an empty string
/// drops the message.
pub type ModifierCb = Rc<dyn Fn(&str) -> Option<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookId(u64);

#[derive(Clone)]
struct SignalHook {
    id: HookId,
    name: String,
    priority: i32,
    cb: SignalCb,
}

#[derive(Clone)]
struct ModifierHook {
    id: HookId,
    name: String,
    priority: i32,
    cb: ModifierCb,
}

/// Signal and modifier registries of one engine. Cloning is shallow (the callbacks are shared),
/// so a snapshot can be taken before invoking callbacks.
#[derive(Default, Clone)]
pub struct Hooks {
    signals: Vec<SignalHook>,
    modifiers: Vec<ModifierHook>,
    next_id: u64,
}

/// `name` may end with `*` to match a prefix (`irc_in_*`).
fn name_matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}

impl Hooks {
    fn fresh_id(&mut self) -> HookId {
        self.next_id += 1;
        HookId(self.next_id)
    }

    /// Registers a signal callback. Higher priorities run first; equal priorities run in
    /// registration order.
    pub fn hook_signal(&mut self, name: &str, priority: i32, cb: SignalCb) -> HookId {
        let id = self.fresh_id();
        let pos = self
            .signals
            .iter()
            .position(|hook| hook.priority < priority)
            .unwrap_or(self.signals.len());
        self.signals.insert(
            pos,
            SignalHook {
                id,
                name: name.to_owned(),
                priority,
                cb,
            },
        );
        id
    }

    pub fn hook_modifier(&mut self, name: &str, priority: i32, cb: ModifierCb) -> HookId {
        let id = self.fresh_id();
        let pos = self
            .modifiers
            .iter()
            .position(|hook| hook.priority < priority)
            .unwrap_or(self.modifiers.len());
        self.modifiers.insert(
            pos,
            ModifierHook {
                id,
                name: name.to_owned(),
                priority,
                cb,
            },
        );
        id
    }

    pub fn unhook(&mut self, id: HookId) {
        self.signals.retain(|hook| hook.id != id);
        self.modifiers.retain(|hook| hook.id != id);
    }

    /// Sends a signal to every matching hook, in priority order.
    pub fn send_signal(&self, name: &str, data: &SignalData) {
        for hook in &self.signals {
            if name_matches(&hook.name, name) {
                (hook.cb)(name, data);
            }
        }
    }

    /// Runs a string through every matching modifier; a later modifier sees the output of earlier
    /// ones. An empty result means "drop this message".
    pub fn run_modifier(&self, name: &str, input: &str) -> String {
        let mut current = input.to_owned();
        for hook in &self.modifiers {
            if name_matches(&hook.name, name) {
                if let Some(output) = (hook.cb)(&current) {
                    current = output;
                    if current.is_empty() {
                        break;
                    }
                }
            }
        }
        current
    }

    pub fn has_modifier(&self, name: &str) -> bool {
        self.modifiers.iter().any(|hook| name_matches(&hook.name, name))
    }
}

/// A field of an infolist item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfolistVar {
    Str(String),
    Int(i64),
}

/// One entry of an infolist: an ordered list of named fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfolistItem {
    fields: Vec<(String, InfolistVar)>,
}

impl InfolistItem {
    pub(crate) fn str(mut self, name: &str, value: impl Into<String>) -> InfolistItem {
        self.fields
            .push((name.to_owned(), InfolistVar::Str(value.into())));
        self
    }

    pub(crate) fn int(mut self, name: &str, value: i64) -> InfolistItem {
        self.fields.push((name.to_owned(), InfolistVar::Int(value)));
        self
    }

    pub fn get(&self, name: &str) -> Option<&InfolistVar> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, var)| var)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(InfolistVar::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(InfolistVar::Int(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &InfolistVar)> {
        self.fields.iter().map(|(name, var)| (name.as_str(), var))
    }
}

/// An iterable snapshot of engine state (`irc_server`, `irc_channel`, `irc_nick`, `irc_modelist`,
/// `irc_modelist_item`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Infolist {
    pub items: Vec<InfolistItem>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn signal_priority_order() {
        let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(vec![]));
        let mut hooks = Hooks::default();

        let order1 = order.clone();
        hooks.hook_signal("irc_ctcp", 0, Rc::new(move |_, _| order1.borrow_mut().push("low")));
        let order2 = order.clone();
        hooks.hook_signal("irc_ctcp", 100, Rc::new(move |_, _| order2.borrow_mut().push("high")));
        let order3 = order.clone();
        hooks.hook_signal("irc_ctcp", 0, Rc::new(move |_, _| order3.borrow_mut().push("low2")));

        hooks.send_signal("irc_ctcp", &SignalData::Str("x"));
        assert_eq!(*order.borrow(), vec!["high", "low", "low2"]);
    }

    #[test]
    fn signal_wildcard() {
        let hits: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(vec![]));
        let mut hooks = Hooks::default();

        let hits1 = hits.clone();
        hooks.hook_signal(
            "irc_in_*",
            0,
            Rc::new(move |name, _| hits1.borrow_mut().push(name.to_owned())),
        );

        hooks.send_signal("irc_in_PRIVMSG", &SignalData::Str("x"));
        hooks.send_signal("irc_out_PRIVMSG", &SignalData::Str("x"));
        assert_eq!(*hits.borrow(), vec!["irc_in_PRIVMSG"]);
    }

    #[test]
    fn modifier_chaining() {
        let mut hooks = Hooks::default();
        hooks.hook_modifier("irc_in", 10, Rc::new(|s| Some(format!("{}!", s))));
        hooks.hook_modifier("irc_in", 0, Rc::new(|s| Some(format!("[{}]", s))));

        // Higher priority runs first; the second modifier sees its output
        assert_eq!(hooks.run_modifier("irc_in", "msg"), "[msg!]");

        // A modifier returning None leaves the input alone
        hooks.hook_modifier("irc_out", 0, Rc::new(|_| None));
        assert_eq!(hooks.run_modifier("irc_out", "msg"), "msg");
    }

    #[test]
    fn unhook_removes() {
        let mut hooks = Hooks::default();
        let id = hooks.hook_modifier("irc_in", 0, Rc::new(|_| Some("gone".to_owned())));
        assert_eq!(hooks.run_modifier("irc_in", "msg"), "gone");
        hooks.unhook(id);
        assert_eq!(hooks.run_modifier("irc_in", "msg"), "msg");
    }

    #[test]
    fn infolist_fields() {
        let item = InfolistItem::default()
            .str("name", "#wren")
            .int("limit", 25);
        assert_eq!(item.get_str("name"), Some("#wren"));
        assert_eq!(item.get_int("limit"), Some(25));
        assert_eq!(item.get("missing"), None);
    }
}
