//! A plain line-oriented frontend.
//!
//! Rendering proper (curses, nicklists, bars) is an external collaborator; this module is the
//! minimal sink the engine events feed: one buffer per server/channel/private conversation,
//! printed as prefixed lines on stdout, plus a "current buffer" the input line targets.

use crate::utils;
use libwren_common::{ChanName, ChanNameRef, MsgSource, MsgTarget, Notify};

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

/// User input, delivered to the main task by the stdin reader.
#[derive(Debug)]
pub(crate) enum InputEvent {
    /// A `/command` line (without the leading slash).
    Cmd { cmd: String, source: MsgSource },
    /// A message typed into the current buffer.
    Msg { msg: String, source: MsgSource },
    /// End of input.
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TabKind {
    Server,
    Chan(ChanName),
    User(String),
}

#[derive(Debug, Clone)]
struct Tab {
    serv: String,
    kind: TabKind,
}

impl Tab {
    fn label(&self) -> String {
        match &self.kind {
            TabKind::Server => self.serv.clone(),
            TabKind::Chan(chan) => format!("{}/{}", self.serv, chan.display()),
            TabKind::User(nick) => format!("{}/{}", self.serv, nick),
        }
    }
}

struct UiInner {
    tabs: Vec<Tab>,
    current: Option<usize>,
}

#[derive(Clone)]
pub(crate) struct UI {
    inner: Rc<RefCell<UiInner>>,
}

fn timestamp() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{:02}:{:02}", (secs % 86400) / 3600, (secs % 3600) / 60)
}

impl UI {
    pub(crate) fn new() -> UI {
        UI {
            inner: Rc::new(RefCell::new(UiInner {
                tabs: Vec::new(),
                current: None,
            })),
        }
    }

    fn print(&self, label: &str, line: &str) {
        println!("{} [{}] {}", timestamp(), label, line);
    }

    fn find_tab(&self, serv: &str, kind: &TabKind) -> Option<usize> {
        let inner = self.inner.borrow();
        inner
            .tabs
            .iter()
            .position(|tab| tab.serv == serv && tab.kind == *kind)
    }

    fn ensure_tab(&self, serv: &str, kind: TabKind) -> usize {
        if let Some(idx) = self.find_tab(serv, &kind) {
            return idx;
        }
        let mut inner = self.inner.borrow_mut();
        inner.tabs.push(Tab {
            serv: serv.to_owned(),
            kind,
        });
        let idx = inner.tabs.len() - 1;
        if inner.current.is_none() {
            inner.current = Some(idx);
        }
        idx
    }

    pub(crate) fn new_server_tab(&self, serv: &str) {
        self.ensure_tab(serv, TabKind::Server);
    }

    pub(crate) fn close_server_tab(&self, serv: &str) {
        let mut inner = self.inner.borrow_mut();
        inner.tabs.retain(|tab| tab.serv != serv);
        inner.current = if inner.tabs.is_empty() { None } else { Some(0) };
    }

    pub(crate) fn new_chan_tab(&self, serv: &str, chan: &ChanNameRef) {
        let idx = self.ensure_tab(serv, TabKind::Chan(chan.to_owned()));
        self.inner.borrow_mut().current = Some(idx);
    }

    pub(crate) fn close_chan_tab(&self, serv: &str, chan: &ChanNameRef) {
        let mut inner = self.inner.borrow_mut();
        inner
            .tabs
            .retain(|tab| !(tab.serv == serv && tab.kind == TabKind::Chan(chan.to_owned())));
        inner.current = if inner.tabs.is_empty() { None } else { Some(0) };
    }

    pub(crate) fn new_user_tab(&self, serv: &str, nick: &str) {
        self.ensure_tab(serv, TabKind::User(nick.to_owned()));
    }

    pub(crate) fn close_user_tab(&self, serv: &str, nick: &str) {
        let mut inner = self.inner.borrow_mut();
        inner
            .tabs
            .retain(|tab| !(tab.serv == serv && tab.kind == TabKind::User(nick.to_owned())));
        inner.current = if inner.tabs.is_empty() { None } else { Some(0) };
    }

    pub(crate) fn user_tab_exists(&self, serv: &str, nick: &str) -> bool {
        self.find_tab(serv, &TabKind::User(nick.to_owned())).is_some()
    }

    pub(crate) fn current_tab(&self) -> Option<MsgSource> {
        let inner = self.inner.borrow();
        let tab = &inner.tabs[inner.current?];
        Some(match &tab.kind {
            TabKind::Server => MsgSource::Serv {
                serv: tab.serv.clone(),
            },
            TabKind::Chan(chan) => MsgSource::Chan {
                serv: tab.serv.clone(),
                chan: chan.clone(),
            },
            TabKind::User(nick) => MsgSource::User {
                serv: tab.serv.clone(),
                nick: nick.clone(),
            },
        })
    }

    /// Switch the current buffer by label (`serv`, `serv/#chan`, or just `#chan` within the
    /// current server).
    pub(crate) fn switch_tab(&self, name: &str) -> bool {
        let current_serv = self.current_tab().map(|src| src.serv_name().to_owned());
        let mut inner = self.inner.borrow_mut();
        let idx = inner.tabs.iter().position(|tab| {
            tab.label() == name
                || (Some(&tab.serv) == current_serv.as_ref()
                    && match &tab.kind {
                        TabKind::Chan(chan) => chan == ChanNameRef::new(name),
                        TabKind::User(nick) => nick == name,
                        TabKind::Server => false,
                    })
        });
        match idx {
            Some(idx) => {
                inner.current = Some(idx);
                let label = inner.tabs[idx].label();
                drop(inner);
                self.print(&label, "(now talking here)");
                true
            }
            None => false,
        }
    }

    fn target_labels(&self, target: &MsgTarget) -> Vec<String> {
        let inner = self.inner.borrow();
        match target {
            MsgTarget::Server { serv } => vec![serv.to_string()],
            MsgTarget::Chan { serv, chan } => vec![format!("{}/{}", serv, chan.display())],
            MsgTarget::User { serv, nick } => vec![format!("{}/{}", serv, nick)],
            MsgTarget::AllServTabs { serv } => inner
                .tabs
                .iter()
                .filter(|tab| tab.serv == **serv)
                .map(Tab::label)
                .collect(),
            MsgTarget::CurrentTab => match inner.current {
                None => vec!["wren".to_owned()],
                Some(idx) => vec![inner.tabs[idx].label()],
            },
        }
    }

    pub(crate) fn add_client_msg(&self, msg: &str, target: &MsgTarget) {
        for label in self.target_labels(target) {
            self.print(&label, msg);
        }
    }

    pub(crate) fn add_client_err_msg(&self, msg: &str, target: &MsgTarget) {
        for label in self.target_labels(target) {
            self.print(&label, &format!("!! {}", msg));
        }
    }

    pub(crate) fn add_msg(&self, msg: &str, target: &MsgTarget) {
        for label in self.target_labels(target) {
            self.print(&label, msg);
        }
    }

    pub(crate) fn add_err_msg(&self, msg: &str, target: &MsgTarget) {
        self.add_client_err_msg(msg, target);
    }

    pub(crate) fn add_privmsg(
        &self,
        sender: &str,
        msg: &str,
        target: &MsgTarget,
        notify: Notify,
        is_action: bool,
    ) {
        let line = if is_action {
            format!("* {} {}", sender, msg)
        } else {
            format!("<{}> {}", sender, msg)
        };
        let line = if notify == Notify::Highlight {
            format!("{} <-- mentions you", line)
        } else {
            line
        };
        for label in self.target_labels(target) {
            self.print(&label, &line);
        }
    }

    pub(crate) fn add_nick(&self, nick: &str, target: &MsgTarget) {
        for label in self.target_labels(target) {
            self.print(&label, &format!("--> {} joined", nick));
        }
    }

    pub(crate) fn remove_nick(&self, nick: &str, reason: Option<&str>, target: &MsgTarget) {
        let line = match reason {
            None => format!("<-- {} left", nick),
            Some(reason) => format!("<-- {} left ({})", nick, reason),
        };
        for label in self.target_labels(target) {
            self.print(&label, &line);
        }
    }

    pub(crate) fn rename_nick(&self, old_nick: &str, new_nick: &str, target: &MsgTarget) {
        for label in self.target_labels(target) {
            self.print(&label, &format!("{} is now known as {}", old_nick, new_nick));
        }
    }

    pub(crate) fn set_topic(&self, topic: &str, serv: &str, chan: &ChanNameRef) {
        self.print(
            &format!("{}/{}", serv, chan.display()),
            &format!("topic: {}", topic),
        );
    }

    pub(crate) fn set_nick(&self, serv: &str, nick: &str) {
        self.print(serv, &format!("your nick is now {}", nick));
    }
}

/// Reads stdin lines and turns them into input events. Lines starting with `/` are commands,
/// everything else is a message to the current buffer.
pub(crate) async fn input_task(ui: UI, snd_ev: tokio::sync::mpsc::Sender<InputEvent>) {
    use tokio::io::AsyncBufReadExt;

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => {
                let _ = snd_ev.send(InputEvent::Abort).await;
                return;
            }
        };

        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        let source = match ui.current_tab() {
            Some(source) => source,
            None => {
                ui.add_client_err_msg(
                    "No buffer yet; use /connect <host>:<port>",
                    &MsgTarget::CurrentTab,
                );
                continue;
            }
        };

        let ev = match utils::parse_slash_command(line) {
            Some(cmd) => InputEvent::Cmd {
                cmd: cmd.to_owned(),
                source,
            },
            None => InputEvent::Msg {
                msg: line.to_owned(),
                source,
            },
        };

        if snd_ev.send(ev).await.is_err() {
            return;
        }
    }
}
