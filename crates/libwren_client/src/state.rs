#![allow(clippy::zero_prefixed_literal)]

//! Per-server connection state: registration, CAP/SASL dialogs, ISUPPORT, the channel tree, and
//! the command/numeric dispatch that mutates all of it.

use crate::chan::{unix_now, Chan, ChanKind, ChanStore, JoinState, Nick, Topic};
use crate::ctcp::{self, ReplyCtx};
use crate::dcc;
use crate::hooks::{Hooks, Infolist, InfolistItem, SignalData, XferPayload};
use crate::isupport::Isupport;
use crate::mode::{self, ModeCtx};
use crate::outqueue::{OutQueueItem, OutQueues, Priority};
use crate::route::contains_nick;
use crate::sasl::{self, SaslFail, ScramClient, SASLAuth};
use crate::snapshot::{
    ChannelRecord, ModelistItemRecord, ModelistRecord, NickRecord, Record, ServerRecord,
};
use crate::utils;
use crate::{AuthMethod, Event, ServerInfo, ServerStatus};

use libwren_common::{irc_eq, Casemapping, ChanName, ChanNameRef};
use libwren_wire as wire;
use libwren_wire::{Cmd, Msg, Pfx};

use log::{debug, warn};

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Instant;

use tokio::sync::mpsc::Sender;

#[derive(Clone)]
pub(crate) struct State {
    inner: Rc<RefCell<StateInner>>,
}

impl State {
    pub(crate) fn new(server_info: ServerInfo) -> State {
        State {
            inner: Rc::new(RefCell::new(StateInner::new(server_info))),
        }
    }

    pub(crate) fn reset(&self) {
        self.inner.borrow_mut().reset()
    }

    pub(crate) fn update(&self, msg: &mut Msg, snd_ev: &mut Sender<Event>) {
        self.inner.borrow_mut().update(msg, snd_ev);
    }

    pub(crate) fn introduce(&self) {
        self.inner.borrow_mut().introduce()
    }

    pub(crate) fn start_registration(&self) {
        self.inner.borrow_mut().start_registration()
    }

    pub(crate) fn send_lag_ping(&self) {
        self.inner.borrow_mut().send_lag_ping()
    }

    pub(crate) fn get_nick(&self) -> String {
        self.inner.borrow().current_nick.clone()
    }

    pub(crate) fn is_nick_accepted(&self) -> bool {
        self.inner.borrow().nick_accepted
    }

    pub(crate) fn get_usermask(&self) -> Option<String> {
        self.inner.borrow().usermask.clone()
    }

    pub(crate) fn status(&self) -> ServerStatus {
        self.inner.borrow().status
    }

    pub(crate) fn set_status(&self, status: ServerStatus) {
        self.inner.borrow_mut().status = status;
    }

    pub(crate) fn set_away(&self, msg: Option<&str>) {
        let mut inner = self.inner.borrow_mut();
        inner.away_status = msg.map(str::to_owned);
        inner.is_away = msg.is_some();
        inner.away_since = msg.map(|_| unix_now());
        let line = wire::away(msg);
        inner.send(Priority::Normal, line);
    }

    pub(crate) fn get_chan_nicks(&self, chan: &ChanNameRef) -> Vec<String> {
        self.inner.borrow().get_chan_nicks(chan)
    }

    pub(crate) fn has_chan(&self, chan: &ChanNameRef) -> bool {
        let inner = self.inner.borrow();
        inner.chans.find(chan, inner.isupport.casemapping).is_some()
    }

    pub(crate) fn casemapping(&self) -> Casemapping {
        self.inner.borrow().isupport.casemapping
    }

    pub(crate) fn send(&self, prio: Priority, line: String) {
        self.inner.borrow_mut().send(prio, line)
    }

    pub(crate) fn leave_channel(&self, chan: &ChanNameRef, reason: Option<&str>) {
        self.inner.borrow_mut().leave_channel(chan, reason)
    }

    /// Reconnect delay for the next attempt: the configured base, doubled per consecutive
    /// failure, capped at ten times the base.
    pub(crate) fn next_reconnect_delay_secs(&self) -> u64 {
        let mut inner = self.inner.borrow_mut();
        let base = inner.server_info.autoreconnect_delay_secs.max(1);
        let attempts = inner.reconnect_attempts;
        inner.reconnect_attempts = inner.reconnect_attempts.saturating_add(1);
        (base << attempts.min(16)).min(base * 10)
    }

    pub(crate) fn clear_reconnect_attempts(&self) {
        self.inner.borrow_mut().reconnect_attempts = 0;
    }

    pub(crate) fn take_disconnect_request(&self) -> Option<bool> {
        self.inner.borrow_mut().want_disconnect.take()
    }

    /// Aborts a SASL dialog that outlived `sasl_timeout`. Returns whether an abort happened; the
    /// configured `sasl_fail` policy decides what happens to the connection.
    pub(crate) fn check_sasl_timeout(&self, snd_ev: &mut Sender<Event>) -> bool {
        let expired = {
            let inner = self.inner.borrow();
            match inner.sasl_started {
                None => false,
                Some(started) => {
                    started.elapsed().as_secs() >= inner.server_info.sasl_timeout_secs
                }
            }
        };
        if expired {
            let mut inner = self.inner.borrow_mut();
            inner.send(Priority::High, wire::authenticate("*"));
            inner.sasl_finished(false, "SASL authentication timed out", snd_ev);
        }
        expired
    }

    pub(crate) fn drain_ready_out_line(&self, now: Instant) -> Option<OutQueueItem> {
        let mut inner = self.inner.borrow_mut();
        match inner.status {
            // No message is sent on a socket that is not authenticating/registered
            ServerStatus::Authenticating | ServerStatus::Registered => inner.outq.pop_ready(now),
            _ => None,
        }
    }

    pub(crate) fn clear_outqueue(&self) {
        self.inner.borrow_mut().outq.clear();
    }

    pub(crate) fn with_hooks<R>(&self, f: impl FnOnce(&mut Hooks) -> R) -> R {
        f(&mut self.inner.borrow_mut().hooks)
    }

    pub(crate) fn run_modifier(&self, name: &str, input: &str) -> String {
        // snapshot the registry so a callback can safely reach back into the engine
        let hooks = self.inner.borrow().hooks.clone();
        hooks.run_modifier(name, input)
    }

    pub(crate) fn has_modifier(&self, name: &str) -> bool {
        self.inner.borrow().hooks.has_modifier(name)
    }

    pub(crate) fn signal(&self, name: &str, data: &SignalData) {
        let hooks = self.inner.borrow().hooks.clone();
        hooks.send_signal(name, data);
    }

    pub(crate) fn send_ctcp_request(&self, target: &str, ty: &str, args: Option<&str>) {
        self.inner.borrow_mut().send_ctcp_request(target, ty, args)
    }

    pub(crate) fn build_autojoin(&self) -> Option<String> {
        self.inner.borrow().chans.build_autojoin()
    }

    pub(crate) fn infolist(&self, name: &str) -> Option<Infolist> {
        self.inner.borrow().infolist(name)
    }

    pub(crate) fn snapshot_records(&self) -> Vec<Record> {
        self.inner.borrow().snapshot_records()
    }

    /// Skip the automatic JOIN after the next registration (`/connect -nojoin`).
    pub(crate) fn set_nojoin_once(&self) {
        self.inner.borrow_mut().nojoin_once = true;
    }

    /// Resolves the display buffer for a message name through the per-message routing policy.
    pub(crate) fn route_target(
        &self,
        message: &str,
        alias: Option<&str>,
        nick: Option<&str>,
    ) -> crate::route::Target {
        let inner = self.inner.borrow();
        let casemapping = inner.isupport.casemapping;
        inner.server_info.router.target_for(
            &inner.server_info.name,
            message,
            alias,
            nick,
            |nick| {
                inner
                    .chans
                    .find(ChanNameRef::new(nick), casemapping)
                    .map(|chan| chan.kind == ChanKind::Private)
                    .unwrap_or(false)
            },
        )
    }

    /// `nick!user` of a nick in a channel, when known. Used to build ban masks.
    pub(crate) fn get_nick_host(&self, chan: &ChanNameRef, nick: &str) -> Option<String> {
        let inner = self.inner.borrow();
        let casemapping = inner.isupport.casemapping;
        inner
            .chans
            .find(chan, casemapping)
            .and_then(|chan_state| chan_state.find_nick(nick, casemapping))
            .and_then(|nick_state| nick_state.host.clone())
    }
}

enum SaslSession {
    /// Mechanism announced, waiting for the server's `AUTHENTICATE +`.
    Started,
    /// Client-first sent, waiting for server-first.
    Scram(ScramClient),
    /// Client-final sent, waiting for server-final.
    ScramFinal(ScramClient),
    /// Credentials sent, waiting for the result numeric.
    Done,
}

struct StateInner {
    server_info: ServerInfo,

    /// Nicks to try, in this order.
    nicks: Vec<String>,

    /// An index to `nicks`. When out of range we add `current_nick_idx - nicks.len()` underscores
    /// to the last nick in `nicks`.
    current_nick_idx: usize,

    current_nick: String,

    /// Do we have a nick yet? Try the next nick on 432/433/436/437 until we do.
    nick_accepted: bool,

    /// Our current user modes, letters only.
    nick_modes: String,

    auth_method: AuthMethod,

    /// Our usermask as told by the server (396, or our own JOIN).
    usermask: Option<String>,

    /// Away reason if away mode is on, `None` otherwise.
    away_status: Option<String>,
    is_away: bool,
    away_since: Option<u64>,

    /// servername to be used in PING messages. Read from 002 RPL_YOURHOST.
    servername: Option<String>,

    status: ServerStatus,

    isupport: Isupport,

    /// Capabilities the server offered in `CAP LS`.
    caps_available: HashMap<String, Option<String>>,

    /// Capabilities acknowledged by the server.
    caps_enabled: HashSet<String>,

    /// Set while a multiline `CAP LS` reply is being accumulated.
    cap_ls_in_progress: bool,

    /// Sent our registration commands (NICK/USER) yet?
    introduced: bool,

    cap_end_sent: bool,

    sasl: Option<SaslSession>,

    chans: ChanStore,

    outq: OutQueues,

    hooks: Hooks,

    lag_ms: Option<u64>,

    reconnect_attempts: u32,

    /// Set by dispatch when the connection must go down; the main loop picks it up. The payload
    /// is "schedule a reconnect".
    want_disconnect: Option<bool>,

    /// Skip the automatic JOIN after the next registration.
    nojoin_once: bool,

    /// When the SASL dialog started; bounds it with `sasl_timeout`.
    sasl_started: Option<Instant>,
}

impl StateInner {
    fn new(server_info: ServerInfo) -> StateInner {
        let current_nick = server_info.nicks.first().cloned().unwrap_or_default();
        let mut chans = ChanStore::default();
        for chan in &server_info.auto_join {
            let chan_state =
                chans.get_or_create(chan.name(), ChanKind::Channel, Casemapping::default());
            chan_state.key = chan.key().map(str::to_owned);
        }
        let outq = OutQueues::new(
            server_info.anti_flood_prio_high_ms,
            server_info.anti_flood_prio_low_ms,
        );
        StateInner {
            nicks: server_info.nicks.clone(),
            current_nick_idx: 0,
            current_nick,
            nick_accepted: false,
            nick_modes: String::new(),
            auth_method: AuthMethod::None,
            usermask: None,
            away_status: None,
            is_away: false,
            away_since: None,
            servername: None,
            status: ServerStatus::Disconnected,
            isupport: Isupport::default(),
            caps_available: HashMap::new(),
            caps_enabled: HashSet::new(),
            cap_ls_in_progress: false,
            introduced: false,
            cap_end_sent: false,
            sasl: None,
            chans,
            outq,
            hooks: Hooks::default(),
            lag_ms: None,
            reconnect_attempts: 0,
            want_disconnect: None,
            nojoin_once: false,
            sasl_started: None,
            server_info,
        }
    }

    fn reset(&mut self) {
        self.nick_accepted = false;
        self.nicks = self.server_info.nicks.clone();
        self.current_nick_idx = 0;
        self.current_nick = self.nicks.first().cloned().unwrap_or_default();
        self.nick_modes.clear();
        self.auth_method = AuthMethod::None;
        self.usermask = None;
        self.servername = None;
        self.isupport = Isupport::default();
        self.caps_available.clear();
        self.caps_enabled.clear();
        self.cap_ls_in_progress = false;
        self.introduced = false;
        self.cap_end_sent = false;
        self.sasl = None;
        self.lag_ms = None;
        self.outq.clear();
        // Keep the channel set: it is what re-joins on reconnect
        self.chans.reset_all();
    }

    //
    // Sending
    //

    /// Runs the outbound modifiers and enqueues the line. `line` includes the trailing CRLF.
    fn send(&mut self, prio: Priority, line: String) {
        let bare = line.trim_end_matches("\r\n");
        let cmd_name = bare.split(' ').next().unwrap_or("").to_uppercase();

        let mut modified = self
            .hooks
            .run_modifier(&format!("irc_out1_{}", cmd_name), bare);
        modified = self.hooks.run_modifier("irc_out", &modified);

        if modified.is_empty() {
            debug!("outbound message dropped by modifier: {}", bare);
            return;
        }

        if modified == bare {
            self.outq.enqueue(prio, None, line, false, Vec::new());
        } else {
            self.outq.enqueue(
                prio,
                Some(bare.to_owned()),
                format!("{}\r\n", modified),
                true,
                Vec::new(),
            );
        }
    }

    /// PASS/NICK/USER. With CAP or SASL configured this runs only once the `CAP LS` reply told us
    /// what the server offers.
    fn introduce(&mut self) {
        if self.introduced {
            return;
        }
        self.introduced = true;
        if let Some(ref pass) = self.server_info.pass {
            let line = wire::pass(pass);
            self.send(Priority::High, line);
        }
        let nick = self.current_nick.clone();
        self.send(Priority::High, wire::nick(&nick));
        let line = wire::user(&self.server_info.username, &self.server_info.realname);
        self.send(Priority::High, line);
    }

    /// First thing after the transport is up: `CAP LS 302` when capabilities are in play,
    /// otherwise plain registration. Avoids getting stuck in nick registration when the server
    /// wants the CAP dialog finished first.
    fn start_registration(&mut self) {
        self.status = ServerStatus::Authenticating;
        if !self.server_info.capabilities.is_empty() || self.server_info.sasl_auth.is_some() {
            self.send(Priority::High, wire::cap_ls());
        } else {
            self.introduce();
        }
    }

    fn send_lag_ping(&mut self) {
        let token = format!("LAG{}", unix_now_ms());
        let line = wire::ping(&token);
        self.send(Priority::High, line);
    }

    fn get_next_nick(&mut self) -> &str {
        self.current_nick_idx += 1;
        if self.current_nick_idx >= self.nicks.len() {
            let n_underscores = self.current_nick_idx - self.nicks.len() + 1;
            let mut new_nick = self.nicks.last().cloned().unwrap_or_default();
            for _ in 0..n_underscores {
                new_nick.push('_');
            }
            self.current_nick = new_nick;
        } else {
            self.current_nick = self.nicks[self.current_nick_idx].clone();
        }
        &self.current_nick
    }

    fn send_ctcp_request(&mut self, target: &str, ty: &str, args: Option<&str>) {
        let ty = ctcp::sanitize(ty).to_uppercase();
        let args = args.map(ctcp::sanitize);
        let line = wire::ctcp_request(target, &ty, args.as_deref());
        self.send(Priority::High, line);
    }

    fn send_ctcp_reply(&mut self, target: &str, ty: &str, args: Option<&str>) {
        let ty = ctcp::sanitize(ty).to_uppercase();
        let args = args.map(ctcp::sanitize);
        let line = wire::ctcp_reply(target, &ty, args.as_deref());
        self.send(Priority::High, line);
    }

    fn leave_channel(&mut self, chan: &ChanNameRef, reason: Option<&str>) {
        let casemapping = self.isupport.casemapping;
        if let Some(chan_state) = self.chans.find_mut(chan, casemapping) {
            if chan_state.join_state == JoinState::Joined {
                chan_state.join_state = JoinState::Parting;
            }
        }
        let line = wire::part(chan.display(), reason);
        self.send(Priority::Normal, line);
    }

    //
    // Dispatch
    //

    fn update(&mut self, msg: &mut Msg, snd_ev: &mut Sender<Event>) {
        let Msg { tags, pfx, cmd } = msg;
        let _ = tags;
        let pfx: &Option<Pfx> = pfx;

        match cmd {
            Cmd::PING { server } => {
                let line = wire::pong(server);
                self.send(Priority::High, line);
            }

            Cmd::PONG { params } => {
                if let Some(lag_ms) = params
                    .iter()
                    .find_map(|param| param.strip_prefix("LAG"))
                    .and_then(|stamp| stamp.parse::<u64>().ok())
                    .map(|sent| unix_now_ms().saturating_sub(sent))
                {
                    self.lag_ms = Some(lag_ms);
                    let _ = snd_ev.try_send(Event::Lag { lag_ms });
                }
            }

            Cmd::JOIN { chan } => {
                let casemapping = self.isupport.casemapping;
                let (nick, host) = match pfx {
                    Some(Pfx::User { nick, user }) => (nick.clone(), Some(user.clone())),
                    Some(Pfx::Ambiguous(nick)) => (nick.clone(), None),
                    Some(Pfx::Server(_)) | None => return,
                };

                if irc_eq(&nick, &self.current_nick, casemapping) {
                    if let Some(user) = &host {
                        self.usermask = Some(format!("{}!{}", nick, user));
                    }
                    let chan_state =
                        self.chans
                            .get_or_create(chan.as_ref(), ChanKind::Channel, casemapping);
                    chan_state.join_state = JoinState::Joined;
                    chan_state.part = false;
                    chan_state.nicks.clear();
                    chan_state.speaking.clear();
                    // ask for the mode snapshot and the user list details
                    let mode_line = wire::mode(chan.display(), "");
                    let who_line = wire::who(chan.display());
                    self.send(Priority::Low, mode_line);
                    self.send(Priority::Low, who_line);
                } else if let Some(chan_state) = self.chans.find_mut(chan.as_ref(), casemapping) {
                    let mut nick_state = Nick::new(wire::drop_nick_prefix(&nick).to_owned());
                    nick_state.host = host.clone();
                    chan_state.add_nick(nick_state, casemapping);
                } else {
                    debug!("JOIN for unknown channel: {}", chan.display());
                }
            }

            Cmd::PART { chan, .. } => {
                let casemapping = self.isupport.casemapping;
                let nick = match pfx {
                    Some(Pfx::User { nick, .. }) | Some(Pfx::Ambiguous(nick)) => nick.clone(),
                    Some(Pfx::Server(_)) | None => return,
                };
                if irc_eq(&nick, &self.current_nick, casemapping) {
                    if let Some(chan_state) = self.chans.find_mut(chan.as_ref(), casemapping) {
                        chan_state.reset();
                        chan_state.part = true;
                    }
                } else if let Some(chan_state) = self.chans.find_mut(chan.as_ref(), casemapping) {
                    chan_state.remove_nick(wire::drop_nick_prefix(&nick), casemapping);
                } else {
                    debug!("PART for unknown channel: {}", chan.display());
                }
            }

            Cmd::QUIT { chans, .. } => {
                let casemapping = self.isupport.casemapping;
                let nick = match pfx {
                    Some(Pfx::User { nick, .. }) | Some(Pfx::Ambiguous(nick)) => nick.clone(),
                    Some(Pfx::Server(_)) | None => return,
                };
                for chan_state in self.chans.iter_mut() {
                    if chan_state.remove_nick(&nick, casemapping) {
                        chans.push(chan_state.name.clone());
                    }
                }
            }

            Cmd::NICK {
                nick: new_nick,
                chans,
            } => {
                let casemapping = self.isupport.casemapping;
                let new_nick: String = new_nick.clone();
                let old_nick = match pfx {
                    Some(Pfx::User { nick, .. }) | Some(Pfx::Ambiguous(nick)) => nick.clone(),
                    Some(Pfx::Server(_)) | None => return,
                };

                if irc_eq(&old_nick, &self.current_nick, casemapping) {
                    let _ = snd_ev.try_send(Event::NickChange {
                        new_nick: new_nick.clone(),
                    });
                    match utils::find_idx(&self.nicks, |nick| *nick == new_nick) {
                        None => {
                            self.nicks.push(new_nick.clone());
                            self.current_nick_idx = self.nicks.len() - 1;
                        }
                        Some(nick_idx) => {
                            self.current_nick_idx = nick_idx;
                        }
                    }
                    self.current_nick = new_nick.clone();

                    if let Some(pwd) = self.server_info.nickserv_ident.clone() {
                        let line = wire::privmsg("NickServ", &format!("identify {}", pwd));
                        self.send(Priority::Normal, line);
                    }
                }

                for chan_state in self.chans.iter_mut() {
                    if let Some(nick_state) = chan_state.find_nick_mut(&old_nick, casemapping) {
                        nick_state.name = new_nick.clone();
                        chan_state.speaking.rename(&old_nick, &new_nick);
                        chans.push(chan_state.name.clone());
                    }
                }
            }

            Cmd::KICK { chan, nick, .. } => {
                let casemapping = self.isupport.casemapping;
                if irc_eq(nick, &self.current_nick, casemapping) {
                    if let Some(chan_state) = self.chans.find_mut(chan.as_ref(), casemapping) {
                        chan_state.reset();
                        chan_state.part = true;
                        if self.server_info.autorejoin {
                            let line = wire::join(chan.display(), None);
                            self.send(Priority::Normal, line);
                        }
                    }
                } else if let Some(chan_state) = self.chans.find_mut(chan.as_ref(), casemapping) {
                    chan_state.remove_nick(nick, casemapping);
                }
            }

            Cmd::TOPIC { chan, topic } => {
                let casemapping = self.isupport.casemapping;
                let setter = pfx.as_ref().map(|pfx| pfx.host());
                if let Some(chan_state) = self.chans.find_mut(chan.as_ref(), casemapping) {
                    chan_state.topic = if topic.is_empty() {
                        None
                    } else {
                        Some(Topic {
                            text: topic.clone(),
                            setter,
                            time: Some(unix_now()),
                        })
                    };
                }
            }

            Cmd::MODE {
                target,
                modes,
                params,
                smart_filtered,
            } => {
                let casemapping = self.isupport.casemapping;
                if self.isupport.is_channel(target) {
                    let isupport = self.isupport.clone();
                    let ctx = ModeCtx {
                        isupport: &isupport,
                        local_nick: &self.current_nick,
                        smart_filter: self.server_info.smart_filter,
                        smart_filter_modes: &self.server_info.smart_filter_modes,
                        smart_filter_window: self.server_info.smart_filter_delay_secs,
                    };
                    let setter = pfx.as_ref().map(|pfx| pfx.host());
                    let arguments = params.join(" ");
                    if let Some(chan_state) =
                        self.chans.find_mut(ChanNameRef::new(target), casemapping)
                    {
                        *smart_filtered =
                            mode::channel_set(&ctx, chan_state, setter.as_deref(), modes, &arguments);
                    }
                } else if irc_eq(target, &self.current_nick, casemapping) {
                    self.apply_user_modes(modes, false);
                }
            }

            Cmd::PRIVMSG {
                target,
                msg: text,
                is_notice,
                ctcp,
            } => {
                self.handle_privmsg(pfx, target, text, *is_notice, ctcp.as_ref(), snd_ev);
            }

            Cmd::INVITE { .. } | Cmd::WALLOPS { .. } => {}

            Cmd::ACCOUNT { account } => {
                let casemapping = self.isupport.casemapping;
                if let Some(Pfx::User { nick, .. } | Pfx::Ambiguous(nick)) = pfx {
                    for chan_state in self.chans.iter_mut() {
                        if let Some(nick_state) = chan_state.find_nick_mut(nick, casemapping) {
                            nick_state.account = account.clone();
                        }
                    }
                }
            }

            Cmd::AWAY { msg } => {
                // away-notify
                let casemapping = self.isupport.casemapping;
                if let Some(Pfx::User { nick, .. } | Pfx::Ambiguous(nick)) = pfx {
                    for chan_state in self.chans.iter_mut() {
                        if let Some(nick_state) = chan_state.find_nick_mut(nick, casemapping) {
                            nick_state.is_away = msg.is_some();
                        }
                    }
                }
            }

            Cmd::ERROR { .. } => {
                // The server is about to close the link
                self.want_disconnect = Some(true);
            }

            Cmd::CAP {
                client: _,
                subcommand,
                params,
            } => {
                self.handle_cap(subcommand.clone(), params.clone(), snd_ev);
            }

            Cmd::AUTHENTICATE { param } => {
                self.handle_authenticate(param.clone(), snd_ev);
            }

            Cmd::Reply { num, params } => {
                self.handle_numeric(pfx, *num, params, snd_ev);
            }

            Cmd::Other { cmd, params } => {
                debug!("unhandled command {}: {:?}", cmd, params);
            }
        }
    }

    fn handle_privmsg(
        &mut self,
        pfx: &Option<Pfx>,
        target: &wire::MsgTarget,
        text: &str,
        is_notice: bool,
        ctcp: Option<&wire::CTCP>,
        snd_ev: &mut Sender<Event>,
    ) {
        let casemapping = self.isupport.casemapping;
        let sender_nick = pfx.as_ref().and_then(|pfx| pfx.nick()).map(str::to_owned);

        // STATUSMSG targets like `@#chan` still address the channel
        let chan_target: Option<ChanName> = match target {
            wire::MsgTarget::Chan(chan) => Some(chan.clone()),
            wire::MsgTarget::User(name) => {
                let mut chars = name.chars();
                match chars.next() {
                    Some(c) if self.isupport.is_statusmsg_prefix(c) => {
                        let rest = chars.as_str();
                        if self.isupport.is_channel(rest) {
                            Some(ChanNameRef::new(rest).to_owned())
                        } else {
                            None
                        }
                    }
                    _ => None,
                }
            }
        };

        // CTCP requests (and ACTION) are the only structural part here; plain text only feeds
        // the speaking history, display is the consumer's business.
        match (ctcp, is_notice) {
            (Some(wire::CTCP::Action), _) | (None, _) => {
                if let Some(chan) = &chan_target {
                    let highlighted = contains_nick(text, &self.current_nick);
                    let local_nick = self.current_nick.clone();
                    if let Some(chan_state) = self.chans.find_mut(chan.as_ref(), casemapping) {
                        if let Some(nick) = &sender_nick {
                            if !irc_eq(nick, &local_nick, casemapping) {
                                chan_state.speaking.record(nick, highlighted);
                            }
                        }
                    }
                } else if let Some(nick) = &sender_nick {
                    // private message: make sure the conversation exists
                    if !irc_eq(nick, &self.current_nick, casemapping)
                        && matches!(target, wire::MsgTarget::User(name)
                                    if irc_eq(name, &self.current_nick, casemapping))
                    {
                        self.chans.get_or_create(
                            ChanNameRef::new(nick),
                            ChanKind::Private,
                            casemapping,
                        );
                        self.hooks.send_signal("irc_pv", &SignalData::Str(text));
                    }
                }
            }

            (Some(ctcp), false) => {
                let args = if text.is_empty() { None } else { Some(text) };
                if let Some(nick) = sender_nick {
                    self.handle_ctcp_request(&nick, ctcp, args, snd_ev);
                }
            }

            (Some(_), true) => {
                // a CTCP reply to one of our requests; displayed by the consumer
            }
        }
    }

    fn handle_ctcp_request(
        &mut self,
        nick: &str,
        ctcp: &wire::CTCP,
        args: Option<&str>,
        snd_ev: &mut Sender<Event>,
    ) {
        let server_name = self.server_info.name.clone();
        let ctcp_cfg = self.server_info.ctcp.clone();

        match ctcp {
            // ACTION is routed through the message-text path, never here
            wire::CTCP::Action => {}

            wire::CTCP::Dcc => {
                let args = args.unwrap_or("");
                match dcc::parse(args) {
                    Err(err) => {
                        let _ = snd_ev.try_send(Event::Err {
                            msg: format!("cannot parse DCC from {}: {}", nick, err),
                        });
                    }
                    Ok(offer) => {
                        let payload = self.xfer_payload(nick, &offer);
                        let signal = match &offer {
                            dcc::DccOffer::Send { .. } | dcc::DccOffer::Chat { .. } => "xfer_add",
                            dcc::DccOffer::Resume { .. } => "xfer_accept_resume",
                            dcc::DccOffer::Accept { .. } => "xfer_start_resume",
                        };
                        self.hooks.send_signal(signal, &SignalData::Xfer(&payload));
                        self.hooks.send_signal("irc_dcc", &SignalData::Dcc(&offer));
                        let _ = snd_ev.try_send(Event::Dcc {
                            nick: nick.to_owned(),
                            offer,
                        });
                    }
                }
            }

            wire::CTCP::Ping => {
                let reply = ctcp_cfg.reply_for(&server_name, "ping").map(str::to_owned);
                let _ = snd_ev.try_send(Event::CtcpRequest {
                    nick: nick.to_owned(),
                    ty: "PING".to_owned(),
                    args: args.map(str::to_owned),
                    blocked: matches!(reply.as_deref(), Some("")),
                });
                match reply.as_deref() {
                    Some("") => {}
                    // the default PING reply echoes the arguments back
                    None => self.send_ctcp_reply(nick, "PING", args),
                    Some(template) => {
                        let evaluated = ctcp_cfg.eval_reply(&server_name, template, &self.reply_ctx());
                        self.send_ctcp_reply(nick, "PING", Some(&evaluated));
                    }
                }
            }

            wire::CTCP::Version | wire::CTCP::Other(_) => {
                let ty = ctcp.type_str().to_owned();
                match ctcp_cfg.reply_for(&server_name, &ty).map(str::to_owned) {
                    Some(template) => {
                        let _ = snd_ev.try_send(Event::CtcpRequest {
                            nick: nick.to_owned(),
                            ty: ty.to_uppercase(),
                            args: args.map(str::to_owned),
                            blocked: template.is_empty(),
                        });
                        if !template.is_empty() {
                            let evaluated =
                                ctcp_cfg.eval_reply(&server_name, &template, &self.reply_ctx());
                            self.send_ctcp_reply(nick, &ty, Some(&evaluated));
                        }
                    }
                    None => {
                        let _ = snd_ev.try_send(Event::CtcpUnknown {
                            nick: nick.to_owned(),
                            ty: ty.to_uppercase(),
                            args: args.map(str::to_owned),
                        });
                    }
                }
            }
        }
    }

    fn reply_ctx(&self) -> ReplyCtx {
        ReplyCtx {
            username: self.server_info.username.clone(),
            realname: self.server_info.realname.clone(),
        }
    }

    fn xfer_payload(&self, nick: &str, offer: &dcc::DccOffer) -> XferPayload {
        let (type_string, filename, size, start_offset, address, port, token) = match offer {
            dcc::DccOffer::Send {
                filename,
                address,
                port,
                size,
                token,
            } => (
                if *port == 0 {
                    "file_recv_passive"
                } else {
                    "file_recv_active"
                },
                Some(filename.clone()),
                Some(*size),
                None,
                Some(address.to_string()),
                *port,
                token.clone(),
            ),
            dcc::DccOffer::Resume {
                filename,
                port,
                start_offset,
                token,
            } => (
                "file_recv_active",
                Some(filename.clone()),
                None,
                Some(*start_offset),
                None,
                *port,
                token.clone(),
            ),
            dcc::DccOffer::Accept {
                filename,
                port,
                start_offset,
                token,
            } => (
                "file_recv_active",
                Some(filename.clone()),
                None,
                Some(*start_offset),
                None,
                *port,
                token.clone(),
            ),
            dcc::DccOffer::Chat { address, port } => (
                "chat_recv",
                None,
                None,
                None,
                Some(address.to_string()),
                *port,
                None,
            ),
        };
        XferPayload {
            plugin_name: "irc".to_owned(),
            plugin_id: self.server_info.name.clone(),
            type_string: type_string.to_owned(),
            protocol_string: "dcc".to_owned(),
            remote_nick: nick.to_owned(),
            local_nick: self.current_nick.clone(),
            filename,
            size,
            start_offset,
            remote_address: address,
            port,
            token,
            proxy: self.server_info.proxy.as_ref().map(|proxy| proxy.host.clone()),
        }
    }

    fn apply_user_modes(&mut self, modes: &str, reset: bool) {
        let had_registered_mode = self.has_registered_mode();
        mode::user_set(&mut self.nick_modes, modes, reset);
        let has_registered_mode = self.has_registered_mode();

        // the configured "registered" umode flips the authentication observable
        if !had_registered_mode && has_registered_mode && self.auth_method == AuthMethod::None {
            self.auth_method = AuthMethod::Other;
        } else if had_registered_mode && !has_registered_mode && self.auth_method == AuthMethod::Other
        {
            self.auth_method = AuthMethod::None;
        }
    }

    fn has_registered_mode(&self) -> bool {
        match self.server_info.registered_mode {
            None => false,
            Some(mode) => self.nick_modes.contains(mode),
        }
    }

    //
    // CAP and SASL
    //

    fn handle_cap(&mut self, subcommand: String, params: Vec<String>, snd_ev: &mut Sender<Event>) {
        // `CAP * LS * :...` marks a continuation line of a multiline reply
        let more = params.len() > 1 && params[0] == "*";
        let caps: Vec<String> = params
            .last()
            .map(|last| last.split(' ').filter(|s| !s.is_empty()).map(str::to_owned).collect())
            .unwrap_or_default();

        match subcommand.as_str() {
            "LS" => {
                if !self.cap_ls_in_progress {
                    self.caps_available.clear();
                    self.cap_ls_in_progress = true;
                }
                for cap in &caps {
                    match cap.split_once('=') {
                        Some((name, value)) => self
                            .caps_available
                            .insert(name.to_owned(), Some(value.to_owned())),
                        None => self.caps_available.insert(cap.clone(), None),
                    };
                }
                if more {
                    return;
                }
                self.cap_ls_in_progress = false;

                self.introduce();

                // request the intersection of configured and offered capabilities
                let mut request: Vec<String> = self
                    .server_info
                    .capabilities
                    .iter()
                    .filter(|cap| self.caps_available.contains_key(*cap))
                    .cloned()
                    .collect();
                if self.server_info.sasl_auth.is_some()
                    && self.caps_available.contains_key("sasl")
                    && !request.iter().any(|cap| cap == "sasl")
                {
                    request.push("sasl".to_owned());
                }

                if self.server_info.sasl_auth.is_some() && !self.caps_available.contains_key("sasl")
                {
                    let _ = snd_ev.try_send(Event::SaslFailure {
                        reason: "server does not support SASL".to_owned(),
                    });
                }

                if request.is_empty() {
                    self.finish_cap();
                } else {
                    let refs: Vec<&str> = request.iter().map(String::as_str).collect();
                    let line = wire::cap_req(&refs);
                    self.send(Priority::High, line);
                }
            }

            "ACK" => {
                for cap in &caps {
                    self.caps_enabled.insert(cap.clone());
                }
                if caps.iter().any(|cap| cap == "sasl") && self.server_info.sasl_auth.is_some() {
                    let mech = self
                        .server_info
                        .sasl_auth
                        .as_ref()
                        .map(|auth| auth.mechanism())
                        .unwrap_or("PLAIN");
                    self.sasl = Some(SaslSession::Started);
                    self.sasl_started = Some(Instant::now());
                    let line = wire::authenticate(mech);
                    self.send(Priority::High, line);
                } else if self.sasl.is_none() {
                    self.finish_cap();
                }
            }

            "NAK" => {
                if caps.iter().any(|cap| cap == "sasl") && self.server_info.sasl_auth.is_some() {
                    let _ = snd_ev.try_send(Event::SaslFailure {
                        reason: "server rejected the sasl capability".to_owned(),
                    });
                }
                self.finish_cap();
            }

            "NEW" => {
                // a capability appeared after registration; request it when configured
                for cap in &caps {
                    let name = cap.split('=').next().unwrap_or(cap).to_owned();
                    self.caps_available.insert(name.clone(), None);
                }
                let request: Vec<String> = caps
                    .iter()
                    .filter_map(|cap| {
                        let name = cap.split('=').next().unwrap_or(cap);
                        if self.server_info.capabilities.iter().any(|c| c == name) {
                            Some(name.to_owned())
                        } else {
                            None
                        }
                    })
                    .collect();
                if !request.is_empty() {
                    let refs: Vec<&str> = request.iter().map(String::as_str).collect();
                    let line = wire::cap_req(&refs);
                    self.send(Priority::High, line);
                }
            }

            "DEL" => {
                for cap in &caps {
                    let name = cap.split('=').next().unwrap_or(cap);
                    self.caps_available.remove(name);
                    self.caps_enabled.remove(name);
                }
            }

            "LIST" => {
                self.caps_enabled = caps.into_iter().collect();
            }

            other => {
                debug!("ignoring CAP subcommand {}", other);
            }
        }
    }

    fn finish_cap(&mut self) {
        if !self.cap_end_sent && self.status == ServerStatus::Authenticating {
            self.cap_end_sent = true;
            self.send(Priority::High, wire::cap_end());
        }
    }

    fn handle_authenticate(&mut self, param: String, snd_ev: &mut Sender<Event>) {
        let auth = match self.server_info.sasl_auth.clone() {
            Some(auth) => auth,
            None => return,
        };

        let session = self.sasl.take();
        match (session, param.as_str()) {
            (Some(SaslSession::Started), "+") => {
                // server accepted the mechanism; send the first client message
                match auth {
                    SASLAuth::Plain { username, password } => {
                        let payload = sasl::plain_payload(&username, &password);
                        self.send_authenticate_payload(&payload);
                        self.sasl = Some(SaslSession::Done);
                    }
                    SASLAuth::External { .. } => {
                        // identity comes from the TLS client certificate
                        self.send_authenticate_payload("");
                        self.sasl = Some(SaslSession::Done);
                    }
                    SASLAuth::ScramSha256 { username, password } => {
                        let mut scram = ScramClient::new(&username, &password);
                        let payload = scram.client_first();
                        self.send_authenticate_payload(&payload);
                        self.sasl = Some(SaslSession::Scram(scram));
                    }
                }
            }

            (Some(SaslSession::Scram(mut scram)), data) => {
                match scram.process_server_first(data) {
                    Ok(client_final) => {
                        self.send_authenticate_payload(&client_final);
                        self.sasl = Some(SaslSession::ScramFinal(scram));
                    }
                    Err(err) => {
                        let _ = snd_ev.try_send(Event::SaslFailure {
                            reason: err.to_string(),
                        });
                        self.send(Priority::High, wire::authenticate("*"));
                        self.sasl = None;
                    }
                }
            }

            (Some(SaslSession::ScramFinal(mut scram)), data) => {
                match scram.verify_server_final(data) {
                    Ok(()) => {
                        // acknowledge the server signature
                        self.send_authenticate_payload("");
                        self.sasl = Some(SaslSession::Done);
                    }
                    Err(err) => {
                        let _ = snd_ev.try_send(Event::SaslFailure {
                            reason: err.to_string(),
                        });
                        self.send(Priority::High, wire::authenticate("*"));
                        self.sasl = None;
                    }
                }
            }

            (session, _) => {
                self.sasl = session;
                warn!("unexpected AUTHENTICATE: {}", param);
            }
        }
    }

    fn send_authenticate_payload(&mut self, payload: &str) {
        for chunk in sasl::chunk_payload(payload) {
            let line = wire::authenticate(&chunk);
            self.send(Priority::High, line);
        }
    }

    fn sasl_finished(&mut self, success: bool, reason: &str, snd_ev: &mut Sender<Event>) {
        self.sasl = None;
        self.sasl_started = None;
        if success {
            self.auth_method = AuthMethod::Sasl;
            self.finish_cap();
            return;
        }
        let _ = snd_ev.try_send(Event::SaslFailure {
            reason: reason.to_owned(),
        });
        match self.server_info.sasl_fail {
            SaslFail::Continue => self.finish_cap(),
            SaslFail::Reconnect => self.want_disconnect = Some(true),
            SaslFail::Disconnect => self.want_disconnect = Some(false),
        }
    }

    //
    // Numerics
    //

    fn handle_numeric(
        &mut self,
        pfx: &Option<Pfx>,
        num: u16,
        params: &[String],
        snd_ev: &mut Sender<Event>,
    ) {
        let casemapping = self.isupport.casemapping;
        match num {
            // RPL_WELCOME
            001 => {
                self.status = ServerStatus::Registered;
                self.nick_accepted = true;
                self.reconnect_attempts = 0;
                if let Some(nick) = params.first() {
                    if !nick.is_empty() && !irc_eq(nick, &self.current_nick, casemapping) {
                        self.current_nick = nick.clone();
                    }
                }
                let _ = snd_ev.try_send(Event::Registered);
                let _ = snd_ev.try_send(Event::NickChange {
                    new_nick: self.current_nick.clone(),
                });
                if let Some(pwd) = self.server_info.nickserv_ident.clone() {
                    let line = wire::privmsg("NickServ", &format!("identify {}", pwd));
                    self.send(Priority::Normal, line);
                }
                for command in self.server_info.command_on_connect.clone() {
                    let line = format!("{}\r\n", command);
                    self.send(Priority::Normal, line);
                }
            }

            // RPL_YOURHOST
            002 => {
                match parse_servername(pfx.as_ref(), params) {
                    None => {
                        debug!("could not parse server name from 002");
                    }
                    Some(servername) => {
                        self.servername = Some(servername);
                    }
                }
            }

            // RPL_MYINFO: fall back to the first param for the server name
            004 => {
                if self.servername.is_none() {
                    self.servername = params.get(1).cloned();
                }
            }

            // RPL_ISUPPORT
            005 => {
                // first param is our nick, the trailing "are supported by this server" text is
                // recognizable by its spaces
                let tokens = params
                    .iter()
                    .skip(1)
                    .filter(|param| !param.contains(' '))
                    .map(String::as_str);
                self.isupport.apply_tokens(tokens);
            }

            // RPL_UMODEIS
            221 => {
                if let Some(modes) = params.get(1) {
                    self.apply_user_modes(modes, true);
                }
            }

            // RPL_UNAWAY / RPL_NOWAWAY
            305 => self.is_away = false,
            306 => {
                self.is_away = true;
                if self.away_since.is_none() {
                    self.away_since = Some(unix_now());
                }
            }

            // RPL_CHANNELMODEIS: full snapshot, replaces what we had
            324 => {
                if let (Some(chan), Some(modes)) = (params.get(1), params.get(2)) {
                    let isupport = self.isupport.clone();
                    let ctx = ModeCtx {
                        isupport: &isupport,
                        local_nick: &self.current_nick,
                        smart_filter: false,
                        smart_filter_modes: "",
                        smart_filter_window: 0,
                    };
                    let arguments = params[3..].join(" ");
                    if let Some(chan_state) =
                        self.chans.find_mut(ChanNameRef::new(chan), casemapping)
                    {
                        chan_state.modes = None;
                        chan_state.key = None;
                        chan_state.limit = 0;
                        mode::channel_set(&ctx, chan_state, None, modes, &arguments);
                    }
                }
            }

            // RPL_TOPIC
            332 => {
                // RFC 2812 says 2 params but some servers add our nick in front
                if params.len() >= 2 {
                    let chan = &params[params.len() - 2];
                    let topic = &params[params.len() - 1];
                    if let Some(chan_state) =
                        self.chans.find_mut(ChanNameRef::new(chan), casemapping)
                    {
                        chan_state.topic = Some(Topic {
                            text: topic.clone(),
                            setter: None,
                            time: None,
                        });
                    }
                }
            }

            // RPL_TOPICWHOTIME
            333 => {
                if let (Some(chan), Some(setter)) = (params.get(1), params.get(2)) {
                    let time = params.get(3).and_then(|t| t.parse::<u64>().ok());
                    if let Some(chan_state) =
                        self.chans.find_mut(ChanNameRef::new(chan), casemapping)
                    {
                        if let Some(topic) = &mut chan_state.topic {
                            topic.setter = Some(setter.clone());
                            topic.time = time;
                        }
                    }
                }
            }

            // RPL_WHOREPLY: fill in user/host details of channel members
            352 => {
                if params.len() >= 7 {
                    let chan = &params[1];
                    let user = &params[2];
                    let host = &params[3];
                    let nick = &params[5];
                    let flags = &params[6];
                    let usermask = format!("{}@{}", user, host);
                    let away = flags.starts_with('G');
                    if let Some(chan_state) =
                        self.chans.find_mut(ChanNameRef::new(chan), casemapping)
                    {
                        if let Some(nick_state) = chan_state.find_nick_mut(nick, casemapping) {
                            nick_state.host = Some(usermask);
                            nick_state.is_away = away;
                        }
                    }
                }
            }

            // RPL_NAMREPLY: accumulate, committed on 366
            353 => {
                if params.len() >= 4 {
                    let prefix_chars = self.isupport.prefix_chars.clone();
                    let chan_state = self.chans.get_or_create(
                        ChanNameRef::new(&params[2]),
                        ChanKind::Channel,
                        casemapping,
                    );
                    let buffer = chan_state.names_buffer.get_or_insert_with(Vec::new);
                    for word in params[3].split_whitespace() {
                        // with multi-prefix a nick can carry several prefix chars
                        let prefixes: String = word
                            .chars()
                            .take_while(|c| prefix_chars.contains(*c))
                            .collect();
                        let mut nick = Nick::new(word[prefixes.len()..].to_owned());
                        nick.prefixes = prefixes;
                        buffer.push(nick);
                    }
                }
            }

            // RPL_ENDOFNAMES
            366 => {
                if let Some(chan) = params.get(1) {
                    if let Some(chan_state) =
                        self.chans.find_mut(ChanNameRef::new(chan), casemapping)
                    {
                        if let Some(nicks) = chan_state.names_buffer.take() {
                            chan_state.nicks = nicks;
                        }
                    }
                }
            }

            // modelist items: 367/368 bans, 346/347 invites, 348/349 exceptions, 728/729 quiets
            346 | 348 | 367 | 728 => {
                let letter = match num {
                    346 => self.isupport_modelist_letter("INVEX", 'I'),
                    348 => self.isupport_modelist_letter("EXCEPTS", 'e'),
                    728 => 'q',
                    _ => 'b',
                };
                // 728 inserts the mode letter as an extra param
                let offset = if num == 728 { 1 } else { 0 };
                if let (Some(chan), Some(mask)) = (params.get(1), params.get(2 + offset)) {
                    let setter = params.get(3 + offset).cloned();
                    let time = params
                        .get(4 + offset)
                        .and_then(|t| t.parse::<u64>().ok())
                        .unwrap_or(0);
                    if let Some(chan_state) =
                        self.chans.find_mut(ChanNameRef::new(chan), casemapping)
                    {
                        let list = chan_state.modelist_mut(letter);
                        if !list.receiving {
                            list.receiving = true;
                            list.items.clear();
                        }
                        list.items.push(crate::chan::ModelistItem {
                            mask: mask.clone(),
                            setter,
                            time,
                        });
                    }
                }
            }

            347 | 349 | 368 | 729 => {
                let letter = match num {
                    347 => self.isupport_modelist_letter("INVEX", 'I'),
                    349 => self.isupport_modelist_letter("EXCEPTS", 'e'),
                    729 => 'q',
                    _ => 'b',
                };
                if let Some(chan) = params.get(1) {
                    if let Some(chan_state) =
                        self.chans.find_mut(ChanNameRef::new(chan), casemapping)
                    {
                        chan_state.modelist_mut(letter).receiving = false;
                    }
                }
            }

            // RPL_HOSTHIDDEN: learn our usermask
            396 => {
                if params.len() == 3 {
                    let usermask = format!(
                        "{}!~{}@{}",
                        self.current_nick, self.server_info.username, params[1]
                    );
                    self.usermask = Some(usermask);
                }
            }

            // RPL_ENDOFMOTD / ERR_NOMOTD: join channels, restore away state
            376 | 422 => {
                if self.nojoin_once {
                    self.nojoin_once = false;
                } else if let Some(autojoin) = self.chans.build_autojoin() {
                    let (chans, keys) = match autojoin.split_once(' ') {
                        Some((chans, keys)) => (chans.to_owned(), Some(keys.to_owned())),
                        None => (autojoin, None),
                    };
                    let line = wire::join(&chans, keys.as_deref());
                    self.send(Priority::Normal, line);
                }
                if self.away_status.is_some() {
                    let away = self.away_status.clone();
                    let line = wire::away(away.as_deref());
                    self.send(Priority::Normal, line);
                }
            }

            // nick errors during registration: walk the configured list
            432 | 433 | 436 | 437 => {
                if !self.nick_accepted {
                    let new_nick = self.get_next_nick().to_owned();
                    let _ = snd_ev.try_send(Event::NickChange {
                        new_nick: new_nick.clone(),
                    });
                    let line = wire::nick(&new_nick);
                    self.send(Priority::High, line);
                }
            }

            // join errors
            471 | 473 | 474 | 475 | 477 => {
                if let (Some(chan), Some(text)) = (params.get(1), params.get(2)) {
                    let _ = snd_ev.try_send(Event::ChannelJoinError {
                        chan: ChanNameRef::new(chan).to_owned(),
                        msg: text.clone(),
                    });
                }
            }

            // SASL numerics
            900 => {
                // logged in
            }
            903 => self.sasl_finished(true, "", snd_ev),
            904 => self.sasl_finished(false, "SASL authentication failed", snd_ev),
            905 => self.sasl_finished(false, "SASL message too long", snd_ev),
            906 => self.sasl_finished(false, "SASL aborted", snd_ev),
            907 => self.sasl_finished(false, "SASL already authenticated", snd_ev),
            908 => {
                let mechs = params.get(1).cloned().unwrap_or_default();
                debug!("server SASL mechanisms: {}", mechs);
            }

            _ => {}
        }
    }

    fn isupport_modelist_letter(&self, token: &str, default: char) -> char {
        self.isupport
            .tokens
            .get(token)
            .and_then(|value| value.as_deref())
            .and_then(|value| value.chars().next())
            .unwrap_or(default)
    }

    fn get_chan_nicks(&self, chan: &ChanNameRef) -> Vec<String> {
        let casemapping = self.isupport.casemapping;
        match self.chans.find(chan, casemapping) {
            None => vec![],
            Some(chan_state) => {
                let mut nicks: Vec<String> =
                    chan_state.nicks.iter().map(|nick| nick.name.clone()).collect();
                nicks.sort_unstable_by(|a, b| {
                    libwren_common::irc_cmp(a, b, casemapping)
                });
                nicks
            }
        }
    }

    //
    // Infolists and snapshot
    //

    fn infolist(&self, name: &str) -> Option<Infolist> {
        let mut infolist = Infolist::default();
        match name {
            "irc_server" => {
                infolist.items.push(
                    InfolistItem::default()
                        .str("name", self.server_info.name.clone())
                        .str("status", status_str(self.status))
                        .str("nick", self.current_nick.clone())
                        .str("nick_modes", self.nick_modes.clone())
                        .str("casemapping", self.isupport.casemapping.as_str())
                        .str("chantypes", self.isupport.chantypes.clone())
                        .str("prefix_modes", self.isupport.prefix_modes.clone())
                        .str("prefix_chars", self.isupport.prefix_chars.clone())
                        .int("lag", self.lag_ms.unwrap_or(0) as i64)
                        .int("is_away", self.is_away as i64),
                );
            }
            "irc_channel" => {
                for chan in self.chans.iter() {
                    infolist.items.push(
                        InfolistItem::default()
                            .str("name", chan.name.display())
                            .str(
                                "type",
                                if chan.kind == ChanKind::Channel {
                                    "channel"
                                } else {
                                    "private"
                                },
                            )
                            .str("topic", chan.topic.as_ref().map(|t| t.text.clone()).unwrap_or_default())
                            .str("modes", chan.modes.clone().unwrap_or_default())
                            .str("key", chan.key.clone().unwrap_or_default())
                            .int("limit", chan.limit as i64)
                            .int("nicks_count", chan.nicks.len() as i64),
                    );
                }
            }
            "irc_nick" => {
                for chan in self.chans.iter() {
                    for nick in &chan.nicks {
                        infolist.items.push(
                            InfolistItem::default()
                                .str("channel", chan.name.display())
                                .str("name", nick.name.clone())
                                .str("host", nick.host.clone().unwrap_or_default())
                                .str("prefixes", nick.prefixes.clone())
                                .str("account", nick.account.clone().unwrap_or_default())
                                .int("is_away", nick.is_away as i64),
                        );
                    }
                }
            }
            "irc_modelist" => {
                for chan in self.chans.iter() {
                    for list in &chan.modelists {
                        infolist.items.push(
                            InfolistItem::default()
                                .str("channel", chan.name.display())
                                .str("type", list.letter.to_string())
                                .int("items_count", list.items.len() as i64),
                        );
                    }
                }
            }
            "irc_modelist_item" => {
                for chan in self.chans.iter() {
                    for list in &chan.modelists {
                        for (idx, item) in list.items.iter().enumerate() {
                            infolist.items.push(
                                InfolistItem::default()
                                    .str("channel", chan.name.display())
                                    .str("type", list.letter.to_string())
                                    .int("number", idx as i64)
                                    .str("mask", item.mask.clone())
                                    .str("setter", item.setter.clone().unwrap_or_default())
                                    .int("time", item.time as i64),
                            );
                        }
                    }
                }
            }
            _ => return None,
        }
        Some(infolist)
    }

    fn snapshot_records(&self) -> Vec<Record> {
        let mut records = Vec::with_capacity(1 + self.chans.len());
        records.push(Record::Server(ServerRecord {
            name: self.server_info.name.clone(),
            status: status_str(self.status).to_owned(),
            current_nick: if self.current_nick.is_empty() {
                None
            } else {
                Some(self.current_nick.clone())
            },
            nick_modes: self.nick_modes.clone(),
            addresses: self
                .server_info
                .addrs
                .iter()
                .map(|addr| format!("{}/{}", addr.host, addr.port))
                .collect(),
            capabilities_enabled: {
                let mut caps: Vec<String> = self.caps_enabled.iter().cloned().collect();
                caps.sort();
                caps
            },
            casemapping: self.isupport.casemapping.as_str().to_owned(),
            chantypes: self.isupport.chantypes.clone(),
            chanmodes: self.isupport.chanmodes.clone(),
            prefix_modes: self.isupport.prefix_modes.clone(),
            prefix_chars: self.isupport.prefix_chars.clone(),
            out_queue: self.outq.remnants(),
        }));
        for chan in self.chans.iter() {
            records.push(Record::Channel(ChannelRecord {
                server: self.server_info.name.clone(),
                name: chan.name.display().to_owned(),
                kind: if chan.kind == ChanKind::Channel {
                    "channel".to_owned()
                } else {
                    "private".to_owned()
                },
                topic: chan.topic.as_ref().map(|t| t.text.clone()),
                topic_setter: chan.topic.as_ref().and_then(|t| t.setter.clone()),
                topic_time: chan.topic.as_ref().and_then(|t| t.time),
                modes: chan.modes.clone(),
                limit: chan.limit,
                key: chan.key.clone(),
                nicks: chan
                    .nicks
                    .iter()
                    .map(|nick| NickRecord {
                        name: nick.name.clone(),
                        prefixes: nick.prefixes.clone(),
                        host: nick.host.clone(),
                        account: nick.account.clone(),
                        realname: nick.realname.clone(),
                        away: nick.is_away,
                    })
                    .collect(),
                modelists: chan
                    .modelists
                    .iter()
                    .map(|list| ModelistRecord {
                        letter: list.letter,
                        items: list
                            .items
                            .iter()
                            .map(|item| ModelistItemRecord {
                                mask: item.mask.clone(),
                                setter: item.setter.clone(),
                                time: item.time,
                            })
                            .collect(),
                    })
                    .collect(),
            }));
        }
        records
    }
}

fn status_str(status: ServerStatus) -> &'static str {
    match status {
        ServerStatus::Disconnected => "disconnected",
        ServerStatus::Connecting => "connecting",
        ServerStatus::Authenticating => "authenticating",
        ServerStatus::Registered => "registered",
        ServerStatus::Disconnecting => "disconnecting",
    }
}

fn unix_now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

const SERVERNAME_PREFIX: &str = "Your host is ";

/// Parse the server name from a RPL_YOURHOST reply or fall back to the message prefix.
fn parse_servername(pfx: Option<&Pfx>, params: &[String]) -> Option<String> {
    parse_yourhost_msg(params).or_else(|| parse_server_pfx(pfx))
}

fn parse_yourhost_msg(params: &[String]) -> Option<String> {
    let msg = params.get(1).or_else(|| params.first())?;
    let rest = msg.strip_prefix(SERVERNAME_PREFIX)?;
    let servername_ends = rest.find('[').or_else(|| rest.find(','))?;
    let servername = &rest[..servername_ends];
    if servername.is_empty() {
        None
    } else {
        Some(servername.to_owned())
    }
}

fn parse_server_pfx(pfx: Option<&Pfx>) -> Option<String> {
    match pfx {
        Some(Pfx::Server(server_name)) | Some(Pfx::Ambiguous(server_name)) => {
            Some(server_name.to_owned())
        }
        Some(Pfx::User { .. }) | None => None,
    }
}
