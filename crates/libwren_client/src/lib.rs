#![recursion_limit = "512"]
#![allow(clippy::cognitive_complexity)]
#![allow(clippy::too_many_arguments)]

//! The IRC protocol engine: per-server lifecycle (configuration, DNS/proxy handshake, login,
//! connected, disconnect, reconnect), anti-flood out-queues, channel/nick state, CTCP/DCC, and
//! the hook surface consumed by external subsystems.
//!
//! Everything runs on a single task spawned on the caller's `LocalSet`; the only OS-level
//! concurrency is the connection worker, which reports a one-byte status over a pipe.

mod chan;
mod ctcp;
mod dcc;
mod error;
mod hooks;
mod isupport;
mod mode;
mod outqueue;
mod pinger;
mod route;
mod sasl;
mod snapshot;
mod state;
mod stream;
mod url;
mod utils;
mod worker;

pub use chan::{ChanKind, JoinState, Modelist, ModelistItem, Nick, Topic};
pub use ctcp::CtcpConfig;
pub use dcc::{DccOffer, DccParseError};
pub use error::{ConnectError, TlsError};
pub use hooks::{
    HookId, Infolist, InfolistItem, InfolistVar, ModifierCb, SignalCb, SignalData, XferPayload,
};
pub use outqueue::Priority;
pub use route::{contains_nick, message_tags, BufferSpec, PrivateFallback, Router, Target};
pub use sasl::{SaslFail, SASLAuth};
pub use snapshot::{read_records, write_records, ChannelRecord, Record, ServerRecord};
pub use stream::TlsVerify;
pub use url::{parse_url, UrlError, UrlServer, DEFAULT_PORT, DEFAULT_TLS_PORT};
pub use worker::{ConnectStatus, Proxy, ProxyType};

pub use libwren_common::{
    irc_cmp, irc_cmp_n, irc_eq, Casemapping, Chan, ChanName, ChanNameRef, Notify,
};
pub use libwren_wire as wire;

use pinger::Pinger;
use state::State;
use stream::{Stream, TlsParams};

use futures::future::FutureExt;
use futures::stream::{Fuse, StreamExt};
use futures::{pin_mut, select};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[macro_use]
extern crate log;

//
// Public API
//

/// One `host[/port]` entry of a server's address list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddr {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Disconnected,
    Connecting,
    Authenticating,
    Registered,
    Disconnecting,
}

/// How the user got authenticated to services, as far as the engine can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    None,
    Sasl,
    /// The configured "registered" user mode appeared without SASL.
    Other,
}

/// Everything the engine needs to know about one server. Constructed from the configuration file
/// or from an `irc://` URL.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    /// Unique server name (not necessarily the address).
    pub name: String,

    /// Addresses to try, in order. A failed connection attempt moves to the next one.
    pub addrs: Vec<ServerAddr>,

    pub proxy: Option<Proxy>,
    pub ipv6: bool,

    pub tls: bool,
    pub tls_verify: TlsVerify,

    /// Server password (PASS).
    pub pass: Option<String>,

    /// Capabilities to request when the server offers them.
    pub capabilities: Vec<String>,

    pub sasl_auth: Option<SASLAuth>,
    pub sasl_fail: SaslFail,

    /// Nicks to try when connecting, in order. When exhausted, underscores are appended to the
    /// last one.
    pub nicks: Vec<String>,

    pub username: String,
    pub realname: String,

    /// Local address to bind before connecting.
    pub local_hostname: Option<String>,

    /// Raw IRC lines to send after registration.
    pub command_on_connect: Vec<String>,

    /// Channels to join after connecting, with optional keys.
    pub auto_join: Vec<Chan>,

    /// Rejoin a channel when we get kicked from it.
    pub autorejoin: bool,

    pub autoconnect: bool,
    pub autoreconnect: bool,
    pub autoreconnect_delay_secs: u64,

    pub anti_flood_prio_high_ms: u64,
    pub anti_flood_prio_low_ms: u64,

    /// Seconds from `connect` to `001` before the attempt is abandoned.
    pub connection_timeout_secs: u64,
    pub sasl_timeout_secs: u64,

    pub lag_check_secs: u64,
    /// Force a disconnect when a lag check stays unanswered this long. 0 disables.
    pub lag_reconnect_secs: u64,

    /// NickServ password, sent after registration and on nick change.
    pub nickserv_ident: Option<String>,

    /// User mode letter the network sets on identified users.
    pub registered_mode: Option<char>,

    pub smart_filter: bool,
    pub smart_filter_modes: String,
    pub smart_filter_delay_secs: u64,

    pub ctcp: CtcpConfig,
    pub router: Router,
}

impl Default for ServerInfo {
    fn default() -> ServerInfo {
        ServerInfo {
            name: String::new(),
            addrs: Vec::new(),
            proxy: None,
            ipv6: false,
            tls: false,
            tls_verify: TlsVerify::default(),
            pass: None,
            capabilities: vec!["server-time".to_owned(), "away-notify".to_owned()],
            sasl_auth: None,
            sasl_fail: SaslFail::default(),
            nicks: Vec::new(),
            username: String::new(),
            realname: String::new(),
            local_hostname: None,
            command_on_connect: Vec::new(),
            auto_join: Vec::new(),
            autorejoin: false,
            autoconnect: true,
            autoreconnect: true,
            autoreconnect_delay_secs: 10,
            anti_flood_prio_high_ms: 500,
            anti_flood_prio_low_ms: 2000,
            connection_timeout_secs: 60,
            sasl_timeout_secs: 15,
            lag_check_secs: 60,
            lag_reconnect_secs: 300,
            nickserv_ident: None,
            registered_mode: Some('r'),
            smart_filter: false,
            smart_filter_modes: "+".to_owned(),
            smart_filter_delay_secs: 300,
            ctcp: CtcpConfig::default(),
            router: Router::default(),
        }
    }
}

impl ServerInfo {
    /// Builds a `ServerInfo` from an `irc://` URL, taking everything the URL does not say from
    /// `defaults`.
    pub fn from_url(url: &str, defaults: &ServerInfo) -> Result<ServerInfo, UrlError> {
        let parsed = parse_url(url)?;
        let mut info = defaults.clone();
        info.name = parsed.name;
        info.addrs = vec![ServerAddr {
            host: parsed.host,
            port: parsed.port,
        }];
        info.ipv6 = parsed.ipv6;
        info.tls = parsed.tls;
        if parsed.password.is_some() {
            info.pass = parsed.password;
        }
        if !parsed.nicks.is_empty() {
            info.nicks = parsed.nicks;
        }
        info.auto_join = parsed
            .autojoin
            .iter()
            .map(|chan| Chan::Name(ChanNameRef::new(chan).to_owned()))
            .collect();
        Ok(info)
    }
}

/// IRC client events. Returned by `Client` to the users via a channel.
#[derive(Debug)]
pub enum Event {
    /// The connection worker started (DNS + TCP, possibly via a proxy).
    ResolvingHost,
    /// Which address the worker is trying.
    Connecting { host: String, port: u16 },
    /// Transport established (TCP, and TLS when configured); registration started.
    Connected,
    /// `001` received.
    Registered,
    /// The connection worker failed.
    ConnectError(ConnectStatus),
    /// Disconnected from the server. `reconnect_secs` is set when a reconnect is scheduled.
    Disconnected { reconnect_secs: Option<u64> },
    /// An IO error happened.
    IoErr(std::io::Error),
    /// A TLS error happened.
    TlsErr(TlsError),
    /// Remote end closed the connection.
    ConnectionClosed,
    /// Nick changed, or a new nick is being tried.
    NickChange { new_nick: String },
    /// A message from the server.
    Msg(wire::Msg),
    /// A wire-protocol error. The connection is kept.
    WireError(String),
    /// Lag measured from a PING/PONG round trip.
    Lag { lag_ms: u64 },
    /// A CTCP request was received (and answered or blocked).
    CtcpRequest {
        nick: String,
        ty: String,
        args: Option<String>,
        blocked: bool,
    },
    /// A CTCP request we have no reply for.
    CtcpUnknown {
        nick: String,
        ty: String,
        args: Option<String>,
    },
    /// A DCC offer, also delivered to the transfer subsystem via signals.
    Dcc { nick: String, offer: DccOffer },
    SaslFailure { reason: String },
    ChannelJoinError { chan: ChanName, msg: String },
    /// A user-visible error line for the server buffer.
    Err { msg: String },
}

/// IRC client handle. Cheap to clone; all clones talk to the same connection task.
#[derive(Clone)]
pub struct Client {
    /// Channel to send commands to the main loop.
    msg_chan: mpsc::Sender<Cmd>,

    serv_name: String,

    /// Reference to the state, to be able to provide methods like `get_nick` and
    /// `is_nick_accepted`.
    state: State,
}

impl Client {
    /// Create a new client. Spawns the connection task on the current `LocalSet`.
    pub fn new(server_info: ServerInfo) -> (Client, mpsc::Receiver<Event>) {
        connect(server_info)
    }

    /// Connect, when the server is disconnected (e.g. created with `autoconnect` off).
    pub fn connect(&mut self) {
        let _ = self.msg_chan.try_send(Cmd::Connect);
    }

    /// Like `connect`, but skip the automatic JOIN after registration.
    pub fn connect_nojoin(&mut self) {
        self.state.set_nojoin_once();
        let _ = self.msg_chan.try_send(Cmd::Connect);
    }

    /// `nick!user` of a nick in a channel, when known. Used to build ban masks.
    pub fn get_nick_host(&self, chan: &ChanNameRef, nick: &str) -> Option<String> {
        self.state.get_nick_host(chan, nick)
    }

    /// Resolves the display buffer for a message name (command, numeric, or alias) through the
    /// user's routing policy.
    pub fn route_target(&self, message: &str, alias: Option<&str>, nick: Option<&str>) -> Target {
        self.state.route_target(message, alias, nick)
    }

    /// Reconnect to the server, possibly using a new port.
    pub fn reconnect(&mut self, port: Option<u16>) {
        debug!("reconnect cmd received, port: {:?}", port);
        let _ = self.msg_chan.try_send(Cmd::Reconnect(port));
    }

    /// Disconnect and stay down until `connect` is called again. Clears the reconnect counter.
    pub fn disconnect(&mut self) {
        let _ = self.msg_chan.try_send(Cmd::Disconnect);
    }

    /// Get the name of this server.
    pub fn get_serv_name(&self) -> &str {
        &self.serv_name
    }

    /// Get current nick. Note that this returns the nick we're currently trying when the nick is
    /// not yet accepted. See `is_nick_accepted`.
    pub fn get_nick(&self) -> String {
        self.state.get_nick()
    }

    /// Is current nick accepted by the server?
    pub fn is_nick_accepted(&self) -> bool {
        self.state.is_nick_accepted()
    }

    pub fn status(&self) -> ServerStatus {
        self.state.status()
    }

    pub fn casemapping(&self) -> Casemapping {
        self.state.casemapping()
    }

    /// Send a message directly to the server. "\r\n" suffix is added by this method.
    pub fn raw_msg(&mut self, msg: &str) {
        self.state.send(Priority::Normal, format!("{}\r\n", msg));
    }

    /// Split a privmsg to multiple messages so that each message, with the hostname and nick
    /// prefix added by the server, fits in one IRC message.
    ///
    /// `extra_len`: Size (in bytes) for a prefix/suffix etc. that'll be added to each line.
    pub fn split_privmsg<'a>(
        &self,
        extra_len: usize,
        msg: &'a str,
    ) -> impl Iterator<Item = &'a str> {
        let mut max = 512; // RFC 2812
        max -= 3; // :, !, @
        max -= 13; // " PRIVMSG ", " ", :, \r, \n
        max -= self.get_nick().len();
        max -= extra_len;
        match self.state.get_usermask() {
            None => {
                max -= 9; // max username
                max -= 64; // max possible hostname (63) + '@'
            }
            Some(ref usermask) => {
                max -= usermask.len();
            }
        }

        assert!(max > 0);

        utils::split_iterator(msg, max)
    }

    /// Send a privmsg. Note that this method does not split long messages into smaller messages;
    /// use `split_privmsg` for that.
    pub fn privmsg(&mut self, target: &str, msg: &str, is_action: bool) {
        let line = if is_action {
            wire::action(target, msg)
        } else {
            wire::privmsg(target, msg)
        };
        self.state.send(Priority::Normal, line);
    }

    pub fn notice(&mut self, target: &str, msg: &str) {
        self.state.send(Priority::Normal, wire::notice(target, msg));
    }

    /// Send a CTCP request (high-priority queue).
    pub fn ctcp(&mut self, target: &str, ty: &str, args: Option<&str>) {
        self.state.send_ctcp_request(target, ty, args);
    }

    /// Join channels. `chans` is a comma-separated list, `keys` likewise (keyed channels first).
    pub fn join(&mut self, chans: &str, keys: Option<&str>) {
        self.state.send(Priority::Normal, wire::join(chans, keys));
    }

    /// Leave a channel.
    pub fn part(&mut self, chan: &ChanNameRef, reason: Option<&str>) {
        self.state.leave_channel(chan, reason);
    }

    /// Set away status. `None` means not away.
    pub fn away(&mut self, msg: Option<&str>) {
        self.state.set_away(msg);
    }

    /// Change nick. This may fail (ERR_NICKNAMEINUSE) so wait for confirmation (a NICK message
    /// back from the server, with the old nick as prefix).
    pub fn nick(&mut self, new_nick: &str) {
        self.state.send(Priority::Normal, wire::nick(new_nick));
    }

    /// Send a QUIT message to the server, with optional "reason". This stops the client; the
    /// sender end of the `Cmd` channel will be dropped.
    pub fn quit(&mut self, reason: Option<String>) {
        debug!("quit cmd received");
        let _ = self.msg_chan.try_send(Cmd::Quit(reason));
    }

    /// Get all nicks in a channel, sorted with the server casemapping.
    pub fn get_chan_nicks(&self, chan: &ChanNameRef) -> Vec<String> {
        self.state.get_chan_nicks(chan)
    }

    pub fn has_chan(&self, chan: &ChanNameRef) -> bool {
        self.state.has_chan(chan)
    }

    /// Rebuilds the autojoin value from the joined channels (keyed channels first).
    pub fn build_autojoin(&self) -> Option<String> {
        self.state.build_autojoin()
    }

    //
    // Hook surface
    //

    pub fn hook_signal(&self, name: &str, priority: i32, cb: SignalCb) -> HookId {
        self.state.with_hooks(|hooks| hooks.hook_signal(name, priority, cb))
    }

    pub fn hook_modifier(&self, name: &str, priority: i32, cb: ModifierCb) -> HookId {
        self.state
            .with_hooks(|hooks| hooks.hook_modifier(name, priority, cb))
    }

    pub fn unhook(&self, id: HookId) {
        self.state.with_hooks(|hooks| hooks.unhook(id));
    }

    /// Iterable snapshot of engine state: `irc_server`, `irc_channel`, `irc_nick`,
    /// `irc_modelist`, `irc_modelist_item`.
    pub fn infolist(&self, name: &str) -> Option<Infolist> {
        self.state.infolist(name)
    }

    /// Typed records for the upgrade snapshot.
    pub fn snapshot_records(&self) -> Vec<Record> {
        self.state.snapshot_records()
    }
}

//
// End of public API
//

#[derive(Debug)]
enum Cmd {
    /// Connect when disconnected.
    Connect,
    /// Reconnect to the server, possibly using a new port.
    Reconnect(Option<u16>),
    /// Disconnect and stay down.
    Disconnect,
    /// Close the connection. This sends a QUIT message to the server (with optional "reason")
    /// and then all tasks return.
    Quit(Option<String>),
}

fn connect(server_info: ServerInfo) -> (Client, mpsc::Receiver<Event>) {
    let serv_name = server_info.name.clone();

    // Channel for returning IRC events to the user.
    let (snd_ev, rcv_ev) = mpsc::channel::<Event>(1000);

    // Channel for commands from the user.
    let (snd_cmd, rcv_cmd) = mpsc::channel::<Cmd>(100);

    let state = State::new(server_info.clone());
    let state_clone = state.clone();

    let task = main_loop(server_info, state_clone, snd_ev, rcv_cmd);
    tokio::task::spawn_local(task);

    (
        Client {
            msg_chan: snd_cmd,
            serv_name,
            state,
        },
        rcv_ev,
    )
}

enum TaskResult<A> {
    Done(A),
    Return,
    Reconnect(Option<u16>),
    Disconnect,
}

async fn main_loop(
    server_info: ServerInfo,
    state: State,
    mut snd_ev: mpsc::Sender<Event>,
    rcv_cmd: mpsc::Receiver<Cmd>,
) {
    let mut rcv_cmd = ReceiverStream::new(rcv_cmd).fuse();

    // We allow changing ports when reconnecting, so `mut`
    let mut port_override: Option<u16> = None;

    let mut addr_idx: usize = 0;

    // Whether to connect at all, and whether to wait before trying
    let mut connect_wanted = server_info.autoconnect;
    let mut wait_secs: Option<u64> = None;

    // Main loop just tries to (re)connect
    'connect: loop {
        if !connect_wanted {
            // Stay down until asked to connect
            match rcv_cmd.next().await {
                None | Some(Cmd::Quit(_)) => return,
                Some(Cmd::Connect) | Some(Cmd::Reconnect(None)) => {}
                Some(Cmd::Reconnect(Some(port))) => {
                    port_override = Some(port);
                }
                Some(Cmd::Disconnect) => continue,
            }
            connect_wanted = true;
            wait_secs = None;
        }

        if let Some(secs) = wait_secs.take() {
            match wait_(secs, &mut rcv_cmd).await {
                TaskResult::Done(()) => {}
                TaskResult::Reconnect(mb_port) => {
                    port_override = mb_port.or(port_override);
                }
                TaskResult::Disconnect => {
                    connect_wanted = false;
                    state.clear_reconnect_attempts();
                    continue;
                }
                TaskResult::Return => {
                    return;
                }
            }
        }

        if server_info.addrs.is_empty() {
            let _ = snd_ev.try_send(Event::Err {
                msg: "server has no address".to_owned(),
            });
            return;
        }

        //
        // Spawn the connection worker (DNS + proxy + TCP connect)
        //

        state.set_status(ServerStatus::Connecting);

        let addr = &server_info.addrs[addr_idx % server_info.addrs.len()];
        addr_idx += 1;
        let connect_host = addr.host.clone();
        let connect_port = port_override.unwrap_or(addr.port);

        let _ = snd_ev.try_send(Event::ResolvingHost);
        let _ = snd_ev.try_send(Event::Connecting {
            host: connect_host.clone(),
            port: connect_port,
        });

        let worker = worker::spawn(
            connect_host.clone(),
            connect_port,
            server_info.ipv6,
            server_info.local_hostname.clone(),
            server_info.proxy.clone(),
        );

        let (status, tcp_stream) = {
            let recv = worker.recv().fuse();
            pin_mut!(recv);
            let timeout =
                tokio::time::sleep(Duration::from_secs(server_info.connection_timeout_secs)).fuse();
            pin_mut!(timeout);
            loop {
                select! {
                    result = recv => {
                        break result;
                    }
                    () = timeout => {
                        // drop the worker; its late result goes nowhere
                        break (ConnectStatus::ConnectionRefused, None);
                    }
                    cmd = rcv_cmd.next() => {
                        match cmd {
                            None | Some(Cmd::Quit(_)) => return,
                            Some(Cmd::Connect) => {}
                            Some(Cmd::Reconnect(mb_port)) => {
                                port_override = mb_port.or(port_override);
                                continue 'connect;
                            }
                            Some(Cmd::Disconnect) => {
                                connect_wanted = false;
                                state.clear_reconnect_attempts();
                                continue 'connect;
                            }
                        }
                    }
                }
            }
        };

        let tcp_stream = match (status, tcp_stream) {
            (ConnectStatus::Ok, Some(tcp_stream)) => tcp_stream,
            (status, _) => {
                debug!("connection worker failed: {:?}", status);
                let _ = snd_ev.try_send(Event::ConnectError(status));
                schedule_reconnect(&state, &server_info, &mut snd_ev, &mut connect_wanted, &mut wait_secs);
                state.set_status(ServerStatus::Disconnected);
                continue;
            }
        };

        //
        // TLS bootstrap
        //

        let stream = if server_info.tls {
            let tls_params = TlsParams {
                verify: server_info.tls_verify.clone(),
                client_cert: match &server_info.sasl_auth {
                    Some(SASLAuth::External { cert, key }) => Some((cert.clone(), key.clone())),
                    _ => None,
                },
            };
            match Stream::new_tls(tcp_stream, &connect_host, &tls_params).await {
                Ok(stream) => stream,
                Err(tls_err) => {
                    let _ = snd_ev.try_send(Event::TlsErr(tls_err));
                    schedule_reconnect(&state, &server_info, &mut snd_ev, &mut connect_wanted, &mut wait_secs);
                    state.set_status(ServerStatus::Disconnected);
                    continue;
                }
            }
        } else {
            match Stream::new_tcp(tcp_stream) {
                Ok(stream) => stream,
                Err(io_err) => {
                    let _ = snd_ev.try_send(Event::IoErr(io_err));
                    schedule_reconnect(&state, &server_info, &mut snd_ev, &mut connect_wanted, &mut wait_secs);
                    state.set_status(ServerStatus::Disconnected);
                    continue;
                }
            }
        };

        let (mut read_half, mut write_half) = tokio::io::split(stream);

        //
        // Transport is up: reset state and start registration
        //

        state.reset();
        state.start_registration();
        let _ = snd_ev.try_send(Event::Connected);
        state.signal("irc_server_connected", &SignalData::Str(&server_info.name));

        // Spawn the pinger task for lag checks
        let (mut pinger, rcv_ping_evs) = Pinger::new(
            Duration::from_secs(server_info.lag_check_secs.max(1)),
            match server_info.lag_reconnect_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        );
        let mut rcv_ping_evs = ReceiverStream::new(rcv_ping_evs).fuse();

        let mut msg_buffer = wire::MsgBuffer::new();
        let mut pacer = tokio::time::interval(outqueue::TICK);
        let registration_deadline =
            Instant::now() + Duration::from_secs(server_info.connection_timeout_secs);

        loop {
            let mut read_buf: [u8; 1024] = [0; 1024];

            // the interval keeps its own deadline, so recreating the tick future per iteration
            // does not reset the pacing
            let tick = pacer.tick().fuse();
            pin_mut!(tick);

            select! {
                cmd = rcv_cmd.next() => {
                    match cmd {
                        None => {
                            debug!("main loop: command channel terminated from the other end");
                            // That's OK, rcv_cmd will never be ready again
                        }
                        Some(Cmd::Connect) => {}
                        Some(Cmd::Reconnect(mb_port)) => {
                            port_override = mb_port.or(port_override);
                            teardown(&state, &mut msg_buffer);
                            let _ = snd_ev.try_send(Event::Disconnected { reconnect_secs: None });
                            signal_disconnected(&state, &server_info);
                            continue 'connect;
                        }
                        Some(Cmd::Disconnect) => {
                            state.set_status(ServerStatus::Disconnecting);
                            teardown(&state, &mut msg_buffer);
                            state.clear_reconnect_attempts();
                            let _ = snd_ev.try_send(Event::Disconnected { reconnect_secs: None });
                            signal_disconnected(&state, &server_info);
                            connect_wanted = false;
                            continue 'connect;
                        }
                        Some(Cmd::Quit(reason)) => {
                            let line = wire::quit(reason.as_deref());
                            let _ = write_half.write_all(line.as_bytes()).await;
                            teardown(&state, &mut msg_buffer);
                            signal_disconnected(&state, &server_info);
                            return;
                        }
                    }
                }
                // It's fine to fuse() the read_half here because we restart the main loop with a
                // new stream when this stream ends, so we never poll it again after it
                // terminates.
                bytes = read_half.read(&mut read_buf).fuse() => {
                    match bytes {
                        Err(io_err) => {
                            debug!("main loop: error when reading from socket: {:?}", io_err);
                            let _ = snd_ev.try_send(Event::IoErr(io_err));
                            teardown(&state, &mut msg_buffer);
                            schedule_reconnect(&state, &server_info, &mut snd_ev, &mut connect_wanted, &mut wait_secs);
                            signal_disconnected(&state, &server_info);
                            continue 'connect;
                        }
                        Ok(0) => {
                            debug!("main loop: read 0 bytes");
                            let _ = snd_ev.try_send(Event::ConnectionClosed);
                            teardown(&state, &mut msg_buffer);
                            schedule_reconnect(&state, &server_info, &mut snd_ev, &mut connect_wanted, &mut wait_secs);
                            signal_disconnected(&state, &server_info);
                            continue 'connect;
                        }
                        Ok(bytes) => {
                            msg_buffer.push_bytes(&read_buf[0..bytes]);
                            handle_inbound(&state, &mut msg_buffer, &mut pinger, &mut snd_ev);
                            if let Some(reconnect) = state.take_disconnect_request() {
                                teardown(&state, &mut msg_buffer);
                                if reconnect {
                                    schedule_reconnect(&state, &server_info, &mut snd_ev, &mut connect_wanted, &mut wait_secs);
                                } else {
                                    let _ = snd_ev.try_send(Event::Disconnected { reconnect_secs: None });
                                    connect_wanted = false;
                                }
                                signal_disconnected(&state, &server_info);
                                continue 'connect;
                            }
                        }
                    }
                }
                _ = tick => {
                    // SASL timeout: abort the dialog, the sasl_fail policy takes it from there
                    if state.check_sasl_timeout(&mut snd_ev) {
                        if let Some(reconnect) = state.take_disconnect_request() {
                            teardown(&state, &mut msg_buffer);
                            if reconnect {
                                schedule_reconnect(&state, &server_info, &mut snd_ev, &mut connect_wanted, &mut wait_secs);
                            } else {
                                let _ = snd_ev.try_send(Event::Disconnected { reconnect_secs: None });
                                connect_wanted = false;
                            }
                            signal_disconnected(&state, &server_info);
                            continue 'connect;
                        }
                    }

                    // registration timeout: no 001 within connection_timeout
                    if state.status() == ServerStatus::Authenticating
                        && Instant::now() > registration_deadline
                    {
                        let _ = snd_ev.try_send(Event::Err {
                            msg: "registration timed out".to_owned(),
                        });
                        teardown(&state, &mut msg_buffer);
                        schedule_reconnect(&state, &server_info, &mut snd_ev, &mut connect_wanted, &mut wait_secs);
                        signal_disconnected(&state, &server_info);
                        continue 'connect;
                    }

                    if let Some(item) = state.drain_ready_out_line(Instant::now()) {
                        let bare = item.line.trim_end_matches("\r\n").to_owned();
                        state.signal("irc_raw_out", &SignalData::Str(&bare));
                        let cmd_name = bare.split(' ').next().unwrap_or("").to_uppercase();
                        state.signal(&format!("irc_out_{}", cmd_name), &SignalData::Str(&bare));

                        if let Err(io_err) = write_half.write_all(item.line.as_bytes()).await {
                            debug!("IO error when writing: {:?}", io_err);
                            let _ = snd_ev.try_send(Event::IoErr(io_err));
                            teardown(&state, &mut msg_buffer);
                            schedule_reconnect(&state, &server_info, &mut snd_ev, &mut connect_wanted, &mut wait_secs);
                            signal_disconnected(&state, &server_info);
                            continue 'connect;
                        }
                    }
                }
                ping_ev = rcv_ping_evs.next() => {
                    match ping_ev {
                        None => {
                            debug!("pinger task terminated unexpectedly");
                        }
                        Some(pinger::Event::SendPing) => {
                            state.send_lag_ping();
                        }
                        Some(pinger::Event::Disconnect) => {
                            // lag timeout
                            let _ = snd_ev.try_send(Event::Err {
                                msg: "no answer to lag check, reconnecting".to_owned(),
                            });
                            teardown(&state, &mut msg_buffer);
                            schedule_reconnect(&state, &server_info, &mut snd_ev, &mut connect_wanted, &mut wait_secs);
                            signal_disconnected(&state, &server_info);
                            continue 'connect;
                        }
                    }
                }
            }
        }
    }
}

/// Inbound bytes became lines: run the hook surface, parse, dispatch, forward.
fn handle_inbound(
    state: &State,
    msg_buffer: &mut wire::MsgBuffer,
    pinger: &mut Pinger,
    snd_ev: &mut mpsc::Sender<Event>,
) {
    while let Some(line) = msg_buffer.next_line() {
        let line = match line {
            Err(err) => {
                let _ = snd_ev.try_send(Event::WireError(err.to_string()));
                continue;
            }
            Ok(line) => line,
        };

        state.signal("irc_raw_in", &SignalData::Str(&line));

        let line = state.run_modifier("irc_in", &line);
        if line.is_empty() {
            debug!("inbound message dropped by modifier");
            continue;
        }

        let mut msg = match wire::parse_one_message(&line) {
            Err(err) => {
                let _ = snd_ev.try_send(Event::WireError(err.to_string()));
                continue;
            }
            Ok(msg) => msg,
        };

        // second-stage per-command modifier; a rewrite means a re-parse
        let cmd_name = wire_cmd_name(&msg.cmd);
        let modifier_name = format!("irc_in2_{}", cmd_name);
        if state.has_modifier(&modifier_name) {
            let modified = state.run_modifier(&modifier_name, &line);
            if modified.is_empty() {
                continue;
            }
            if modified != line {
                match wire::parse_one_message(&modified) {
                    Err(err) => {
                        let _ = snd_ev.try_send(Event::WireError(err.to_string()));
                        continue;
                    }
                    Ok(new_msg) => msg = new_msg,
                }
            }
        }

        state.signal(&format!("irc_in_{}", cmd_name), &SignalData::Str(&line));

        // a lag-check PONG resets the pinger
        if let wire::Cmd::PONG { params } = &msg.cmd {
            if params.iter().any(|param| param.starts_with("LAG")) {
                pinger.reset();
            }
        }

        debug!("parsed msg: {:?}", msg);
        state.update(&mut msg, snd_ev);
        let _ = snd_ev.try_send(Event::Msg(msg));
    }
}

fn wire_cmd_name(cmd: &wire::Cmd) -> String {
    use wire::Cmd::*;
    match cmd {
        PRIVMSG { is_notice, .. } => {
            if *is_notice {
                "NOTICE".to_owned()
            } else {
                "PRIVMSG".to_owned()
            }
        }
        JOIN { .. } => "JOIN".to_owned(),
        PART { .. } => "PART".to_owned(),
        QUIT { .. } => "QUIT".to_owned(),
        NICK { .. } => "NICK".to_owned(),
        KICK { .. } => "KICK".to_owned(),
        TOPIC { .. } => "TOPIC".to_owned(),
        MODE { .. } => "MODE".to_owned(),
        INVITE { .. } => "INVITE".to_owned(),
        ACCOUNT { .. } => "ACCOUNT".to_owned(),
        AWAY { .. } => "AWAY".to_owned(),
        WALLOPS { .. } => "WALLOPS".to_owned(),
        PING { .. } => "PING".to_owned(),
        PONG { .. } => "PONG".to_owned(),
        ERROR { .. } => "ERROR".to_owned(),
        CAP { .. } => "CAP".to_owned(),
        AUTHENTICATE { .. } => "AUTHENTICATE".to_owned(),
        Other { cmd, .. } => cmd.to_uppercase(),
        Reply { num, .. } => format!("{:03}", num),
    }
}

/// Close-connection bookkeeping shared by every exit path: queued lines are dropped and the
/// unterminated inbound tail is abandoned at the frame boundary.
fn teardown(state: &State, msg_buffer: &mut wire::MsgBuffer) {
    state.clear_outqueue();
    msg_buffer.clear();
    state.set_status(ServerStatus::Disconnected);
}

fn signal_disconnected(state: &State, server_info: &ServerInfo) {
    state.signal(
        "irc_server_disconnected",
        &SignalData::Str(&server_info.name),
    );
}

fn schedule_reconnect(
    state: &State,
    server_info: &ServerInfo,
    snd_ev: &mut mpsc::Sender<Event>,
    connect_wanted: &mut bool,
    wait_secs: &mut Option<u64>,
) {
    if server_info.autoreconnect {
        let secs = state.next_reconnect_delay_secs();
        *wait_secs = Some(secs);
        let _ = snd_ev.try_send(Event::Disconnected {
            reconnect_secs: Some(secs),
        });
    } else {
        *connect_wanted = false;
        let _ = snd_ev.try_send(Event::Disconnected {
            reconnect_secs: None,
        });
    }
}

async fn wait_(secs: u64, rcv_cmd: &mut Fuse<ReceiverStream<Cmd>>) -> TaskResult<()> {
    let delay = tokio::time::sleep(Duration::from_secs(secs)).fuse();
    pin_mut!(delay);

    loop {
        select! {
            () = delay => {
                return TaskResult::Done(());
            }
            cmd = rcv_cmd.next() => {
                match cmd {
                    None => {
                        // Channel closed, return from the main loop
                        return TaskResult::Return;
                    }
                    Some(Cmd::Connect) => {
                        return TaskResult::Done(());
                    }
                    Some(Cmd::Reconnect(mb_port)) => {
                        return TaskResult::Reconnect(mb_port);
                    }
                    Some(Cmd::Disconnect) => {
                        return TaskResult::Disconnect;
                    }
                    Some(Cmd::Quit(_)) => {
                        return TaskResult::Return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
