//! State-machine tests: feed wire lines, inspect the queued output and the emitted events.

use crate::state::State;
use crate::{Event, Priority, SASLAuth, ServerAddr, ServerInfo, ServerStatus};

use libwren_common::ChanNameRef;
use libwren_wire as wire;

use std::time::Instant;
use tokio::sync::mpsc;

fn test_server_info() -> ServerInfo {
    ServerInfo {
        name: "example".to_owned(),
        addrs: vec![ServerAddr {
            host: "irc.example.org".to_owned(),
            port: 6667,
        }],
        nicks: vec!["alice".to_owned(), "alice_fallback".to_owned()],
        username: "alice".to_owned(),
        realname: "Alice L.".to_owned(),
        // no anti-flood wait in tests, lines drain immediately
        anti_flood_prio_high_ms: 0,
        anti_flood_prio_low_ms: 0,
        capabilities: vec![],
        smart_filter: true,
        ..ServerInfo::default()
    }
}

fn test_state(server_info: ServerInfo) -> (State, mpsc::Sender<Event>, mpsc::Receiver<Event>) {
    let state = State::new(server_info);
    state.set_status(ServerStatus::Authenticating);
    let (snd_ev, rcv_ev) = mpsc::channel(100);
    (state, snd_ev, rcv_ev)
}

fn feed(state: &State, snd_ev: &mut mpsc::Sender<Event>, line: &str) {
    let mut msg = wire::parse_one_message(line).unwrap();
    state.update(&mut msg, snd_ev);
}

/// Everything queued for sending, in send order, without CRLF.
fn sent_lines(state: &State) -> Vec<String> {
    let mut lines = vec![];
    while let Some(item) = state.drain_ready_out_line(Instant::now()) {
        lines.push(item.line.trim_end_matches("\r\n").to_owned());
    }
    lines
}

fn events(rcv_ev: &mut mpsc::Receiver<Event>) -> Vec<Event> {
    let mut ret = vec![];
    while let Ok(ev) = rcv_ev.try_recv() {
        ret.push(ev);
    }
    ret
}

#[test]
fn plain_registration() {
    let mut info = test_server_info();
    info.pass = Some("hunter2".to_owned());
    let (state, _snd, _rcv) = test_state(info);

    state.start_registration();
    assert_eq!(
        sent_lines(&state),
        vec!["PASS hunter2", "NICK alice", "USER alice 0 * :Alice L."]
    );
    assert_eq!(state.status(), ServerStatus::Authenticating);
}

#[test]
fn no_send_when_disconnected() {
    let (state, _snd, _rcv) = test_state(test_server_info());
    state.set_status(ServerStatus::Disconnected);
    state.send(Priority::Normal, "PRIVMSG #a :hi\r\n".to_owned());
    assert!(sent_lines(&state).is_empty());
}

#[test]
fn cap_sasl_plain_flow() {
    let mut info = test_server_info();
    info.capabilities = vec!["server-time".to_owned()];
    info.sasl_auth = Some(SASLAuth::Plain {
        username: "alice".to_owned(),
        password: "secret".to_owned(),
    });
    let (state, mut snd, _rcv) = test_state(info);

    state.start_registration();
    assert_eq!(sent_lines(&state), vec!["CAP LS 302"]);

    // single-line LS reply (an old server without 302 support would answer the same way)
    feed(&state, &mut snd, "CAP * LS :sasl server-time echo-message");
    let lines = sent_lines(&state);
    assert_eq!(lines[0], "NICK alice");
    assert_eq!(lines[1], "USER alice 0 * :Alice L.");
    assert_eq!(lines[2], "CAP REQ :server-time sasl");

    feed(&state, &mut snd, ":server CAP alice ACK :server-time sasl");
    assert_eq!(sent_lines(&state), vec!["AUTHENTICATE PLAIN"]);

    feed(&state, &mut snd, "AUTHENTICATE +");
    let lines = sent_lines(&state);
    assert_eq!(lines.len(), 1);
    let payload = lines[0].strip_prefix("AUTHENTICATE ").unwrap();
    // base64 of "alice\0alice\0secret"
    assert_eq!(payload, "YWxpY2UAYWxpY2UAc2VjcmV0");

    feed(&state, &mut snd, ":server 903 alice :SASL successful");
    assert_eq!(sent_lines(&state), vec!["CAP END"]);
}

#[test]
fn cap_ls_multiline() {
    let mut info = test_server_info();
    info.capabilities = vec!["away-notify".to_owned()];
    let (state, mut snd, _rcv) = test_state(info);

    state.start_registration();
    sent_lines(&state);

    feed(&state, &mut snd, "CAP * LS * :sasl server-time");
    // no reply until the final line
    assert!(sent_lines(&state).is_empty());
    feed(&state, &mut snd, "CAP * LS :away-notify");
    let lines = sent_lines(&state);
    assert!(lines.contains(&"CAP REQ :away-notify".to_owned()));
}

#[test]
fn cap_nothing_to_request() {
    let mut info = test_server_info();
    info.capabilities = vec!["away-notify".to_owned()];
    let (state, mut snd, _rcv) = test_state(info);

    state.start_registration();
    sent_lines(&state);

    feed(&state, &mut snd, "CAP * LS :sasl multi-prefix");
    let lines = sent_lines(&state);
    // nothing we want: registration plus CAP END, no CAP REQ
    assert!(lines.iter().any(|line| line == "CAP END"));
    assert!(!lines.iter().any(|line| line.starts_with("CAP REQ")));
}

#[test]
fn sasl_fail_reconnect_policy() {
    let mut info = test_server_info();
    info.sasl_auth = Some(SASLAuth::Plain {
        username: "alice".to_owned(),
        password: "bad".to_owned(),
    });
    let (state, mut snd, mut rcv) = test_state(info);

    state.start_registration();
    sent_lines(&state);
    feed(&state, &mut snd, "CAP * LS :sasl");
    feed(&state, &mut snd, ":server CAP alice ACK :sasl");
    feed(&state, &mut snd, "AUTHENTICATE +");
    feed(&state, &mut snd, ":server 904 alice :SASL authentication failed");

    assert!(events(&mut rcv)
        .iter()
        .any(|ev| matches!(ev, Event::SaslFailure { .. })));
    // default policy schedules a reconnect
    assert_eq!(state.take_disconnect_request(), Some(true));
}

#[test]
fn nick_collision_walks_the_list() {
    let (state, mut snd, _rcv) = test_state(test_server_info());
    state.start_registration();
    sent_lines(&state);

    feed(&state, &mut snd, ":server 433 * alice :Nickname is already in use");
    assert_eq!(state.get_nick(), "alice_fallback");
    assert_eq!(sent_lines(&state), vec!["NICK alice_fallback"]);

    // list exhausted: append a suffix
    feed(&state, &mut snd, ":server 433 * alice_fallback :in use");
    assert_eq!(state.get_nick(), "alice_fallback_");

    feed(&state, &mut snd, ":server 436 * alice_fallback_ :collision");
    assert_eq!(state.get_nick(), "alice_fallback__");

    // after 001 the nick is accepted, collisions are for /nick requests and don't walk
    feed(&state, &mut snd, ":server 001 alice_fallback__ :Welcome");
    feed(&state, &mut snd, ":server 433 * somenick :in use");
    assert_eq!(state.get_nick(), "alice_fallback__");
}

#[test]
fn registration_completes_on_001() {
    let mut info = test_server_info();
    info.command_on_connect = vec!["OPER alice sesame".to_owned()];
    let (state, mut snd, mut rcv) = test_state(info);
    state.start_registration();
    sent_lines(&state);

    feed(&state, &mut snd, ":server 001 alice :Welcome to wren");
    assert_eq!(state.status(), ServerStatus::Registered);
    assert!(state.is_nick_accepted());
    assert!(events(&mut rcv)
        .iter()
        .any(|ev| matches!(ev, Event::Registered)));
    assert_eq!(sent_lines(&state), vec!["OPER alice sesame"]);
}

#[test]
fn isupport_populated_from_005() {
    let (state, mut snd, _rcv) = test_state(test_server_info());
    feed(
        &state,
        &mut snd,
        ":server 005 alice CHANTYPES=# CHANMODES=eIbq,k,flj,CFLMPQScgimnprstz PREFIX=(ov)@+ \
         CASEMAPPING=ascii :are supported by this server",
    );
    assert_eq!(state.casemapping(), libwren_common::Casemapping::Ascii);

    let infolist = state.infolist("irc_server").unwrap();
    let item = &infolist.items[0];
    assert_eq!(item.get_str("casemapping"), Some("ascii"));
    assert_eq!(item.get_str("chantypes"), Some("#"));
    assert_eq!(item.get_str("prefix_modes"), Some("ov"));
    assert_eq!(item.get_str("prefix_chars"), Some("@+"));
}

#[test]
fn join_part_quit_nick() {
    let (state, mut snd, _rcv) = test_state(test_server_info());
    feed(&state, &mut snd, ":server 001 alice :Welcome");
    sent_lines(&state);

    // our own JOIN creates the channel and requests modes + names details
    feed(&state, &mut snd, ":alice!u@h JOIN #test");
    assert!(state.has_chan(ChanNameRef::new("#test")));
    assert_eq!(sent_lines(&state), vec!["MODE #test", "WHO #test"]);

    feed(&state, &mut snd, ":bob!u@h JOIN #test");
    feed(&state, &mut snd, ":carol!u@h JOIN #test");
    assert_eq!(
        state.get_chan_nicks(ChanNameRef::new("#test")),
        vec!["bob", "carol"]
    );

    // repeated JOIN is a no-op
    feed(&state, &mut snd, ":bob!u@h JOIN #test");
    assert_eq!(
        state.get_chan_nicks(ChanNameRef::new("#test")).len(),
        2
    );

    feed(&state, &mut snd, ":carol!u@h PART #test");
    assert_eq!(state.get_chan_nicks(ChanNameRef::new("#test")), vec!["bob"]);

    // NICK renames everywhere, QUIT removes everywhere
    let mut msg = wire::parse_one_message(":bob!u@h NICK robert").unwrap();
    state.update(&mut msg, &mut snd);
    match msg.cmd {
        wire::Cmd::NICK { ref chans, .. } => {
            assert_eq!(chans.len(), 1);
            assert_eq!(chans[0].display(), "#test");
        }
        _ => unreachable!(),
    }
    assert_eq!(
        state.get_chan_nicks(ChanNameRef::new("#test")),
        vec!["robert"]
    );

    let mut msg = wire::parse_one_message(":robert!u@h QUIT :bye").unwrap();
    state.update(&mut msg, &mut snd);
    match msg.cmd {
        wire::Cmd::QUIT { ref chans, .. } => assert_eq!(chans.len(), 1),
        _ => unreachable!(),
    }
    assert!(state.get_chan_nicks(ChanNameRef::new("#test")).is_empty());
}

#[test]
fn names_committed_on_366() {
    let (state, mut snd, _rcv) = test_state(test_server_info());
    feed(&state, &mut snd, ":alice!u@h JOIN #test");
    feed(
        &state,
        &mut snd,
        ":server 353 alice = #test :alice @op1 +voiced1",
    );
    feed(&state, &mut snd, ":server 353 alice = #test :plain1");
    // not committed yet
    assert!(state.get_chan_nicks(ChanNameRef::new("#test")).is_empty());

    feed(&state, &mut snd, ":server 366 alice #test :End of /NAMES list.");
    assert_eq!(
        state.get_chan_nicks(ChanNameRef::new("#test")),
        vec!["alice", "op1", "plain1", "voiced1"]
    );

    let infolist = state.infolist("irc_nick").unwrap();
    let op = infolist
        .items
        .iter()
        .find(|item| item.get_str("name") == Some("op1"))
        .unwrap();
    assert_eq!(op.get_str("prefixes"), Some("@"));
}

#[test]
fn kick_self_marks_channel_parted() {
    let (state, mut snd, _rcv) = test_state(test_server_info());
    feed(&state, &mut snd, ":alice!u@h JOIN #test");
    sent_lines(&state);

    feed(&state, &mut snd, ":op!o@h KICK #test alice :bye");
    // parted channels are excluded from the autojoin reconstruction
    assert_eq!(state.build_autojoin(), None);
}

#[test]
fn topic_updates() {
    let (state, mut snd, _rcv) = test_state(test_server_info());
    feed(&state, &mut snd, ":alice!u@h JOIN #test");

    feed(&state, &mut snd, ":server 332 alice #test :old topic");
    feed(&state, &mut snd, ":server 333 alice #test bob!u@h 1600000000");

    let infolist = state.infolist("irc_channel").unwrap();
    assert_eq!(infolist.items[0].get_str("topic"), Some("old topic"));

    feed(&state, &mut snd, ":bob!u@h TOPIC #test :new topic");
    let infolist = state.infolist("irc_channel").unwrap();
    assert_eq!(infolist.items[0].get_str("topic"), Some("new topic"));
}

#[test]
fn mode_324_snapshot_and_dispatch() {
    let (state, mut snd, _rcv) = test_state(test_server_info());
    feed(&state, &mut snd, ":alice!u@h JOIN #test");
    feed(&state, &mut snd, ":bob!u@h JOIN #test");
    feed(
        &state,
        &mut snd,
        ":server 005 alice CHANMODES=eIbq,k,flj,CFLMPQScgimnprstz PREFIX=(ov)@+ :are supported",
    );

    feed(&state, &mut snd, ":server 324 alice #test +nt");
    let infolist = state.infolist("irc_channel").unwrap();
    // argument-less letters are inserted right after the sign as they are applied
    assert_eq!(infolist.items[0].get_str("modes"), Some("+tn"));

    // a MODE through dispatch carries the smart-filter verdict back in the message
    let mut msg = wire::parse_one_message(":op!o@h MODE #test +o bob").unwrap();
    state.update(&mut msg, &mut snd);
    match msg.cmd {
        wire::Cmd::MODE { smart_filtered, .. } => assert!(smart_filtered),
        _ => unreachable!(),
    }

    // key mirror through dispatch
    feed(&state, &mut snd, ":op!o@h MODE #test +k sekrit");
    let infolist = state.infolist("irc_channel").unwrap();
    assert_eq!(infolist.items[0].get_str("key"), Some("sekrit"));
}

#[test]
fn user_mode_dispatch() {
    let mut info = test_server_info();
    info.registered_mode = Some('r');
    let (state, mut snd, _rcv) = test_state(info);
    feed(&state, &mut snd, ":server 001 alice :Welcome");

    feed(&state, &mut snd, ":alice MODE alice :+iwr");
    let infolist = state.infolist("irc_server").unwrap();
    assert_eq!(infolist.items[0].get_str("nick_modes"), Some("iwr"));

    feed(&state, &mut snd, ":alice MODE alice :-r");
    let infolist = state.infolist("irc_server").unwrap();
    assert_eq!(infolist.items[0].get_str("nick_modes"), Some("iw"));
}

#[test]
fn modelist_numerics() {
    let (state, mut snd, _rcv) = test_state(test_server_info());
    feed(&state, &mut snd, ":alice!u@h JOIN #test");

    feed(
        &state,
        &mut snd,
        ":server 367 alice #test *!*@spam.example op!o@h 1600000000",
    );
    feed(
        &state,
        &mut snd,
        ":server 367 alice #test *!*@flood.example op!o@h 1600000001",
    );
    feed(&state, &mut snd, ":server 368 alice #test :End of ban list");

    let infolist = state.infolist("irc_modelist_item").unwrap();
    assert_eq!(infolist.items.len(), 2);
    assert_eq!(infolist.items[0].get_str("mask"), Some("*!*@spam.example"));
    assert_eq!(infolist.items[0].get_str("type"), Some("b"));

    // a fresh enumeration replaces the list
    feed(
        &state,
        &mut snd,
        ":server 367 alice #test *!*@other.example op!o@h 1600000002",
    );
    feed(&state, &mut snd, ":server 368 alice #test :End of ban list");
    let infolist = state.infolist("irc_modelist_item").unwrap();
    assert_eq!(infolist.items.len(), 1);
    assert_eq!(infolist.items[0].get_str("mask"), Some("*!*@other.example"));
}

#[test]
fn autojoin_rebuild_with_keys() {
    let (state, mut snd, _rcv) = test_state(test_server_info());
    feed(
        &state,
        &mut snd,
        ":server 005 alice CHANMODES=eIbq,k,flj,CFLMPQScgimnprstz PREFIX=(ov)@+ :supported",
    );
    feed(&state, &mut snd, ":alice!u@h JOIN #a");
    feed(&state, &mut snd, ":alice!u@h JOIN #b");
    feed(&state, &mut snd, ":alice!u@h JOIN #c");
    assert_eq!(state.build_autojoin().as_deref(), Some("#a,#b,#c"));

    feed(&state, &mut snd, ":op!o@h MODE #b +k kb");
    feed(&state, &mut snd, ":op!o@h MODE #c +k kc");
    assert_eq!(state.build_autojoin().as_deref(), Some("#b,#c,#a kb,kc"));

    feed(&state, &mut snd, ":op!o@h MODE #b -k");
    assert_eq!(state.build_autojoin().as_deref(), Some("#c,#a,#b kc"));
}

#[test]
fn ping_answered_with_pong() {
    let (state, mut snd, _rcv) = test_state(test_server_info());
    feed(&state, &mut snd, "PING :irc.example.org");
    assert_eq!(sent_lines(&state), vec!["PONG :irc.example.org"]);
}

#[test]
fn lag_computed_from_pong() {
    let (state, mut snd, mut rcv) = test_state(test_server_info());
    feed(&state, &mut snd, ":server PONG server :LAG1");
    let events = events(&mut rcv);
    assert!(events.iter().any(|ev| matches!(ev, Event::Lag { .. })));
}

#[test]
fn ctcp_ping_request_echoed() {
    let (state, mut snd, mut rcv) = test_state(test_server_info());

    feed(
        &state,
        &mut snd,
        ":bob!u@h PRIVMSG alice :\x01PING 12345 67890\x01",
    );

    assert_eq!(
        sent_lines(&state),
        vec!["NOTICE bob :\x01PING 12345 67890\x01"]
    );
    let events = events(&mut rcv);
    assert!(events.iter().any(|ev| matches!(
        ev,
        Event::CtcpRequest { nick, ty, blocked: false, .. } if nick == "bob" && ty == "PING"
    )));
}

#[test]
fn ctcp_version_request_answered() {
    let (state, mut snd, _rcv) = test_state(test_server_info());
    feed(&state, &mut snd, ":bob!u@h PRIVMSG alice :\x01VERSION\x01");
    let lines = sent_lines(&state);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("NOTICE bob :\x01VERSION wren "));
    assert!(lines[0].ends_with('\x01'));
}

#[test]
fn ctcp_blocked_by_empty_template() {
    let mut info = test_server_info();
    info.ctcp
        .replies
        .insert("version".to_owned(), "".to_owned());
    let (state, mut snd, mut rcv) = test_state(info);

    feed(&state, &mut snd, ":bob!u@h PRIVMSG alice :\x01VERSION\x01");
    assert!(sent_lines(&state).is_empty());
    assert!(events(&mut rcv).iter().any(|ev| matches!(
        ev,
        Event::CtcpRequest { blocked: true, .. }
    )));
}

#[test]
fn ctcp_unknown_not_answered() {
    let (state, mut snd, mut rcv) = test_state(test_server_info());
    feed(&state, &mut snd, ":bob!u@h PRIVMSG alice :\x01FROBNICATE\x01");
    assert!(sent_lines(&state).is_empty());
    assert!(events(&mut rcv)
        .iter()
        .any(|ev| matches!(ev, Event::CtcpUnknown { .. })));
}

#[test]
fn dcc_send_signals_xfer() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let (state, mut snd, mut rcv) = test_state(test_server_info());

    let payloads: Rc<RefCell<Vec<crate::XferPayload>>> = Rc::new(RefCell::new(vec![]));
    let payloads_clone = payloads.clone();
    state.with_hooks(|hooks| {
        hooks.hook_signal(
            "xfer_add",
            0,
            Rc::new(move |_, data| {
                if let crate::SignalData::Xfer(payload) = data {
                    payloads_clone.borrow_mut().push((*payload).clone());
                }
            }),
        )
    });

    feed(
        &state,
        &mut snd,
        ":bob!u@h PRIVMSG alice :\x01DCC SEND file.bin 2130706433 5000 1024\x01",
    );

    let payloads = payloads.borrow();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].remote_nick, "bob");
    assert_eq!(payloads[0].local_nick, "alice");
    assert_eq!(payloads[0].filename.as_deref(), Some("file.bin"));
    assert_eq!(payloads[0].size, Some(1024));
    assert_eq!(payloads[0].port, 5000);
    assert_eq!(payloads[0].type_string, "file_recv_active");

    assert!(events(&mut rcv).iter().any(|ev| matches!(ev, Event::Dcc { .. })));
}

#[test]
fn dcc_parse_error_is_user_visible() {
    let (state, mut snd, mut rcv) = test_state(test_server_info());
    feed(&state, &mut snd, ":bob!u@h PRIVMSG alice :\x01DCC SEND\x01");
    assert!(events(&mut rcv).iter().any(|ev| matches!(ev, Event::Err { .. })));
    // the connection is untouched
    assert!(state.take_disconnect_request().is_none());
}

#[test]
fn private_message_creates_private_chan() {
    let (state, mut snd, _rcv) = test_state(test_server_info());
    feed(&state, &mut snd, ":bob!u@h PRIVMSG alice :hi there");
    let infolist = state.infolist("irc_channel").unwrap();
    assert_eq!(infolist.items[0].get_str("name"), Some("bob"));
    assert_eq!(infolist.items[0].get_str("type"), Some("private"));
}

#[test]
fn away_numerics() {
    let (state, mut snd, _rcv) = test_state(test_server_info());
    feed(&state, &mut snd, ":server 306 alice :You have been marked as away");
    let infolist = state.infolist("irc_server").unwrap();
    assert_eq!(infolist.items[0].get_int("is_away"), Some(1));

    feed(&state, &mut snd, ":server 305 alice :You are no longer away");
    let infolist = state.infolist("irc_server").unwrap();
    assert_eq!(infolist.items[0].get_int("is_away"), Some(0));
}

#[test]
fn server_error_schedules_disconnect() {
    let (state, mut snd, _rcv) = test_state(test_server_info());
    feed(&state, &mut snd, "ERROR :Closing Link: excess flood");
    assert_eq!(state.take_disconnect_request(), Some(true));
}

#[test]
fn reconnect_delay_doubles_and_caps() {
    let mut info = test_server_info();
    info.autoreconnect_delay_secs = 10;
    let (state, _snd, _rcv) = test_state(info);

    assert_eq!(state.next_reconnect_delay_secs(), 10);
    assert_eq!(state.next_reconnect_delay_secs(), 20);
    assert_eq!(state.next_reconnect_delay_secs(), 40);
    assert_eq!(state.next_reconnect_delay_secs(), 80);
    // capped at ten times the base
    assert_eq!(state.next_reconnect_delay_secs(), 100);
    assert_eq!(state.next_reconnect_delay_secs(), 100);

    state.clear_reconnect_attempts();
    assert_eq!(state.next_reconnect_delay_secs(), 10);
}

#[test]
fn snapshot_records_round_trip() {
    let (state, mut snd, _rcv) = test_state(test_server_info());
    feed(&state, &mut snd, ":server 001 alice :Welcome");
    feed(&state, &mut snd, ":alice!u@h JOIN #test");
    feed(&state, &mut snd, ":bob!u@h JOIN #test");
    feed(&state, &mut snd, ":op!o@h MODE #test +k sekrit");
    sent_lines(&state);

    let records = state.snapshot_records();
    let text = crate::write_records(&records).unwrap();
    let read = crate::read_records(&text).unwrap();
    assert_eq!(read, records);

    match &read[0] {
        crate::Record::Server(server) => {
            assert_eq!(server.name, "example");
            assert_eq!(server.status, "registered");
            assert_eq!(server.current_nick.as_deref(), Some("alice"));
        }
        _ => unreachable!(),
    }
    match &read[1] {
        crate::Record::Channel(chan) => {
            assert_eq!(chan.name, "#test");
            assert_eq!(chan.key.as_deref(), Some("sekrit"));
            assert_eq!(chan.nicks.len(), 1);
        }
        _ => unreachable!(),
    }
}

#[test]
fn outbound_modifier_rewrites_line() {
    use std::rc::Rc;

    let (state, _snd, _rcv) = test_state(test_server_info());
    state.with_hooks(|hooks| {
        hooks.hook_modifier(
            "irc_out",
            0,
            Rc::new(|line: &str| Some(line.replace("secret", "[redacted]"))),
        )
    });

    state.send(Priority::Normal, "PRIVMSG #a :my secret plan\r\n".to_owned());
    let item = state.drain_ready_out_line(Instant::now()).unwrap();
    assert_eq!(item.line, "PRIVMSG #a :my [redacted] plan\r\n");
    assert!(item.modified);
    assert_eq!(
        item.line_before_mod.as_deref(),
        Some("PRIVMSG #a :my secret plan")
    );
}

#[test]
fn outbound_modifier_drops_line() {
    use std::rc::Rc;

    let (state, _snd, _rcv) = test_state(test_server_info());
    state.with_hooks(|hooks| {
        hooks.hook_modifier("irc_out1_PRIVMSG", 0, Rc::new(|_: &str| Some(String::new())))
    });

    state.send(Priority::Normal, "PRIVMSG #a :dropped\r\n".to_owned());
    assert!(state.drain_ready_out_line(Instant::now()).is_none());
    // other commands are untouched
    state.send(Priority::Normal, "NOTICE #a :kept\r\n".to_owned());
    assert!(state.drain_ready_out_line(Instant::now()).is_some());
}

#[test]
fn statusmsg_target_feeds_channel_history() {
    let (state, mut snd, _rcv) = test_state(test_server_info());
    feed(&state, &mut snd, ":alice!u@h JOIN #test");
    feed(&state, &mut snd, ":bob!u@h JOIN #test");
    sent_lines(&state);

    // a STATUSMSG message still lands on the channel: bob is now "recently speaking" and a mode
    // change on him is no longer smart-filtered
    feed(&state, &mut snd, ":bob!u@h PRIVMSG @#test :ops only");
    let mut msg = wire::parse_one_message(":op!o@h MODE #test +o bob").unwrap();
    state.update(&mut msg, &mut snd);
    match msg.cmd {
        wire::Cmd::MODE { smart_filtered, .. } => assert!(!smart_filtered),
        _ => unreachable!(),
    }
}
