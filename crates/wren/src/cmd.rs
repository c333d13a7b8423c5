use crate::config;
use crate::conn;
use crate::ui::UI;
use crate::utils;

use libwren_client::{Client, ServerAddr, ServerInfo, ServerStatus, DEFAULT_PORT, DEFAULT_TLS_PORT};
use libwren_common::{ChanName, ChanNameRef, MsgSource, MsgTarget};

use std::cell::RefCell;
use std::rc::Rc;

/// One `/ignore` entry. `*` in the pattern matches any run of characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Ignore {
    pub(crate) serv: Option<String>,
    pub(crate) pattern: String,
}

impl Ignore {
    pub(crate) fn matches(&self, serv: &str, nick: &str) -> bool {
        match &self.serv {
            Some(ignore_serv) if ignore_serv != serv => false,
            _ => glob_match(&self.pattern.to_lowercase(), &nick.to_lowercase()),
        }
    }
}

// Only `*` is special: it matches any run of characters.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    // the first part anchors at the start, the last at the end, the rest float in order
    let first = parts[0];
    if !text.starts_with(first) {
        return false;
    }
    let mut pos = first.len();

    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match text[pos..].find(part) {
            None => return false,
            Some(idx) => pos += idx + part.len(),
        }
    }

    let last = parts[parts.len() - 1];
    if last.is_empty() {
        return true;
    }
    text.len() >= pos + last.len() && text.ends_with(last)
}

pub(crate) type IgnoreList = Rc<RefCell<Vec<Ignore>>>;

pub(crate) struct CmdArgs<'a> {
    pub args: &'a str,
    pub defaults: &'a config::Defaults,
    pub ui: &'a UI,
    pub clients: &'a mut Vec<Client>,
    /// Definitions of every known server, connected or not, aligned with `clients` by name.
    pub defs: &'a mut Vec<ServerInfo>,
    pub ignores: &'a IgnoreList,
    pub src: MsgSource,
}

pub(crate) struct Cmd {
    /// Command name. E.g. if this is `"cmd"`, `/cmd ...` will call this command.
    pub(crate) name: &'static str,
    /// Command function.
    pub(crate) cmd_fn: fn(CmdArgs),
    /// Command description
    description: &'static str,
    /// Command usage
    usage: &'static str,
}

////////////////////////////////////////////////////////////////////////////////////////////////////

pub(crate) enum ParseCmdResult<'a> {
    /// Command name parsing successful
    Ok {
        cmd: &'static Cmd,

        /// Rest of the command after extracting command name
        rest: &'a str,
    },

    /// Unknown command
    Unknown,
}

pub(crate) fn parse_cmd(cmd: &str) -> ParseCmdResult {
    match cmd.split_whitespace().next() {
        None => ParseCmdResult::Unknown,
        Some(cmd_name) => {
            let mut ws_idxs = utils::split_whitespace_indices(cmd);
            ws_idxs.next(); // cmd_name
            let rest = {
                match ws_idxs.next() {
                    None => "",
                    Some(rest_idx) => &cmd[rest_idx..],
                }
            };
            for cmd in &CMDS {
                if cmd_name == cmd.name {
                    return ParseCmdResult::Ok { cmd, rest };
                }
            }
            ParseCmdResult::Unknown
        }
    }
}

pub(crate) fn run_cmd(line: &str, src: MsgSource, args: &mut CmdArgs) {
    match parse_cmd(line) {
        ParseCmdResult::Ok { cmd, rest } => {
            (cmd.cmd_fn)(CmdArgs {
                args: rest,
                defaults: args.defaults,
                ui: args.ui,
                clients: &mut *args.clients,
                defs: &mut *args.defs,
                ignores: args.ignores,
                src,
            });
        }
        ParseCmdResult::Unknown => args.ui.add_client_err_msg(
            &format!("Unsupported command: \"/{}\"", line),
            &MsgTarget::CurrentTab,
        ),
    }
}

fn find_client_idx(clients: &[Client], serv_name: &str) -> Option<usize> {
    clients
        .iter()
        .position(|client| client.get_serv_name() == serv_name)
}

fn find_client<'a>(clients: &'a mut [Client], serv_name: &str) -> Option<&'a mut Client> {
    match find_client_idx(clients, serv_name) {
        None => None,
        Some(idx) => Some(&mut clients[idx]),
    }
}

/// Creates the engine task for a server definition and wires its events to the UI.
pub(crate) fn add_client(
    ui: &UI,
    clients: &mut Vec<Client>,
    ignores: &IgnoreList,
    server_info: ServerInfo,
) {
    ui.new_server_tab(&server_info.name);

    let (client, rcv_ev) = Client::new(server_info);

    let ui_clone = ui.clone();
    let client_clone = client.clone();
    let ignores_clone = ignores.clone();
    tokio::task::spawn_local(conn::task(rcv_ev, ui_clone, client_clone, ignores_clone));

    clients.push(client);
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static CMDS: [&Cmd; 33] = [
    &ALLCHAN_CMD,
    &ALLPV_CMD,
    &ALLSERV_CMD,
    &AWAY_CMD,
    &BUFFER_CMD,
    &CLOSE_CMD,
    &CONNECT_CMD,
    &CTCP_CMD,
    &CYCLE_CMD,
    &DCC_CMD,
    &DISCONNECT_CMD,
    &HELP_CMD,
    &IGNORE_CMD,
    &INVITE_CMD,
    &JOIN_CMD,
    &KICK_CMD,
    &KICKBAN_CMD,
    &LIST_CMD,
    &ME_CMD,
    &MODE_CMD,
    &MSG_CMD,
    &NAMES_CMD,
    &NICK_CMD,
    &NOTICE_CMD,
    &PART_CMD,
    &QUOTE_CMD,
    &RECONNECT_CMD,
    &SERVER_CMD,
    &TOPIC_CMD,
    &UNBAN_CMD,
    &WHO_CMD,
    &WHOIS_CMD,
    &WHOWAS_CMD,
];

////////////////////////////////////////////////////////////////////////////////////////////////////

static SERVER_CMD: Cmd = Cmd {
    name: "server",
    cmd_fn: server,
    description: "Manages the server list",
    usage: "`/server add|del|copy|rename|reorder|list <...>`",
};

fn server(args: CmdArgs) {
    let CmdArgs {
        args,
        defaults,
        ui,
        clients,
        defs,
        ignores,
        ..
    } = args;
    let words: Vec<&str> = args.split_whitespace().collect();

    let usage = || {
        ui.add_client_err_msg(&format!("Usage: {}", SERVER_CMD.usage), &MsgTarget::CurrentTab)
    };

    match words.first().copied() {
        Some("add") => {
            // /server add <name> <host>[:<port>] [-tls] [-ipv6] [-autoconnect]
            if words.len() < 3 {
                return usage();
            }
            let name = words[1];
            if defs.iter().any(|def| def.name == name) {
                return ui.add_client_err_msg(
                    &format!("Server '{}' already exists", name),
                    &MsgTarget::CurrentTab,
                );
            }
            let tls = words.contains(&"-tls");
            let (host, port) = match words[2].split_once(':') {
                Some((host, port)) => match port.parse() {
                    Ok(port) => (host, port),
                    Err(_) => return usage(),
                },
                None => (words[2], if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT }),
            };
            let info = ServerInfo {
                name: name.to_owned(),
                addrs: vec![ServerAddr {
                    host: host.to_owned(),
                    port,
                }],
                tls,
                ipv6: words.contains(&"-ipv6"),
                autoconnect: words.contains(&"-autoconnect"),
                nicks: defaults.nicks.clone(),
                username: defaults.nicks.first().cloned().unwrap_or_default(),
                realname: defaults.realname.clone(),
                ..ServerInfo::default()
            };
            defs.push(info.clone());
            add_client(ui, clients, ignores, info);
            ui.add_client_msg(&format!("Server '{}' added", name), &MsgTarget::CurrentTab);
        }

        Some("del") => {
            if words.len() != 2 {
                return usage();
            }
            let name = words[1];
            match find_client_idx(clients, name) {
                None => {
                    ui.add_client_err_msg(
                        &format!("No such server: {}", name),
                        &MsgTarget::CurrentTab,
                    );
                }
                Some(idx) => {
                    let mut client = clients.remove(idx);
                    client.quit(None);
                    defs.retain(|def| def.name != name);
                    ui.close_server_tab(name);
                    ui.add_client_msg(
                        &format!("Server '{}' deleted", name),
                        &MsgTarget::CurrentTab,
                    );
                }
            }
        }

        Some("copy") => {
            if words.len() != 3 {
                return usage();
            }
            let (old_name, new_name) = (words[1], words[2]);
            if defs.iter().any(|def| def.name == new_name) {
                return ui.add_client_err_msg(
                    &format!("Server '{}' already exists", new_name),
                    &MsgTarget::CurrentTab,
                );
            }
            let def = match defs.iter().find(|def| def.name == old_name) {
                None => {
                    return ui.add_client_err_msg(
                        &format!("No such server: {}", old_name),
                        &MsgTarget::CurrentTab,
                    )
                }
                Some(def) => def,
            };
            let mut new_def = def.clone();
            new_def.name = new_name.to_owned();
            new_def.autoconnect = false;
            defs.push(new_def.clone());
            add_client(ui, clients, ignores, new_def);
            ui.add_client_msg(
                &format!("Server '{}' copied to '{}'", old_name, new_name),
                &MsgTarget::CurrentTab,
            );
        }

        Some("rename") => {
            if words.len() != 3 {
                return usage();
            }
            let (old_name, new_name) = (words[1], words[2]);
            if defs.iter().any(|def| def.name == new_name) {
                return ui.add_client_err_msg(
                    &format!("Server '{}' already exists", new_name),
                    &MsgTarget::CurrentTab,
                );
            }
            let def_idx = match defs.iter().position(|def| def.name == old_name) {
                None => {
                    return ui.add_client_err_msg(
                        &format!("No such server: {}", old_name),
                        &MsgTarget::CurrentTab,
                    )
                }
                Some(idx) => idx,
            };
            if let Some(client) = find_client(clients, old_name) {
                if client.status() != ServerStatus::Disconnected {
                    return ui.add_client_err_msg(
                        "Can't rename a connected server, /disconnect it first",
                        &MsgTarget::CurrentTab,
                    );
                }
            }
            defs[def_idx].name = new_name.to_owned();
            if let Some(client_idx) = find_client_idx(clients, old_name) {
                let mut client = clients.remove(client_idx);
                client.quit(None);
                ui.close_server_tab(old_name);
                add_client(ui, clients, ignores, defs[def_idx].clone());
            }
            ui.add_client_msg(
                &format!("Server '{}' renamed to '{}'", old_name, new_name),
                &MsgTarget::CurrentTab,
            );
        }

        Some("reorder") => {
            if words.len() < 2 {
                return usage();
            }
            let names: Vec<&str> = words[1..].to_vec();
            defs.sort_by_key(|def| {
                names
                    .iter()
                    .position(|name| *name == def.name)
                    .unwrap_or(usize::MAX)
            });
            clients.sort_by_key(|client| {
                names
                    .iter()
                    .position(|name| *name == client.get_serv_name())
                    .unwrap_or(usize::MAX)
            });
            ui.add_client_msg("Servers reordered", &MsgTarget::CurrentTab);
        }

        Some("list") | None => {
            ui.add_client_msg("Servers:", &MsgTarget::CurrentTab);
            for def in defs.iter() {
                let status = match find_client_idx(clients, &def.name)
                    .map(|idx| clients[idx].status())
                {
                    Some(ServerStatus::Registered) => "connected",
                    Some(ServerStatus::Connecting) | Some(ServerStatus::Authenticating) => {
                        "connecting"
                    }
                    _ => "disconnected",
                };
                let addr = def
                    .addrs
                    .first()
                    .map(|addr| format!("{}/{}", addr.host, addr.port))
                    .unwrap_or_default();
                ui.add_client_msg(
                    &format!(" {} ({}) [{}]", def.name, addr, status),
                    &MsgTarget::CurrentTab,
                );
            }
        }

        Some(_) => usage(),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static CONNECT_CMD: Cmd = Cmd {
    name: "connect",
    cmd_fn: connect,
    description: "Connects to a server",
    usage: "`/connect [-all] [-nojoin] [<name>...]`, `/connect <host>:<port>` or `/connect <irc-url>`",
};

fn connect(args: CmdArgs) {
    let words: Vec<String> = args
        .args
        .split_whitespace()
        .map(str::to_owned)
        .collect();
    let nojoin = words.iter().any(|word| word == "-nojoin");
    let all = words.iter().any(|word| word == "-all");
    let names: Vec<&String> = words.iter().filter(|word| !word.starts_with('-')).collect();

    let connect_one = |client: &mut Client| {
        if nojoin {
            client.connect_nojoin();
        } else {
            match client.status() {
                ServerStatus::Disconnected => client.connect(),
                _ => client.reconnect(None),
            }
        }
    };

    if all {
        for client in args.clients.iter_mut() {
            connect_one(client);
        }
        return;
    }

    if names.is_empty() {
        // reconnect the current server
        let serv = args.src.serv_name().to_owned();
        match find_client(args.clients, &serv) {
            Some(client) => {
                args.ui
                    .add_client_msg("Connecting...", &MsgTarget::AllServTabs { serv: &serv });
                connect_one(client);
            }
            None => args
                .ui
                .add_client_err_msg("Not in a server buffer", &MsgTarget::CurrentTab),
        }
        return;
    }

    for name in names {
        // a known server name?
        if let Some(client) = find_client(args.clients, name) {
            connect_one(client);
            continue;
        }

        // an irc:// URL?
        if name.contains("://") {
            let mut defaults_info = ServerInfo {
                nicks: args.defaults.nicks.clone(),
                username: args.defaults.nicks.first().cloned().unwrap_or_default(),
                realname: args.defaults.realname.clone(),
                ..ServerInfo::default()
            };
            defaults_info.tls = args.defaults.tls;
            match ServerInfo::from_url(name, &defaults_info) {
                Err(err) => {
                    args.ui
                        .add_client_err_msg(&format!("connect: {}", err), &MsgTarget::CurrentTab);
                }
                Ok(info) => {
                    args.defs.push(info.clone());
                    add_client(args.ui, args.clients, args.ignores, info);
                }
            }
            continue;
        }

        // a <host>:<port> pair?
        if let Some((host, port)) = name.split_once(':') {
            match port.parse::<u16>() {
                Err(err) => {
                    args.ui.add_client_err_msg(
                        &format!("connect: Can't parse port {}: {}", port, err),
                        &MsgTarget::CurrentTab,
                    );
                }
                Ok(port) => {
                    let info = ServerInfo {
                        name: host.to_owned(),
                        addrs: vec![ServerAddr {
                            host: host.to_owned(),
                            port,
                        }],
                        tls: args.defaults.tls,
                        nicks: args.defaults.nicks.clone(),
                        username: args.defaults.nicks.first().cloned().unwrap_or_default(),
                        realname: args.defaults.realname.clone(),
                        auto_join: args
                            .defaults
                            .join
                            .iter()
                            .map(|c| libwren_common::Chan::from_entry(c))
                            .collect(),
                        ..ServerInfo::default()
                    };
                    args.defs.push(info.clone());
                    add_client(args.ui, args.clients, args.ignores, info);
                }
            }
            continue;
        }

        args.ui.add_client_err_msg(
            &format!("connect: No such server: {}", name),
            &MsgTarget::CurrentTab,
        );
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static DISCONNECT_CMD: Cmd = Cmd {
    name: "disconnect",
    cmd_fn: disconnect,
    description: "Disconnects from a server",
    usage: "`/disconnect [-all|-pending|<name>...]`",
};

fn disconnect(args: CmdArgs) {
    let CmdArgs {
        args,
        ui,
        clients,
        src,
        ..
    } = args;
    let words: Vec<&str> = args.split_whitespace().collect();

    if words.contains(&"-all") {
        for client in clients.iter_mut() {
            client.disconnect();
        }
        return;
    }

    if words.contains(&"-pending") {
        // cancel scheduled reconnections only
        for client in clients.iter_mut() {
            if client.status() == ServerStatus::Disconnected {
                client.disconnect();
            }
        }
        return;
    }

    if words.is_empty() {
        match find_client(clients, src.serv_name()) {
            Some(client) => client.disconnect(),
            None => ui.add_client_err_msg("Not in a server buffer", &MsgTarget::CurrentTab),
        }
        return;
    }

    for name in words {
        match find_client(clients, name) {
            Some(client) => client.disconnect(),
            None => ui.add_client_err_msg(
                &format!("No such server: {}", name),
                &MsgTarget::CurrentTab,
            ),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static RECONNECT_CMD: Cmd = Cmd {
    name: "reconnect",
    cmd_fn: reconnect,
    description: "Reconnects to a server",
    usage: "`/reconnect [-all|<name>...]`",
};

fn reconnect(args: CmdArgs) {
    let CmdArgs {
        args,
        ui,
        clients,
        src,
        ..
    } = args;
    let words: Vec<&str> = args.split_whitespace().collect();

    if words.contains(&"-all") {
        for client in clients.iter_mut() {
            client.reconnect(None);
        }
        return;
    }

    if words.is_empty() {
        match find_client(clients, src.serv_name()) {
            Some(client) => {
                ui.add_client_msg(
                    "Reconnecting...",
                    &MsgTarget::AllServTabs {
                        serv: src.serv_name(),
                    },
                );
                client.reconnect(None);
            }
            None => ui.add_client_err_msg("Not in a server buffer", &MsgTarget::CurrentTab),
        }
        return;
    }

    for name in words {
        match find_client(clients, name) {
            Some(client) => client.reconnect(None),
            None => ui.add_client_err_msg(
                &format!("No such server: {}", name),
                &MsgTarget::CurrentTab,
            ),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static JOIN_CMD: Cmd = Cmd {
    name: "join",
    cmd_fn: join,
    description: "Joins channels",
    usage: "`/join [-server <name>] <chan1>,<chan2>,... [<key1>,<key2>,...]` or `/join` in a channel buffer to rejoin",
};

fn join(args: CmdArgs) {
    let CmdArgs {
        args,
        ui,
        clients,
        src,
        ..
    } = args;

    let mut words: Vec<&str> = args.split_whitespace().collect();
    let mut serv = src.serv_name().to_owned();
    if words.first() == Some(&"-server") {
        if words.len() < 2 {
            return ui.add_client_err_msg(
                &format!("Usage: {}", JOIN_CMD.usage),
                &MsgTarget::CurrentTab,
            );
        }
        serv = words[1].to_owned();
        words.drain(0..2);
    }

    let (chans, keys) = match words.len() {
        0 => match &src {
            MsgSource::Chan { chan, .. } => (chan.display().to_owned(), None),
            _ => {
                return ui.add_client_err_msg(
                    &format!("Usage: {}", JOIN_CMD.usage),
                    &MsgTarget::CurrentTab,
                )
            }
        },
        1 => (words[0].to_owned(), None),
        2 => (words[0].to_owned(), Some(words[1].to_owned())),
        _ => {
            return ui.add_client_err_msg(
                &format!("Usage: {}", JOIN_CMD.usage),
                &MsgTarget::CurrentTab,
            )
        }
    };

    match find_client(clients, &serv) {
        Some(client) => client.join(&chans, keys.as_deref()),
        None => ui.add_client_err_msg(
            &format!("Can't join: Not connected to server {}", serv),
            &MsgTarget::CurrentTab,
        ),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static PART_CMD: Cmd = Cmd {
    name: "part",
    cmd_fn: part,
    description: "Leaves the channel",
    usage: "`/part [<reason>]`",
};

fn part(args: CmdArgs) {
    let CmdArgs {
        args,
        ui,
        clients,
        src,
        ..
    } = args;
    let reason = if args.is_empty() { None } else { Some(args) };
    match &src {
        MsgSource::Chan { serv, chan } => match find_client(clients, serv) {
            Some(client) => client.part(chan, reason),
            None => {}
        },
        _ => ui.add_client_err_msg("/part only works in a channel buffer", &MsgTarget::CurrentTab),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static CYCLE_CMD: Cmd = Cmd {
    name: "cycle",
    cmd_fn: cycle,
    description: "Leaves and re-joins the channel",
    usage: "`/cycle [<reason>]`",
};

fn cycle(args: CmdArgs) {
    let CmdArgs {
        args,
        ui,
        clients,
        src,
        ..
    } = args;
    let reason = if args.is_empty() { None } else { Some(args) };
    match &src {
        MsgSource::Chan { serv, chan } => {
            if let Some(client) = find_client(clients, serv) {
                client.part(chan, reason);
                client.join(chan.display(), None);
            }
        }
        _ => ui.add_client_err_msg("/cycle only works in a channel buffer", &MsgTarget::CurrentTab),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static KICK_CMD: Cmd = Cmd {
    name: "kick",
    cmd_fn: kick,
    description: "Kicks a user from the channel",
    usage: "`/kick <nick> [<reason>]`",
};

fn kick(args: CmdArgs) {
    let CmdArgs {
        args,
        ui,
        clients,
        src,
        ..
    } = args;
    let mut words = args.split_whitespace();
    let nick = match words.next() {
        None => {
            return ui.add_client_err_msg(
                &format!("Usage: {}", KICK_CMD.usage),
                &MsgTarget::CurrentTab,
            )
        }
        Some(nick) => nick,
    };
    let reason_start = args.find(nick).map(|idx| idx + nick.len()).unwrap_or(0);
    let reason = args[reason_start..].trim();
    let reason = if reason.is_empty() { None } else { Some(reason) };

    match &src {
        MsgSource::Chan { serv, chan } => {
            if let Some(client) = find_client(clients, serv) {
                client.raw_msg(
                    libwren_wire::kick(chan.display(), nick, reason).trim_end_matches("\r\n"),
                );
            }
        }
        _ => ui.add_client_err_msg("/kick only works in a channel buffer", &MsgTarget::CurrentTab),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static KICKBAN_CMD: Cmd = Cmd {
    name: "kickban",
    cmd_fn: kickban,
    description: "Bans and kicks a user from the channel",
    usage: "`/kickban <nick> [<reason>]`",
};

fn kickban(args: CmdArgs) {
    let CmdArgs {
        args,
        ui,
        clients,
        src,
        ..
    } = args;
    let mut words = args.split_whitespace();
    let nick = match words.next() {
        None => {
            return ui.add_client_err_msg(
                &format!("Usage: {}", KICKBAN_CMD.usage),
                &MsgTarget::CurrentTab,
            )
        }
        Some(nick) => nick,
    };

    match &src {
        MsgSource::Chan { serv, chan } => {
            if let Some(client) = find_client(clients, serv) {
                // ban by host when we know it, by nick otherwise
                let mask = match client.get_nick_host(chan, nick) {
                    Some(host) => match host.split_once('@') {
                        Some((_, host)) => format!("*!*@{}", host),
                        None => format!("{}!*@*", nick),
                    },
                    None => format!("{}!*@*", nick),
                };
                client.raw_msg(&format!("MODE {} +b {}", chan.display(), mask));
                let reason_start = args.find(nick).map(|idx| idx + nick.len()).unwrap_or(0);
                let reason = args[reason_start..].trim();
                let reason = if reason.is_empty() { None } else { Some(reason) };
                client.raw_msg(
                    libwren_wire::kick(chan.display(), nick, reason).trim_end_matches("\r\n"),
                );
            }
        }
        _ => ui.add_client_err_msg(
            "/kickban only works in a channel buffer",
            &MsgTarget::CurrentTab,
        ),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static TOPIC_CMD: Cmd = Cmd {
    name: "topic",
    cmd_fn: topic,
    description: "Shows or sets the channel topic",
    usage: "`/topic [<new topic>]`",
};

fn topic(args: CmdArgs) {
    let CmdArgs {
        args,
        ui,
        clients,
        src,
        ..
    } = args;
    match &src {
        MsgSource::Chan { serv, chan } => {
            if let Some(client) = find_client(clients, serv) {
                let new_topic = if args.is_empty() { None } else { Some(args) };
                client.raw_msg(
                    libwren_wire::topic(chan.display(), new_topic).trim_end_matches("\r\n"),
                );
            }
        }
        _ => ui.add_client_err_msg("/topic only works in a channel buffer", &MsgTarget::CurrentTab),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static NAMES_CMD: Cmd = Cmd {
    name: "names",
    cmd_fn: names,
    description: "Shows users in channel",
    usage: "`/names`",
};

fn names(args: CmdArgs) {
    let CmdArgs {
        args,
        ui,
        src,
        clients,
        ..
    } = args;
    let words: Vec<&str> = args.split_whitespace().collect();

    let client = match find_client(clients, src.serv_name()) {
        None => {
            return;
        }
        Some(client) => client,
    };

    if let MsgSource::Chan { ref serv, ref chan } = src {
        let nicks_vec = client.get_chan_nicks(chan);
        let target = MsgTarget::Chan { serv, chan };
        if words.is_empty() {
            ui.add_client_msg(
                &format!("{} users: {}", nicks_vec.len(), nicks_vec.join(", ")),
                &target,
            );
        } else {
            let nick = words[0];
            if nicks_vec.iter().any(|v| v == nick) {
                ui.add_client_msg(&format!("{} is online", nick), &target);
            } else {
                ui.add_client_msg(&format!("{} is not in the channel", nick), &target);
            }
        }
    } else {
        ui.add_client_err_msg("/names only supported in channel buffers", &MsgTarget::CurrentTab);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static WHOIS_CMD: Cmd = Cmd {
    name: "whois",
    cmd_fn: |args| simple_serv_cmd(args, "WHOIS", &WHOIS_CMD),
    description: "Queries user information",
    usage: "`/whois <nick>`",
};

static WHO_CMD: Cmd = Cmd {
    name: "who",
    cmd_fn: |args| simple_serv_cmd(args, "WHO", &WHO_CMD),
    description: "Queries users matching a mask",
    usage: "`/who <mask>`",
};

/// `/whowas`, `/mode`, `/invite`, `/list` and friends only differ in the verb.
fn simple_serv_cmd(args: CmdArgs, verb: &str, cmd: &Cmd) {
    let CmdArgs {
        args,
        ui,
        clients,
        src,
        ..
    } = args;
    if args.is_empty() && verb != "LIST" {
        return ui.add_client_err_msg(&format!("Usage: {}", cmd.usage), &MsgTarget::CurrentTab);
    }
    match find_client(clients, src.serv_name()) {
        Some(client) => {
            if args.is_empty() {
                client.raw_msg(verb);
            } else {
                client.raw_msg(&format!("{} {}", verb, args));
            }
        }
        None => ui.add_client_err_msg(
            &format!("Not connected to server {}", src.serv_name()),
            &MsgTarget::CurrentTab,
        ),
    }
}

static WHOWAS_CMD: Cmd = Cmd {
    name: "whowas",
    cmd_fn: |args| simple_serv_cmd(args, "WHOWAS", &WHOWAS_CMD),
    description: "Queries information about a past nick",
    usage: "`/whowas <nick>`",
};

static MODE_CMD: Cmd = Cmd {
    name: "mode",
    cmd_fn: mode,
    description: "Changes or queries channel/user modes",
    usage: "`/mode [<target>] [<modes> [<args>]]`",
};

fn mode(args: CmdArgs) {
    let CmdArgs {
        args,
        ui,
        clients,
        src,
        ..
    } = args;
    let client = match find_client(clients, src.serv_name()) {
        None => {
            return ui.add_client_err_msg(
                &format!("Not connected to server {}", src.serv_name()),
                &MsgTarget::CurrentTab,
            )
        }
        Some(client) => client,
    };

    // without a target, the current channel (or our own nick) is implied
    let first = args.split_whitespace().next().unwrap_or("");
    let has_target = first.starts_with(['#', '&', '!'])
        || (!first.is_empty()
            && utils::is_nick_first_char(first.chars().next().unwrap())
            && !first.starts_with(['+', '-']));
    if has_target {
        client.raw_msg(&format!("MODE {}", args));
    } else {
        let target = match &src {
            MsgSource::Chan { chan, .. } => chan.display().to_owned(),
            _ => client.get_nick(),
        };
        if args.is_empty() {
            client.raw_msg(&format!("MODE {}", target));
        } else {
            client.raw_msg(&format!("MODE {} {}", target, args));
        }
    }
}

static INVITE_CMD: Cmd = Cmd {
    name: "invite",
    cmd_fn: invite,
    description: "Invites a user to a channel",
    usage: "`/invite <nick> [<channel>]`",
};

fn invite(args: CmdArgs) {
    let CmdArgs {
        args,
        ui,
        clients,
        src,
        ..
    } = args;
    let words: Vec<&str> = args.split_whitespace().collect();
    let chan = match (words.len(), &src) {
        (2, _) => words[1].to_owned(),
        (1, MsgSource::Chan { chan, .. }) => chan.display().to_owned(),
        _ => {
            return ui.add_client_err_msg(
                &format!("Usage: {}", INVITE_CMD.usage),
                &MsgTarget::CurrentTab,
            )
        }
    };
    if let Some(client) = find_client(clients, src.serv_name()) {
        client.raw_msg(libwren_wire::invite(words[0], &chan).trim_end_matches("\r\n"));
    }
}

static LIST_CMD: Cmd = Cmd {
    name: "list",
    cmd_fn: |args| simple_serv_cmd(args, "LIST", &LIST_CMD),
    description: "Lists channels",
    usage: "`/list [<args>]`",
};

static UNBAN_CMD: Cmd = Cmd {
    name: "unban",
    cmd_fn: unban,
    description: "Removes a ban mask from the channel",
    usage: "`/unban <mask>`",
};

fn unban(args: CmdArgs) {
    let CmdArgs {
        args,
        ui,
        clients,
        src,
        ..
    } = args;
    if args.is_empty() {
        return ui.add_client_err_msg(&format!("Usage: {}", UNBAN_CMD.usage), &MsgTarget::CurrentTab);
    }
    match &src {
        MsgSource::Chan { serv, chan } => {
            if let Some(client) = find_client(clients, serv) {
                client.raw_msg(&format!("MODE {} -b {}", chan.display(), args));
            }
        }
        _ => ui.add_client_err_msg("/unban only works in a channel buffer", &MsgTarget::CurrentTab),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static MSG_CMD: Cmd = Cmd {
    name: "msg",
    cmd_fn: msg,
    description: "Sends a message to a user",
    usage: "`/msg <nick> <message>`",
};

pub(crate) fn split_msg_args(args: &str) -> Option<(&str, &str)> {
    let mut char_indices = args.char_indices();

    // We could check for validity of the nick according to RFC 2812 but we do the simple thing
    // for now and only check the first character, to avoid returning a `MsgSource::User` with a
    // channel name as `nick`.
    match char_indices.next() {
        None => {
            return None;
        }
        Some((_, c)) => {
            if !utils::is_nick_first_char(c) {
                return None;
            }
        }
    }

    for (i, c) in char_indices {
        if c.is_whitespace() {
            return Some((&args[0..i], &args[i + 1..]));
        }
    }

    None
}

fn msg(args: CmdArgs) {
    let CmdArgs {
        args,
        ui,
        clients,
        src,
        ..
    } = args;
    let fail = || {
        ui.add_client_err_msg(&format!("Usage: {}", MSG_CMD.usage), &MsgTarget::CurrentTab);
    };

    let (target, msg) = match split_msg_args(args) {
        None => return fail(),
        Some((target, msg)) => {
            if msg.is_empty() {
                return fail();
            } else {
                (target, msg)
            }
        }
    };

    let src = if clients.iter().any(|client| client.get_serv_name() == target) {
        MsgSource::Serv {
            serv: target.to_owned(),
        }
    } else {
        let serv = src.serv_name();
        MsgSource::User {
            serv: serv.to_owned(),
            nick: target.to_owned(),
        }
    };

    crate::send_msg(ui, clients, &src, msg.to_owned(), false);
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static NOTICE_CMD: Cmd = Cmd {
    name: "notice",
    cmd_fn: notice,
    description: "Sends a notice to a user or channel",
    usage: "`/notice <target> <message>`",
};

fn notice(args: CmdArgs) {
    let CmdArgs {
        args,
        ui,
        clients,
        src,
        ..
    } = args;
    let (target, msg) = match args.split_once(' ') {
        Some((target, msg)) if !msg.is_empty() => (target, msg),
        _ => {
            return ui.add_client_err_msg(
                &format!("Usage: {}", NOTICE_CMD.usage),
                &MsgTarget::CurrentTab,
            )
        }
    };
    match find_client(clients, src.serv_name()) {
        Some(client) => {
            // notices are subject to the same 512-byte line limit
            for chunk in client.split_privmsg(target.len(), msg) {
                client.notice(target, chunk);
            }
        }
        None => ui.add_client_err_msg(
            &format!("Not connected to server {}", src.serv_name()),
            &MsgTarget::CurrentTab,
        ),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static ME_CMD: Cmd = Cmd {
    name: "me",
    cmd_fn: me,
    description: "Sends an emote message",
    usage: "`/me <message>`",
};

fn me(args: CmdArgs) {
    let CmdArgs {
        args,
        ui,
        clients,
        src,
        ..
    } = args;
    if args.is_empty() {
        return ui.add_client_err_msg(&format!("Usage: {}", ME_CMD.usage), &MsgTarget::CurrentTab);
    }
    crate::send_msg(ui, clients, &src, args.to_string(), true);
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static CTCP_CMD: Cmd = Cmd {
    name: "ctcp",
    cmd_fn: ctcp,
    description: "Sends a CTCP request",
    usage: "`/ctcp <nick> <type> [<args>]`",
};

fn ctcp(args: CmdArgs) {
    let CmdArgs {
        args,
        ui,
        clients,
        src,
        ..
    } = args;
    let words: Vec<&str> = args.splitn(3, ' ').collect();
    if words.len() < 2 {
        return ui.add_client_err_msg(&format!("Usage: {}", CTCP_CMD.usage), &MsgTarget::CurrentTab);
    }
    match find_client(clients, src.serv_name()) {
        Some(client) => client.ctcp(words[0], words[1], words.get(2).copied()),
        None => ui.add_client_err_msg(
            &format!("Not connected to server {}", src.serv_name()),
            &MsgTarget::CurrentTab,
        ),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static DCC_CMD: Cmd = Cmd {
    name: "dcc",
    cmd_fn: dcc,
    description: "Sends a raw DCC offer (the transfer itself is handled by the transfer engine)",
    usage: "`/dcc <nick> <args>` (example: `/dcc bob CHAT chat 2130706433 5000`)",
};

fn dcc(args: CmdArgs) {
    let CmdArgs {
        args,
        ui,
        clients,
        src,
        ..
    } = args;
    let (nick, rest) = match args.split_once(' ') {
        Some((nick, rest)) if !rest.is_empty() => (nick, rest),
        _ => {
            return ui.add_client_err_msg(&format!("Usage: {}", DCC_CMD.usage), &MsgTarget::CurrentTab)
        }
    };
    match find_client(clients, src.serv_name()) {
        Some(client) => client.ctcp(nick, "DCC", Some(rest)),
        None => ui.add_client_err_msg(
            &format!("Not connected to server {}", src.serv_name()),
            &MsgTarget::CurrentTab,
        ),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static IGNORE_CMD: Cmd = Cmd {
    name: "ignore",
    cmd_fn: ignore,
    description: "Manages the ignore list",
    usage: "`/ignore [add <pattern>|del <pattern>|list]` (pattern matches nicks, `*` wildcard)",
};

fn ignore(args: CmdArgs) {
    let CmdArgs {
        args,
        ui,
        ignores,
        src,
        ..
    } = args;
    let words: Vec<&str> = args.split_whitespace().collect();
    match words.first().copied() {
        Some("add") if words.len() == 2 => {
            ignores.borrow_mut().push(Ignore {
                serv: Some(src.serv_name().to_owned()),
                pattern: words[1].to_owned(),
            });
            ui.add_client_msg(&format!("Ignoring {}", words[1]), &MsgTarget::CurrentTab);
        }
        Some("del") if words.len() == 2 => {
            let mut ignores = ignores.borrow_mut();
            let len_before = ignores.len();
            ignores.retain(|ignore| ignore.pattern != words[1]);
            if ignores.len() == len_before {
                ui.add_client_err_msg(
                    &format!("No ignore for {}", words[1]),
                    &MsgTarget::CurrentTab,
                );
            }
        }
        Some("list") | None => {
            let ignores = ignores.borrow();
            if ignores.is_empty() {
                ui.add_client_msg("Ignore list is empty", &MsgTarget::CurrentTab);
            } else {
                for ignore in ignores.iter() {
                    ui.add_client_msg(
                        &format!(
                            " {} ({})",
                            ignore.pattern,
                            ignore.serv.as_deref().unwrap_or("all servers")
                        ),
                        &MsgTarget::CurrentTab,
                    );
                }
            }
        }
        _ => ui.add_client_err_msg(&format!("Usage: {}", IGNORE_CMD.usage), &MsgTarget::CurrentTab),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static AWAY_CMD: Cmd = Cmd {
    name: "away",
    cmd_fn: away,
    description: "Sets/removes away message",
    usage: "`/away [-all] [<message>]`",
};

fn away(args: CmdArgs) {
    let CmdArgs {
        args,
        clients,
        src,
        ..
    } = args;
    let (all, msg) = match args.strip_prefix("-all") {
        Some(rest) => (true, rest.trim()),
        None => (false, args),
    };
    let msg = if msg.is_empty() { None } else { Some(msg) };

    if all {
        for client in clients.iter_mut() {
            client.away(msg);
        }
    } else if let Some(client) = find_client(clients, src.serv_name()) {
        client.away(msg);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static QUOTE_CMD: Cmd = Cmd {
    name: "quote",
    cmd_fn: quote,
    description: "Sends a raw IRC line to the server",
    usage: "`/quote <line>`",
};

fn quote(args: CmdArgs) {
    let CmdArgs {
        args,
        ui,
        clients,
        src,
        ..
    } = args;
    if args.is_empty() {
        return ui.add_client_err_msg(&format!("Usage: {}", QUOTE_CMD.usage), &MsgTarget::CurrentTab);
    }
    match find_client(clients, src.serv_name()) {
        Some(client) => client.raw_msg(args),
        None => ui.add_client_err_msg(
            &format!("Not connected to server {}", src.serv_name()),
            &MsgTarget::CurrentTab,
        ),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static ALLCHAN_CMD: Cmd = Cmd {
    name: "allchan",
    cmd_fn: allchan,
    description: "Runs a command or sends a message in every channel of the server",
    usage: "`/allchan <command or message>`",
};

fn allchan(mut args: CmdArgs) {
    let line = args.args.to_owned();
    if line.is_empty() {
        return args
            .ui
            .add_client_err_msg(&format!("Usage: {}", ALLCHAN_CMD.usage), &MsgTarget::CurrentTab);
    }
    let serv = args.src.serv_name().to_owned();
    let chans: Vec<ChanName> = match find_client(args.clients, &serv) {
        None => return,
        Some(client) => client
            .infolist("irc_channel")
            .map(|infolist| {
                infolist
                    .items
                    .iter()
                    .filter(|item| item.get_str("type") == Some("channel"))
                    .filter_map(|item| item.get_str("name"))
                    .map(|name| ChanNameRef::new(name).to_owned())
                    .collect()
            })
            .unwrap_or_default(),
    };

    for chan in chans {
        let src = MsgSource::Chan {
            serv: serv.clone(),
            chan,
        };
        run_line_with_src(&line, src, &mut args);
    }
}

static ALLPV_CMD: Cmd = Cmd {
    name: "allpv",
    cmd_fn: allpv,
    description: "Runs a command or sends a message in every private buffer of the server",
    usage: "`/allpv <command or message>`",
};

fn allpv(mut args: CmdArgs) {
    let line = args.args.to_owned();
    if line.is_empty() {
        return args
            .ui
            .add_client_err_msg(&format!("Usage: {}", ALLPV_CMD.usage), &MsgTarget::CurrentTab);
    }
    let serv = args.src.serv_name().to_owned();
    let nicks: Vec<String> = match find_client(args.clients, &serv) {
        None => return,
        Some(client) => client
            .infolist("irc_channel")
            .map(|infolist| {
                infolist
                    .items
                    .iter()
                    .filter(|item| item.get_str("type") == Some("private"))
                    .filter_map(|item| item.get_str("name"))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default(),
    };

    for nick in nicks {
        let src = MsgSource::User {
            serv: serv.clone(),
            nick,
        };
        run_line_with_src(&line, src, &mut args);
    }
}

static ALLSERV_CMD: Cmd = Cmd {
    name: "allserv",
    cmd_fn: allserv,
    description: "Runs a command or sends a message on every connected server",
    usage: "`/allserv <command or message>`",
};

fn allserv(mut args: CmdArgs) {
    let line = args.args.to_owned();
    if line.is_empty() {
        return args
            .ui
            .add_client_err_msg(&format!("Usage: {}", ALLSERV_CMD.usage), &MsgTarget::CurrentTab);
    }
    let servs: Vec<String> = args
        .clients
        .iter()
        .filter(|client| client.status() == ServerStatus::Registered)
        .map(|client| client.get_serv_name().to_owned())
        .collect();

    for serv in servs {
        let src = MsgSource::Serv { serv };
        run_line_with_src(&line, src, &mut args);
    }
}

fn run_line_with_src(line: &str, src: MsgSource, args: &mut CmdArgs) {
    match utils::parse_slash_command(line) {
        Some(cmd) => run_cmd(cmd, src, args),
        None => crate::send_msg(args.ui, args.clients, &src, line.to_owned(), false),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static NICK_CMD: Cmd = Cmd {
    name: "nick",
    cmd_fn: nick,
    description: "Sets your nick",
    usage: "`/nick <nick>`",
};

fn nick(args: CmdArgs) {
    let CmdArgs {
        args,
        ui,
        clients,
        src,
        ..
    } = args;
    let words: Vec<&str> = args.split_whitespace().collect();
    if words.len() == 1 {
        if let Some(client) = find_client(clients, src.serv_name()) {
            let new_nick = words[0];
            client.nick(new_nick);
        }
    } else {
        ui.add_client_err_msg(&format!("Usage: {}", NICK_CMD.usage), &MsgTarget::CurrentTab);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static BUFFER_CMD: Cmd = Cmd {
    name: "buffer",
    cmd_fn: buffer,
    description: "Switches the current buffer",
    usage: "`/buffer <name>` (name is `serv`, `serv/#chan` or `#chan`)",
};

fn buffer(args: CmdArgs) {
    let CmdArgs { args, ui, .. } = args;
    if !ui.switch_tab(args.trim()) {
        ui.add_client_err_msg(&format!("No such buffer: {}", args), &MsgTarget::CurrentTab);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static CLOSE_CMD: Cmd = Cmd {
    name: "close",
    cmd_fn: close,
    description: "Closes the current buffer",
    usage: "`/close`",
};

fn close(args: CmdArgs) {
    let CmdArgs {
        ui,
        clients,
        defs,
        src,
        ..
    } = args;
    match src {
        MsgSource::Serv { serv } => {
            ui.close_server_tab(&serv);
            if let Some(client_idx) = find_client_idx(clients, &serv) {
                let mut client = clients.remove(client_idx);
                client.quit(None);
            }
            defs.retain(|def| def.name != serv);
        }
        MsgSource::Chan { serv, chan } => {
            ui.close_chan_tab(&serv, &chan);
            if let Some(client) = find_client(clients, &serv) {
                client.part(&chan, None);
            }
        }
        MsgSource::User { serv, nick } => {
            ui.close_user_tab(&serv, &nick);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

static HELP_CMD: Cmd = Cmd {
    name: "help",
    cmd_fn: help,
    description: "Displays this message",
    usage: "`/help`",
};

fn help(args: CmdArgs) {
    let CmdArgs { ui, .. } = args;
    ui.add_client_msg("Client commands:", &MsgTarget::CurrentTab);
    for cmd in CMDS.iter() {
        ui.add_client_msg(
            &format!(
                "/{:<10} - {:<60} - Usage: {}",
                cmd.name, cmd.description, cmd.usage
            ),
            &MsgTarget::CurrentTab,
        )
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cmd() {
        let ret = parse_cmd("msg NickServ identify notMyPassword");
        match ret {
            ParseCmdResult::Ok { cmd, rest } => {
                assert_eq!(cmd.name, "msg");
                assert_eq!(rest, "NickServ identify notMyPassword");
            }
            _ => {
                panic!("Can't parse cmd");
            }
        }

        let ret = parse_cmd("join #foo");
        match ret {
            ParseCmdResult::Ok { cmd, rest } => {
                assert_eq!(cmd.name, "join");
                assert_eq!(rest, "#foo");
            }
            _ => {
                panic!("Can't parse cmd");
            }
        }

        assert!(matches!(parse_cmd("frobnicate"), ParseCmdResult::Unknown));
    }

    #[test]
    fn test_msg_args() {
        assert_eq!(split_msg_args("foo,bar"), None);
        assert_eq!(split_msg_args("foo bar"), Some(("foo", "bar")));
        assert_eq!(split_msg_args("foo, bar"), Some(("foo,", "bar")));
        assert_eq!(split_msg_args("foo ,bar"), Some(("foo", ",bar")));
        assert_eq!(split_msg_args("#blah blah"), None);
    }

    #[test]
    fn test_ignore_matching() {
        let ignore = Ignore {
            serv: None,
            pattern: "spam*".to_owned(),
        };
        assert!(ignore.matches("srv", "spammer"));
        assert!(ignore.matches("srv", "SpamLord"));
        assert!(!ignore.matches("srv", "alice"));

        let scoped = Ignore {
            serv: Some("srv1".to_owned()),
            pattern: "bob".to_owned(),
        };
        assert!(scoped.matches("srv1", "bob"));
        assert!(!scoped.matches("srv1", "bobby"));
        assert!(!scoped.matches("srv2", "bob"));
    }

    #[test]
    fn test_glob() {
        assert!(glob_match("abc", "abc"));
        assert!(!glob_match("abc", "abcd"));
        assert!(glob_match("a*c", "abc"));
        assert!(glob_match("a*c", "aXYZc"));
        assert!(!glob_match("a*c", "abcd"));
        assert!(glob_match("*bot", "funbot"));
        assert!(glob_match("bot*", "botling"));
        assert!(glob_match("*", "anything"));
    }
}
