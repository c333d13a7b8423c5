mod cli;
mod cmd;
mod config;
mod conn;
mod debug_logging;
mod ui;
mod utils;

use cmd::{CmdArgs, IgnoreList};
use libwren_client::{Client, ServerInfo};
use libwren_common::{MsgSource, MsgTarget};
use ui::{InputEvent, UI};

use std::cell::RefCell;
use std::path::PathBuf;
use std::process::exit;
use std::rc::Rc;

#[macro_use]
extern crate log;

fn main() {
    let cli::Args {
        servers: server_args,
        config_path,
    } = cli::parse();
    let config_path = config_path.unwrap_or_else(config::get_config_path);
    if config_path.is_dir() {
        println!("The config path is a directory.");
        ::std::process::exit(1);
    } else if !config_path.is_file() {
        config::generate_default_config(&config_path);
    } else {
        match config::parse_config(&config_path) {
            Err(yaml_err) => {
                println!("Can't parse config file:");
                println!("{}", yaml_err);
                exit(1);
            }
            Ok(config) => {
                let config_errors = config.validate();
                if !config_errors.is_empty() {
                    println!(
                        "Config file error{}:",
                        if config_errors.len() > 1 { "s" } else { "" }
                    );
                    for error in config_errors {
                        println!("- {}", error);
                    }
                    exit(1);
                }

                let config = match config.read_passwords() {
                    None => exit(1),
                    Some(config) => config,
                };

                let mut server_infos = config.server_infos();
                if !server_args.is_empty() {
                    // Connect only to servers that match at least one of the given patterns
                    server_infos.retain(|server| {
                        server_args.iter().any(|arg| server.name.contains(arg))
                    });
                }

                let defaults = config.defaults.clone();
                let log_dir = config.log_dir.clone();
                run(server_infos, defaults, log_dir)
            }
        }
    }
}

const DEBUG_LOG_FILE: &str = "wren_debug_logs.txt";

fn run(server_infos: Vec<ServerInfo>, defaults: config::Defaults, log_dir: Option<PathBuf>) {
    let debug_log_file = match log_dir.as_ref() {
        Some(log_dir) => {
            let _ = std::fs::create_dir_all(log_dir);
            let mut log_dir = log_dir.clone();
            log_dir.push(DEBUG_LOG_FILE);
            log_dir
        }
        None => DEBUG_LOG_FILE.into(),
    };
    debug_logging::init(debug_log_file);

    // One task for each engine, one for stdin, all on the same thread
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let local = tokio::task::LocalSet::new();

    local.block_on(&runtime, async move {
        let ui = UI::new();

        let ignores: IgnoreList = Rc::new(RefCell::new(Vec::new()));
        let mut clients: Vec<Client> = Vec::with_capacity(server_infos.len());
        let mut defs: Vec<ServerInfo> = Vec::with_capacity(server_infos.len());

        for server_info in server_infos {
            defs.push(server_info.clone());
            cmd::add_client(&ui, &mut clients, &ignores, server_info);
        }

        let (snd_input, mut rcv_input) = tokio::sync::mpsc::channel::<InputEvent>(100);
        tokio::task::spawn_local(ui::input_task(ui.clone(), snd_input));

        while let Some(ev) = rcv_input.recv().await {
            match ev {
                InputEvent::Abort => {
                    for client in &mut clients {
                        client.quit(None);
                    }
                    break;
                }
                InputEvent::Msg { msg, source } => {
                    send_msg(&ui, &mut clients, &source, msg, false);
                }
                InputEvent::Cmd { cmd, source } => {
                    let mut args = CmdArgs {
                        args: "",
                        defaults: &defaults,
                        ui: &ui,
                        clients: &mut clients,
                        defs: &mut defs,
                        ignores: &ignores,
                        src: source.clone(),
                    };
                    cmd::run_cmd(&cmd, source, &mut args);
                }
            }
        }
    });

    runtime.block_on(local);
}

pub(crate) fn send_msg(
    ui: &UI,
    clients: &mut [Client],
    src: &MsgSource,
    msg: String,
    is_action: bool,
) {
    let client = match clients
        .iter_mut()
        .find(|client| client.get_serv_name() == src.serv_name())
    {
        Some(client) => client,
        None => {
            return ui.add_client_err_msg(
                &format!("Can't find server: {}", src.serv_name()),
                &MsgTarget::CurrentTab,
            );
        }
    };

    // `ui_target`: Where to show the message on the UI
    // `msg_target`: Actual PRIVMSG target to send to the server
    let (ui_target, msg_target): (MsgTarget, &str) = {
        match src {
            MsgSource::Serv { .. } => {
                // we don't split raw messages to 512-bytes long chunks
                client.raw_msg(&msg);
                return;
            }

            MsgSource::Chan { ref serv, ref chan } => {
                (MsgTarget::Chan { serv, chan }, chan.display())
            }

            MsgSource::User { ref serv, ref nick } => {
                let msg_target = if nick.eq_ignore_ascii_case("nickserv")
                    || nick.eq_ignore_ascii_case("chanserv")
                {
                    MsgTarget::Server { serv }
                } else {
                    MsgTarget::User { serv, nick }
                };
                (msg_target, nick)
            }
        }
    };

    let extra_len = msg_target.len()
        + if is_action {
            9 // "\x01ACTION \x01".len()
        } else {
            0
        };
    for msg in client.split_privmsg(extra_len, &msg) {
        client.privmsg(msg_target, msg, is_action);
        ui.add_privmsg(
            &client.get_nick(),
            msg,
            &ui_target,
            libwren_common::Notify::None,
            is_action,
        );
    }
    debug!("sent message to {}", msg_target);
}
