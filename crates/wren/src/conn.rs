#![allow(clippy::cognitive_complexity)]

//! IRC event handling: translates engine events into UI lines.

use crate::cmd::IgnoreList;
use crate::ui::UI;

use libwren_client::{Client, Event, Target};
use libwren_common::{ChanNameRef, MsgTarget, Notify};
use libwren_wire as wire;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

pub(crate) async fn task(
    rcv_ev: mpsc::Receiver<Event>,
    ui: UI,
    client: Client,
    ignores: IgnoreList,
) {
    let mut rcv_ev = ReceiverStream::new(rcv_ev);
    while let Some(ev) = rcv_ev.next().await {
        handle_conn_ev(&ui, &client, &ignores, ev);
    }
}

/// Maps the engine's routing verdict to a UI buffer.
fn route_to_msg_target<'a>(serv: &'a str, target: &'a Target) -> MsgTarget<'a> {
    match target {
        Target::Core | Target::Current => MsgTarget::CurrentTab,
        Target::Server => MsgTarget::Server { serv },
        Target::Private(nick) => MsgTarget::User { serv, nick },
        Target::Chan(chan) => MsgTarget::Chan {
            serv,
            chan: chan.as_ref(),
        },
    }
}

fn handle_conn_ev(ui: &UI, client: &Client, ignores: &IgnoreList, ev: Event) {
    let serv = client.get_serv_name();
    match ev {
        Event::ResolvingHost => {
            ui.add_client_msg("Resolving host...", &MsgTarget::AllServTabs { serv });
        }
        Event::Connecting { host, port } => {
            ui.add_client_msg(
                &format!("Connecting to {}:{}", host, port),
                &MsgTarget::AllServTabs { serv },
            );
        }
        Event::Connected => {
            ui.add_client_msg("Connected.", &MsgTarget::AllServTabs { serv });
        }
        Event::Registered => {
            ui.add_client_msg("Registered.", &MsgTarget::Server { serv });
        }
        Event::ConnectError(status) => {
            ui.add_err_msg(
                &format!("Connection failed: {:?}", status),
                &MsgTarget::AllServTabs { serv },
            );
        }
        Event::Disconnected { reconnect_secs } => {
            match reconnect_secs {
                Some(secs) => ui.add_err_msg(
                    &format!("Disconnected. Will try to reconnect in {} seconds.", secs),
                    &MsgTarget::AllServTabs { serv },
                ),
                None => ui.add_err_msg("Disconnected.", &MsgTarget::AllServTabs { serv }),
            };
        }
        Event::IoErr(err) => {
            ui.add_err_msg(
                &format!("Connection error: {}", err),
                &MsgTarget::AllServTabs { serv },
            );
        }
        Event::TlsErr(err) => {
            ui.add_err_msg(
                &format!("TLS error: {}", err),
                &MsgTarget::AllServTabs { serv },
            );
        }
        Event::ConnectionClosed => {
            ui.add_err_msg(
                "Connection closed on the remote end",
                &MsgTarget::AllServTabs { serv },
            );
        }
        Event::NickChange { new_nick } => {
            ui.set_nick(serv, &new_nick);
        }
        Event::Msg(msg) => {
            handle_irc_msg(ui, client, ignores, msg);
        }
        Event::WireError(err) => {
            ui.add_err_msg(
                &format!("Wire protocol error: {}", err),
                &MsgTarget::Server { serv },
            );
        }
        Event::Lag { lag_ms } => {
            log::debug!("{}: lag {} ms", serv, lag_ms);
        }
        Event::CtcpRequest {
            nick,
            ty,
            args,
            blocked,
        } => {
            let target = client.route_target("ctcp", None, Some(&nick));
            let msg_target = route_to_msg_target(serv, &target);
            ui.add_client_msg(
                &format!(
                    "CTCP requested by {}: {}{}{}",
                    nick,
                    ty,
                    args.as_deref().map(|_| " ").unwrap_or(""),
                    args.as_deref().unwrap_or(""),
                ),
                &msg_target,
            );
            if blocked {
                ui.add_client_msg("(blocked)", &msg_target);
            }
        }
        Event::CtcpUnknown { nick, ty, args } => {
            ui.add_client_msg(
                &format!(
                    "Unknown CTCP requested by {}: {} {}",
                    nick,
                    ty,
                    args.as_deref().unwrap_or(""),
                ),
                &MsgTarget::Server { serv },
            );
        }
        Event::Dcc { nick, offer } => {
            ui.add_client_msg(
                &format!("DCC {} offer from {}: {:?}", offer.type_str(), nick, offer),
                &MsgTarget::Server { serv },
            );
        }
        Event::SaslFailure { reason } => {
            ui.add_err_msg(
                &format!("SASL authentication failed: {}", reason),
                &MsgTarget::Server { serv },
            );
        }
        Event::ChannelJoinError { chan, msg } => {
            ui.add_client_err_msg(
                &format!("Cannot join {}: {}", chan.display(), msg),
                &MsgTarget::Server { serv },
            );
        }
        Event::Err { msg } => {
            ui.add_err_msg(&msg, &MsgTarget::Server { serv });
        }
    }
}

fn is_ignored(ignores: &IgnoreList, serv: &str, pfx: &Option<wire::Pfx>) -> bool {
    match pfx.as_ref().and_then(|pfx| pfx.nick()) {
        None => false,
        Some(nick) => ignores
            .borrow()
            .iter()
            .any(|ignore| ignore.matches(serv, nick)),
    }
}

fn handle_irc_msg(ui: &UI, client: &Client, ignores: &IgnoreList, msg: wire::Msg) {
    use wire::Cmd::*;
    use wire::Pfx::*;

    let wire::Msg { pfx, cmd, .. } = msg;
    let serv = client.get_serv_name();
    match cmd {
        PRIVMSG {
            target,
            msg,
            is_notice,
            ctcp,
        } => {
            let pfx = match pfx {
                Some(pfx) => pfx,
                None => {
                    log::debug!("PRIVMSG without prefix: {:?}", msg);
                    return;
                }
            };

            if is_ignored(ignores, serv, &Some(pfx.clone())) {
                return;
            }

            // CTCP requests are displayed via their own events; only ACTION and replies reach
            // the buffers here
            match &ctcp {
                None | Some(wire::CTCP::Action) => {}
                Some(other) => {
                    if is_notice {
                        ui.add_client_msg(
                            &format!(
                                "CTCP {} reply from {}: {}",
                                other.type_str(),
                                pfx.host(),
                                msg
                            ),
                            &MsgTarget::Server { serv },
                        );
                    }
                    return;
                }
            }

            // Sender to be shown in the UI
            let sender = match &pfx {
                Server(ref serv) => serv,
                User { ref nick, .. } | Ambiguous(ref nick) => nick,
            };

            let is_action = ctcp == Some(wire::CTCP::Action);

            match target {
                wire::MsgTarget::Chan(chan) => {
                    let ui_msg_target = MsgTarget::Chan { serv, chan: &chan };
                    let notify = if libwren_client::contains_nick(&msg, &client.get_nick()) {
                        Notify::Highlight
                    } else {
                        Notify::Message
                    };
                    ui.add_privmsg(sender, &msg, &ui_msg_target, notify, is_action);
                }
                wire::MsgTarget::User(msg_target) => {
                    match &pfx {
                        Server(_) => {
                            // the routing policy decides where server notices go
                            let route = client.route_target(
                                if is_notice { "notice" } else { "privmsg" },
                                None,
                                None,
                            );
                            let msg_target = route_to_msg_target(serv, &route);
                            ui.add_privmsg(sender, &msg, &msg_target, Notify::None, is_action);
                        }
                        User { nick, .. } | Ambiguous(nick) => {
                            // a STATUSMSG-prefixed channel target still belongs to the channel
                            let mut chars = msg_target.chars();
                            let statusmsg_chan = match chars.next() {
                                Some(c) if "~&@%+".contains(c) => {
                                    let rest = chars.as_str();
                                    rest.starts_with(['#', '&', '+', '!']).then(|| rest.to_owned())
                                }
                                _ => None,
                            };
                            if let Some(chan) = statusmsg_chan {
                                ui.add_privmsg(
                                    nick,
                                    &msg,
                                    &MsgTarget::Chan {
                                        serv,
                                        chan: ChanNameRef::new(&chan),
                                    },
                                    Notify::Message,
                                    is_action,
                                );
                            } else if msg_target == client.get_nick() {
                                // a private message to us: open the conversation if needed,
                                // except for notices without an existing one
                                let ui_target = if is_notice && !ui.user_tab_exists(serv, nick) {
                                    MsgTarget::Server { serv }
                                } else {
                                    ui.new_user_tab(serv, nick);
                                    MsgTarget::User { serv, nick }
                                };
                                ui.add_privmsg(nick, &msg, &ui_target, Notify::Private, is_action);
                            } else {
                                // sent by us from another client sharing the connection, or a
                                // host-mask target
                                ui.add_privmsg(
                                    nick,
                                    &msg,
                                    &MsgTarget::Server { serv },
                                    Notify::None,
                                    is_action,
                                );
                            }
                        }
                    }
                }
            }
        }

        JOIN { chan } => {
            let nick = match pfx {
                Some(User { nick, .. }) | Some(Ambiguous(nick)) => nick,
                Some(Server(_)) | None => {
                    return;
                }
            };
            if nick == client.get_nick() {
                ui.new_chan_tab(serv, &chan);
                ui.add_client_msg(
                    &format!("Joined {}", chan.display()),
                    &MsgTarget::Chan { serv, chan: &chan },
                );
            } else if !is_ignored(ignores, serv, &Some(Ambiguous(nick.clone()))) {
                ui.add_nick(
                    wire::drop_nick_prefix(&nick),
                    &MsgTarget::Chan { serv, chan: &chan },
                );
            }
        }

        PART { chan, msg } => {
            let nick = match pfx {
                Some(User { nick, .. }) | Some(Ambiguous(nick)) => nick,
                Some(Server(_)) | None => {
                    return;
                }
            };
            if nick != client.get_nick() && !is_ignored(ignores, serv, &Some(Ambiguous(nick.clone())))
            {
                ui.remove_nick(&nick, msg.as_deref(), &MsgTarget::Chan { serv, chan: &chan });
            }
        }

        QUIT { chans, msg } => {
            let nick = match pfx {
                Some(User { ref nick, .. }) | Some(Ambiguous(ref nick)) => nick,
                Some(Server(_)) | None => {
                    return;
                }
            };
            for chan in &chans {
                ui.remove_nick(nick, msg.as_deref(), &MsgTarget::Chan { serv, chan });
            }
            if ui.user_tab_exists(serv, nick) {
                ui.remove_nick(nick, msg.as_deref(), &MsgTarget::User { serv, nick });
            }
        }

        NICK { nick, chans } => {
            let old_nick = match pfx {
                Some(User { nick, .. }) | Some(Ambiguous(nick)) => nick,
                Some(Server(_)) | None => {
                    return;
                }
            };
            for chan in &chans {
                ui.rename_nick(&old_nick, &nick, &MsgTarget::Chan { serv, chan });
            }
            if ui.user_tab_exists(serv, &old_nick) {
                ui.rename_nick(
                    &old_nick,
                    &nick,
                    &MsgTarget::User {
                        serv,
                        nick: &old_nick,
                    },
                );
            }
        }

        KICK { chan, nick, msg } => {
            let target = MsgTarget::Chan { serv, chan: &chan };
            match msg {
                None => ui.add_client_msg(&format!("{} was kicked", nick), &target),
                Some(msg) => {
                    ui.add_client_msg(&format!("{} was kicked: {}", nick, msg), &target)
                }
            }
        }

        MODE {
            target,
            modes,
            params,
            smart_filtered,
        } => {
            // per-frame smart filter: one ineligible letter shows the whole line
            if !smart_filtered {
                let setter = pfx.as_ref().map(|pfx| pfx.host()).unwrap_or_default();
                let line = format!("Mode {} [{} {}] by {}", target, modes, params.join(" "), setter);
                if target.starts_with(['#', '&', '+', '!']) {
                    ui.add_client_msg(
                        &line,
                        &MsgTarget::Chan {
                            serv,
                            chan: ChanNameRef::new(&target),
                        },
                    );
                } else {
                    ui.add_client_msg(&line, &MsgTarget::Server { serv });
                }
            }
        }

        INVITE { nick, chan } => {
            ui.add_client_msg(
                &format!("{} invited you to {}", nick, chan.display()),
                &MsgTarget::Server { serv },
            );
        }

        TOPIC { chan, topic } => {
            ui.set_topic(&topic, serv, &chan);
        }

        WALLOPS { msg } => {
            ui.add_client_msg(&format!("WALLOPS: {}", msg), &MsgTarget::Server { serv });
        }

        ACCOUNT { .. } | AWAY { .. } | PING { .. } | PONG { .. } | CAP { .. }
        | AUTHENTICATE { .. } => {
            // bookkeeping already done by the engine
        }

        ERROR { msg } => {
            ui.add_err_msg(&msg, &MsgTarget::AllServTabs { serv });
        }

        Reply { num, params } => {
            handle_numeric(ui, client, num, params, pfx);
        }

        Other { cmd, params } => match pfx {
            Some(Server(msg_serv)) => {
                let msg_target = MsgTarget::Server { serv };
                ui.add_privmsg(&msg_serv, &params.join(" "), &msg_target, Notify::None, false);
            }
            Some(User { .. }) | Some(Ambiguous(_)) | None => {
                log::debug!("Ignoring command {}: pfx={:?}, params={:?}", cmd, pfx, params);
            }
        },
    }
}

/// `(numeric, alias)` pairs for the routing policy.
fn numeric_alias(num: u16) -> Option<&'static str> {
    match num {
        301 | 307 | 311..=314 | 316..=319 | 330 | 338 => Some("whois"),
        352 | 315 => Some("who"),
        367 | 368 => Some("banlist"),
        321..=323 => Some("list"),
        _ => None,
    }
}

fn handle_numeric(ui: &UI, client: &Client, num: u16, params: Vec<String>, pfx: Option<wire::Pfx>) {
    let serv = client.get_serv_name();
    let n_params = params.len();

    if (num <= 3 // RPL_WELCOME, RPL_YOURHOST, RPL_CREATED
        || num == 251 // RPL_LUSERCLIENT
        || num == 255 // RPL_LUSERME
        || num == 372 // RPL_MOTD
        || num == 375 // RPL_MOTDSTART
        || num == 376)
        // RPL_ENDOFMOTD
        && n_params == 2
    {
        let msg = &params[1];
        ui.add_msg(msg, &MsgTarget::Server { serv });
    } else if num == 4 // RPL_MYINFO
        || num == 5 // RPL_ISUPPORT
        || (252..=254).contains(&num)
    // RPL_LUSEROP, RPL_LUSERUNKNOWN, RPL_LUSERCHANNELS
    {
        let msg = params.join(" ");
        ui.add_msg(&msg, &MsgTarget::Server { serv });
    } else if (num == 265 || num == 266 || num == 250) && n_params > 0 {
        let msg = &params[n_params - 1];
        ui.add_msg(msg, &MsgTarget::Server { serv });
    }
    // RPL_TOPIC
    else if num == 332 && (n_params == 3 || n_params == 2) {
        let chan = &params[n_params - 2];
        let topic = &params[n_params - 1];
        ui.set_topic(topic, serv, ChanNameRef::new(chan));
    }
    // RPL_NAMREPLY and RPL_ENDOFNAMES: the nick list is kept by the engine
    else if num == 353 || num == 366 {
    }
    // RPL_UNAWAY or RPL_NOWAWAY
    else if (num == 305 || num == 306) && n_params > 1 {
        let msg = &params[1];
        ui.add_client_msg(msg, &MsgTarget::AllServTabs { serv });
    }
    // ERR_NOSUCHNICK
    else if num == 401 && n_params > 2 {
        let nick = &params[1];
        let msg = &params[2];
        ui.add_client_msg(msg, &MsgTarget::User { serv, nick });
    // RPL_AWAY
    } else if num == 301 && n_params > 2 {
        let nick = &params[1];
        let msg = &params[2];
        ui.add_client_msg(
            &format!("{} is away: {}", nick, msg),
            &MsgTarget::User { serv, nick },
        );
    } else {
        // everything else goes through the routing policy
        let route = client.route_target(&num.to_string(), numeric_alias(num), None);
        let msg_target = route_to_msg_target(serv, &route);
        match pfx {
            Some(wire::Pfx::Server(_)) | Some(wire::Pfx::Ambiguous(_)) | None => {
                ui.add_msg(&params.join(" "), &msg_target);
            }
            Some(wire::Pfx::User { .. }) => {
                log::debug!("Ignoring numeric reply {}: params={:?}", num, params);
            }
        }
    }
}
