//! The `MODE` interpreter: applies a modifier string to channel/user state using the server's
//! CHANMODES classification.

use crate::chan::{unix_now, Chan};
use crate::isupport::Isupport;

use libwren_common::irc_eq;

/// Per-application context: server properties plus the smart-filter configuration.
pub(crate) struct ModeCtx<'a> {
    pub(crate) isupport: &'a Isupport,
    pub(crate) local_nick: &'a str,

    /// Master switch for join/part/mode smart filtering.
    pub(crate) smart_filter: bool,

    /// Which mode letters are eligible: `*` for all, `+` for prefix modes, `-xyz` for all but
    /// x/y/z, otherwise an explicit letter list. Empty disables filtering.
    pub(crate) smart_filter_modes: &'a str,

    /// Seconds since a nick last spoke for the nick to count as "recently speaking".
    pub(crate) smart_filter_window: u64,
}

/// Type of a channel mode letter:
///   A = list mode, manipulates a modelist, always has a parameter
///   B = setting that always has a parameter
///   C = setting with a parameter only when set
///   D = flag, never has a parameter
///
/// Example: `CHANMODES=beI,k,l,imnpstaqr` gives A = { b, e, I }, B = { k }, C = { l },
/// D = { i, m, n, p, s, t, a, q, r }. Modes not listed anywhere are treated as type D.
pub(crate) fn chanmode_type(isupport: &Isupport, mode: char) -> char {
    // Assume type 'B' when the mode is in PREFIX. Checked first because some exotic servers
    // include the prefix letters in CHANMODES as type 'A', which is wrong.
    if isupport.prefix_mode_index(mode).is_some() {
        return 'B';
    }

    for (class, letters) in ['A', 'B', 'C', 'D'].into_iter().zip(&isupport.chanmodes) {
        if letters.contains(mode) {
            return class;
        }
    }

    'D'
}

/// Normalizes a mode argument string: collapses whitespace and skips the colon some servers put
/// before arguments.
pub(crate) fn get_arguments(arguments: &str) -> String {
    arguments
        .split_whitespace()
        .map(|arg| arg.strip_prefix(':').unwrap_or(arg))
        .collect::<Vec<&str>>()
        .join(" ")
}

/// Rewrites the rendered `chan.modes` string (`+<flags> <args>`) for one mode change.
///
/// Example: modes `+tn`, change `('+', 'k', Some("password"))` gives `+tnk password`.
fn channel_update(isupport: &Isupport, chan: &mut Chan, set_flag: char, chanmode: char, argument: Option<&str>) {
    let modes = chan.modes.clone().unwrap_or_else(|| "+".to_owned());

    let (str_modes, args): (&str, Vec<&str>) = match modes.find(' ') {
        Some(idx) => (&modes[..idx], modes[idx + 1..].split_whitespace().collect()),
        None => (&modes, Vec::new()),
    };

    let mut new_modes = String::with_capacity(str_modes.len() + 1);
    let mut new_args: Vec<String> = Vec::with_capacity(args.len() + 1);

    let mut current_arg = 0;
    let mut chanmode_found = false;
    for c in str_modes.chars() {
        if c == '+' || c == '-' {
            new_modes.push(c);
            continue;
        }

        let ptr_arg = match chanmode_type(isupport, c) {
            'A' | 'B' | 'C' => {
                let arg = args.get(current_arg).copied();
                if arg.is_some() {
                    current_arg += 1;
                }
                arg
            }
            _ => None,
        };

        if c == chanmode {
            if !chanmode_found {
                chanmode_found = true;
                if set_flag == '+' {
                    new_modes.push(c);
                    if let Some(argument) = argument {
                        new_args.push(argument.to_owned());
                    }
                }
            }
        } else {
            new_modes.push(c);
            if let Some(arg) = ptr_arg {
                new_args.push(arg.to_owned());
            }
        }
    }

    if !chanmode_found && set_flag == '+' {
        match argument {
            Some(argument) => {
                // mode with argument goes at the end of modes
                new_modes.push(chanmode);
                new_args.push(argument.to_owned());
            }
            None => {
                // mode without argument goes right after the leading signs
                let insert_at = new_modes
                    .char_indices()
                    .find(|(_, c)| *c != '+')
                    .map(|(i, _)| i)
                    .unwrap_or(new_modes.len());
                new_modes.insert(insert_at, chanmode);
            }
        }
    }

    let rendered = if new_args.is_empty() {
        new_modes
    } else {
        format!("{} {}", new_modes, new_args.join(" "))
    };

    chan.modes = if rendered == "+" { None } else { Some(rendered) };
}

/// Is this mode letter in the user's smart-filter set?
fn smart_filtered(ctx: &ModeCtx, mode: char) -> bool {
    let cfg = ctx.smart_filter_modes;

    if cfg.is_empty() {
        return false;
    }
    if cfg == "*" {
        return true;
    }
    if cfg == "+" {
        return ctx.isupport.prefix_modes.contains(mode);
    }
    if let Some(excluded) = cfg.strip_prefix('-') {
        return !excluded.contains(mode);
    }
    cfg.contains(mode)
}

/// Applies a `MODE` modifier string to a channel.
///
/// Returns whether the whole change is eligible for smart-filtering: it is suppressed iff every
/// letter in the frame is individually eligible and no affected nick is us or spoke recently.
pub(crate) fn channel_set(
    ctx: &ModeCtx,
    chan: &mut Chan,
    setter_host: Option<&str>,
    modes: &str,
    arguments: &str,
) -> bool {
    let arguments = get_arguments(arguments);
    let args: Vec<&str> = arguments.split_whitespace().collect();
    let casemapping = ctx.isupport.casemapping;

    let mut smart_filter = ctx.smart_filter && !ctx.smart_filter_modes.is_empty();

    let mut current_arg = 0;
    let mut set_flag = '+';
    for c in modes.chars() {
        match c {
            ':' => {}
            ' ' => break,
            '+' => set_flag = '+',
            '-' => set_flag = '-',
            _ => {
                let chanmode_type = chanmode_type(ctx.isupport, c);
                let mut update_channel_modes = chanmode_type != 'A';
                let ptr_arg: Option<&str> = match chanmode_type {
                    'A' | 'B' => args.get(current_arg).copied(),
                    'C' if set_flag == '+' => args.get(current_arg).copied(),
                    _ => None,
                };
                if ptr_arg.is_some() {
                    current_arg += 1;
                }

                if smart_filter && !smart_filtered(ctx, c) {
                    smart_filter = false;
                }

                if c == 'k' {
                    // channel key; "*" as the new key means "key unchanged"
                    if set_flag == '-' {
                        chan.key = None;
                    } else if let Some(arg) = ptr_arg {
                        if arg != "*" {
                            chan.key = Some(arg.to_owned());
                        }
                    }
                } else if c == 'l' {
                    if set_flag == '-' {
                        chan.limit = 0;
                    } else if let Some(arg) = ptr_arg {
                        chan.limit = arg.parse().unwrap_or(0);
                    }
                } else if chanmode_type != 'A' && ctx.isupport.prefix_mode_index(c).is_some() {
                    // mode for a nick
                    update_channel_modes = false;
                    if let (Some(arg), Some(prefix_char)) =
                        (ptr_arg, ctx.isupport.prefix_char_for_mode(c))
                    {
                        let ranking = ctx.isupport.prefix_chars.clone();
                        if smart_filter
                            && (irc_eq(arg, ctx.local_nick, casemapping)
                                || chan.speaking.spoke_recently(
                                    arg,
                                    ctx.smart_filter_window,
                                    casemapping,
                                ))
                        {
                            smart_filter = false;
                        }
                        if let Some(nick) = chan.find_nick_mut(arg, casemapping) {
                            nick.set_prefix(set_flag == '+', prefix_char, &ranking);
                        }
                    }
                } else if chanmode_type == 'A' {
                    if let Some(arg) = ptr_arg {
                        if set_flag == '+' {
                            chan.modelist_mut(c).add(arg, setter_host, unix_now());
                        } else if let Some(idx) =
                            chan.modelists.iter().position(|l| l.letter == c)
                        {
                            chan.modelists[idx].remove(arg);
                        }
                    }
                }

                if update_channel_modes {
                    channel_update(ctx.isupport, chan, set_flag, c, ptr_arg);
                }
            }
        }
    }

    smart_filter
}

/// Applies a `MODE` modifier string to our own user modes (`server.current_nick_modes`). No
/// arguments are consumed.
pub(crate) fn user_set(nick_modes: &mut String, modes: &str, reset_modes: bool) {
    if reset_modes {
        nick_modes.clear();
    }
    let mut set_flag = '+';
    for c in modes.chars() {
        match c {
            ' ' => break,
            ':' => {}
            '+' => set_flag = '+',
            '-' => set_flag = '-',
            _ => {
                if set_flag == '+' {
                    if !nick_modes.contains(c) {
                        nick_modes.push(c);
                    }
                } else {
                    nick_modes.retain(|m| m != c);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chan::{ChanKind, Nick};
    use libwren_common::ChanName;

    fn test_isupport() -> Isupport {
        let mut isupport = Isupport::default();
        isupport.apply_tokens(
            "CHANMODES=eIbq,k,flj,CFLMPQScgimnprstz PREFIX=(ov)@+ CASEMAPPING=rfc1459".split(' '),
        );
        isupport
    }

    fn test_chan() -> Chan {
        Chan::new(ChanName::new("#test1".to_owned()), ChanKind::Channel)
    }

    fn ctx(isupport: &Isupport) -> ModeCtx {
        ModeCtx {
            isupport,
            local_nick: "wren",
            smart_filter: true,
            smart_filter_modes: "+",
            smart_filter_window: 300,
        }
    }

    #[test]
    fn chanmode_types() {
        let isupport = test_isupport();
        assert_eq!(chanmode_type(&isupport, 'b'), 'A');
        assert_eq!(chanmode_type(&isupport, 'q'), 'A');
        assert_eq!(chanmode_type(&isupport, 'k'), 'B');
        assert_eq!(chanmode_type(&isupport, 'l'), 'C');
        assert_eq!(chanmode_type(&isupport, 'i'), 'D');
        // unknown letters default to D
        assert_eq!(chanmode_type(&isupport, 'X'), 'D');
        // prefix modes are always B, even when a server (wrongly) lists them in class A
        assert_eq!(chanmode_type(&isupport, 'o'), 'B');
        assert_eq!(chanmode_type(&isupport, 'v'), 'B');
    }

    #[test]
    fn prefix_letter_in_class_a_still_b() {
        let mut isupport = Isupport::default();
        isupport.apply_tokens("CHANMODES=bo,k,l,imnpst PREFIX=(ov)@+".split(' '));
        assert_eq!(chanmode_type(&isupport, 'o'), 'B');
    }

    #[test]
    fn test_get_arguments() {
        assert_eq!(get_arguments(""), "");
        assert_eq!(get_arguments("abc def"), "abc def");
        assert_eq!(get_arguments(":abc :def :ghi"), "abc def ghi");
        assert_eq!(get_arguments("abc   :def  ghi "), "abc def ghi");
    }

    #[test]
    fn key_trajectory() {
        let isupport = test_isupport();
        let mut chan = test_chan();
        let ctx = ctx(&isupport);

        assert_eq!(chan.key, None);
        assert_eq!(chan.modes, None);

        channel_set(&ctx, &mut chan, Some("x!y@z"), "+k", "key1");
        assert_eq!(chan.key.as_deref(), Some("key1"));
        assert_eq!(chan.modes.as_deref(), Some("+k key1"));

        channel_set(&ctx, &mut chan, Some("x!y@z"), "+k", "key2");
        assert_eq!(chan.key.as_deref(), Some("key2"));
        assert_eq!(chan.modes.as_deref(), Some("+k key2"));

        // "*" as key value leaves the key unchanged
        channel_set(&ctx, &mut chan, Some("x!y@z"), "+k", "*");
        assert_eq!(chan.key.as_deref(), Some("key2"));

        channel_set(&ctx, &mut chan, Some("x!y@z"), "-k", "");
        assert_eq!(chan.key, None);
        assert_eq!(chan.modes, None);
    }

    #[test]
    fn limit_trajectory() {
        let isupport = test_isupport();
        let mut chan = test_chan();
        let ctx = ctx(&isupport);

        channel_set(&ctx, &mut chan, None, "+l", "25");
        assert_eq!(chan.limit, 25);
        assert_eq!(chan.modes.as_deref(), Some("+l 25"));

        // -l consumes no argument (class C)
        channel_set(&ctx, &mut chan, None, "-l", "");
        assert_eq!(chan.limit, 0);
        assert_eq!(chan.modes, None);
    }

    #[test]
    fn flag_modes_rendered() {
        let isupport = test_isupport();
        let mut chan = test_chan();
        let ctx = ctx(&isupport);

        // argument-less modes are inserted right after the sign, so they accumulate in reverse
        channel_set(&ctx, &mut chan, None, "+tn", "");
        assert_eq!(chan.modes.as_deref(), Some("+nt"));

        // modes with an argument go at the end
        channel_set(&ctx, &mut chan, None, "+k", "secret");
        assert_eq!(chan.modes.as_deref(), Some("+ntk secret"));

        channel_set(&ctx, &mut chan, None, "+i", "");
        assert_eq!(chan.modes.as_deref(), Some("+intk secret"));

        channel_set(&ctx, &mut chan, None, "-t", "");
        assert_eq!(chan.modes.as_deref(), Some("+ink secret"));
    }

    #[test]
    fn mode_inverse_restores_state() {
        let isupport = test_isupport();
        let mut chan = test_chan();
        let ctx = ctx(&isupport);

        channel_set(&ctx, &mut chan, None, "+tnk-i", "secret");
        let saved_modes = chan.modes.clone();
        channel_set(&ctx, &mut chan, None, "+mi-l", "");
        channel_set(&ctx, &mut chan, None, "-mi+l", "10");
        channel_set(&ctx, &mut chan, None, "-l", "");
        assert_eq!(chan.modes, saved_modes);
    }

    #[test]
    fn alternating_signs() {
        let isupport = test_isupport();
        let mut chan = test_chan();
        let ctx = ctx(&isupport);

        channel_set(&ctx, &mut chan, None, "+t-t+t-t+m", "");
        assert_eq!(chan.modes.as_deref(), Some("+m"));
    }

    #[test]
    fn prefix_modes_applied_to_nicks() {
        let isupport = test_isupport();
        let mut chan = test_chan();
        chan.add_nick(Nick::new("alice".to_owned()), isupport.casemapping);
        chan.add_nick(Nick::new("bob".to_owned()), isupport.casemapping);
        let ctx = ctx(&isupport);

        channel_set(&ctx, &mut chan, None, "+ov", "alice bob");
        assert_eq!(chan.nicks[0].prefixes, "@");
        assert_eq!(chan.nicks[1].prefixes, "+");

        // repeated +o is idempotent
        channel_set(&ctx, &mut chan, None, "+o", "alice");
        assert_eq!(chan.nicks[0].prefixes, "@");

        channel_set(&ctx, &mut chan, None, "+v-o", "alice alice");
        assert_eq!(chan.nicks[0].prefixes, "+");

        // prefix changes don't touch the rendered channel modes
        assert_eq!(chan.modes, None);
    }

    #[test]
    fn modelist_add_remove() {
        let isupport = test_isupport();
        let mut chan = test_chan();
        let ctx = ctx(&isupport);

        channel_set(&ctx, &mut chan, Some("op!o@h"), "+b", "*!*@spam.example");
        let list = chan.modelist('b').unwrap();
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.items[0].mask, "*!*@spam.example");
        assert_eq!(list.items[0].setter.as_deref(), Some("op!o@h"));

        // modelist modes never touch the rendered modes
        assert_eq!(chan.modes, None);

        channel_set(&ctx, &mut chan, Some("op!o@h"), "-b", "*!*@spam.example");
        assert!(chan.modelist('b').unwrap().items.is_empty());
    }

    #[test]
    fn mixed_mode_string() {
        let isupport = test_isupport();
        let mut chan = test_chan();
        chan.add_nick(Nick::new("alice".to_owned()), isupport.casemapping);
        chan.add_nick(Nick::new("bob".to_owned()), isupport.casemapping);
        let ctx = ctx(&isupport);

        channel_set(&ctx, &mut chan, None, "+ovk-l", "alice bob secret");
        assert_eq!(chan.nicks[0].prefixes, "@");
        assert_eq!(chan.nicks[1].prefixes, "+");
        assert_eq!(chan.key.as_deref(), Some("secret"));
        assert_eq!(chan.limit, 0);
        assert_eq!(chan.modes.as_deref(), Some("+k secret"));
    }

    #[test]
    fn smart_filter_decision() {
        let isupport = test_isupport();
        let mut chan = test_chan();
        chan.add_nick(Nick::new("alice".to_owned()), isupport.casemapping);
        chan.add_nick(Nick::new("wren".to_owned()), isupport.casemapping);
        let ctx = ctx(&isupport);

        // prefix mode on a quiet nick: suppressed
        assert!(channel_set(&ctx, &mut chan, None, "+o", "alice"));

        // mode sent to us: not suppressed
        assert!(!channel_set(&ctx, &mut chan, None, "+o", "wren"));

        // a recently speaking nick: not suppressed
        chan.speaking.record("alice", false);
        assert!(!channel_set(&ctx, &mut chan, None, "+v", "alice"));

        // a letter outside the filter set unsuppresses the whole frame
        chan.speaking.clear();
        assert!(!channel_set(&ctx, &mut chan, None, "+ot", "alice"));
    }

    #[test]
    fn user_modes() {
        let mut nick_modes = String::new();
        user_set(&mut nick_modes, "+iw", false);
        assert_eq!(nick_modes, "iw");
        user_set(&mut nick_modes, "+i", false);
        assert_eq!(nick_modes, "iw");
        user_set(&mut nick_modes, "-i+x", false);
        assert_eq!(nick_modes, "wx");
        user_set(&mut nick_modes, "+r", true);
        assert_eq!(nick_modes, "r");
    }
}
