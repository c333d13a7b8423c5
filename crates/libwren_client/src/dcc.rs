//! DCC rendezvous parsing.
//!
//! DCC offers arrive as CTCP `DCC` requests. The engine only parses them and hands the result to
//! the external transfer subsystem through signals; it never opens the data connection itself.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::num::ParseIntError;

/// A parsed DCC offer.
///
/// The following sub-commands are understood:
///
/// ```text
/// DCC SEND <filename|"quoted filename"> <ip> <port> <size> [<token>]
/// DCC RESUME <filename> <port> <start_offset> [<token>]
/// DCC ACCEPT <filename> <port> <start_offset> [<token>]
/// DCC CHAT chat <ip> <port>
/// ```
///
/// `<ip>` is the address as a decimal integer for IPv4, or a literal address. A port of 0 with a
/// token is a passive (reverse) offer.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum DccOffer {
    Send {
        filename: String,
        address: IpAddr,
        port: u16,
        size: u64,
        token: Option<String>,
    },
    Resume {
        filename: String,
        port: u16,
        start_offset: u64,
        token: Option<String>,
    },
    Accept {
        filename: String,
        port: u16,
        start_offset: u64,
        token: Option<String>,
    },
    Chat {
        address: IpAddr,
        port: u16,
    },
}

impl DccOffer {
    pub fn type_str(&self) -> &'static str {
        match self {
            DccOffer::Send { .. } => "SEND",
            DccOffer::Resume { .. } => "RESUME",
            DccOffer::Accept { .. } => "ACCEPT",
            DccOffer::Chat { .. } => "CHAT",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum DccParseError {
    UnknownSubCommand(String),
    MissingArgument,
    BadNumber,
}

impl std::error::Error for DccParseError {}

impl fmt::Display for DccParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DccParseError::UnknownSubCommand(cmd) => {
                write!(f, "unknown DCC sub-command: {:?}", cmd)
            }
            DccParseError::MissingArgument => write!(f, "missing DCC argument"),
            DccParseError::BadNumber => write!(f, "cannot parse DCC number"),
        }
    }
}

impl From<ParseIntError> for DccParseError {
    fn from(_: ParseIntError) -> Self {
        DccParseError::BadNumber
    }
}

/// Splits the filename off the front of DCC arguments. A filename may be wrapped in double
/// quotes; the terminating quote is searched from the right, and the quotes are removed before
/// handoff.
fn split_filename(args: &str) -> Result<(String, &str), DccParseError> {
    let args = args.trim_start_matches(' ');
    if let Some(rest) = args.strip_prefix('"') {
        match rest.rfind('"') {
            None | Some(0) => Err(DccParseError::MissingArgument),
            Some(idx) => Ok((rest[..idx].to_owned(), &rest[idx + 1..])),
        }
    } else {
        match args.find(' ') {
            None => Err(DccParseError::MissingArgument),
            Some(idx) => Ok((args[..idx].to_owned(), &args[idx..])),
        }
    }
}

/// Parses `<ip>`: a decimal integer is an IPv4 address in network byte order, anything else must
/// be a literal IP address.
fn parse_address(word: &str) -> Result<IpAddr, DccParseError> {
    if let Ok(n) = word.parse::<u32>() {
        return Ok(IpAddr::V4(Ipv4Addr::from(n)));
    }
    word.parse::<IpAddr>().map_err(|_| DccParseError::BadNumber)
}

/// Parses the arguments of a CTCP `DCC` request (everything after the `DCC` type).
pub fn parse(args: &str) -> Result<DccOffer, DccParseError> {
    let args = args.trim_start_matches(' ');
    let (sub_cmd, rest) = match args.find(' ') {
        None => return Err(DccParseError::UnknownSubCommand(args.to_owned())),
        Some(idx) => (&args[..idx], &args[idx + 1..]),
    };

    if sub_cmd.eq_ignore_ascii_case("SEND") {
        let (filename, rest) = split_filename(rest)?;
        let mut words = rest.split_whitespace();
        let address = parse_address(words.next().ok_or(DccParseError::MissingArgument)?)?;
        let port: u16 = words.next().ok_or(DccParseError::MissingArgument)?.parse()?;
        let size: u64 = words.next().ok_or(DccParseError::MissingArgument)?.parse()?;
        let token = words.next().map(str::to_owned);
        Ok(DccOffer::Send {
            filename,
            address,
            port,
            size,
            token,
        })
    } else if sub_cmd.eq_ignore_ascii_case("RESUME") || sub_cmd.eq_ignore_ascii_case("ACCEPT") {
        let (filename, rest) = split_filename(rest)?;
        let mut words = rest.split_whitespace();
        let port: u16 = words.next().ok_or(DccParseError::MissingArgument)?.parse()?;
        let start_offset: u64 = words.next().ok_or(DccParseError::MissingArgument)?.parse()?;
        let token = words.next().map(str::to_owned);
        if sub_cmd.eq_ignore_ascii_case("RESUME") {
            Ok(DccOffer::Resume {
                filename,
                port,
                start_offset,
                token,
            })
        } else {
            Ok(DccOffer::Accept {
                filename,
                port,
                start_offset,
                token,
            })
        }
    } else if sub_cmd.eq_ignore_ascii_case("CHAT") {
        // DCC CHAT chat <ip> <port>
        let mut words = rest.split_whitespace();
        let proto = words.next().ok_or(DccParseError::MissingArgument)?;
        if !proto.eq_ignore_ascii_case("chat") {
            return Err(DccParseError::UnknownSubCommand(format!("CHAT {}", proto)));
        }
        let address = parse_address(words.next().ok_or(DccParseError::MissingArgument)?)?;
        let port: u16 = words.next().ok_or(DccParseError::MissingArgument)?.parse()?;
        Ok(DccOffer::Chat { address, port })
    } else {
        Err(DccParseError::UnknownSubCommand(sub_cmd.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_with_quoted_filename() {
        let expected = DccOffer::Send {
            filename: "results_for_ python.txt.zip".to_owned(),
            address: IpAddr::V4(Ipv4Addr::new(173, 80, 26, 71)),
            port: 3078,
            size: 24999,
            token: None,
        };
        let r = parse(r#"SEND "results_for_ python.txt.zip" 2907707975 3078 24999"#);
        assert_eq!(r.unwrap(), expected);
    }

    #[test]
    fn send_unquoted() {
        let r = parse("SEND file.bin 2130706433 5000 1024 T42");
        assert_eq!(
            r.unwrap(),
            DccOffer::Send {
                filename: "file.bin".to_owned(),
                address: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
                port: 5000,
                size: 1024,
                token: Some("T42".to_owned()),
            }
        );
    }

    #[test]
    fn passive_send() {
        let r = parse("SEND file.bin 2130706433 0 1024 T99").unwrap();
        match r {
            DccOffer::Send { port, token, .. } => {
                assert_eq!(port, 0);
                assert_eq!(token.as_deref(), Some("T99"));
            }
            other => panic!("unexpected offer: {:?}", other),
        }
    }

    #[test]
    fn resume_and_accept() {
        assert_eq!(
            parse("RESUME file.bin 5000 2048").unwrap(),
            DccOffer::Resume {
                filename: "file.bin".to_owned(),
                port: 5000,
                start_offset: 2048,
                token: None,
            }
        );
        assert_eq!(
            parse(r#"ACCEPT "a b" 5000 2048 tok"#).unwrap(),
            DccOffer::Accept {
                filename: "a b".to_owned(),
                port: 5000,
                start_offset: 2048,
                token: Some("tok".to_owned()),
            }
        );
    }

    #[test]
    fn chat() {
        assert_eq!(
            parse("CHAT chat 2130706433 4321").unwrap(),
            DccOffer::Chat {
                address: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
                port: 4321,
            }
        );
    }

    #[test]
    fn errors_do_not_panic() {
        assert_eq!(
            parse("FROBNICATE x y z"),
            Err(DccParseError::UnknownSubCommand("FROBNICATE".to_owned()))
        );
        assert_eq!(parse("SEND file.bin"), Err(DccParseError::MissingArgument));
        assert_eq!(parse("SEND file.bin notanip 1 2"), Err(DccParseError::BadNumber));
        assert_eq!(parse("CHAT video 2130706433 4321"),
            Err(DccParseError::UnknownSubCommand("CHAT video".to_owned())));
    }

    #[test]
    fn ipv6_literal_address() {
        let r = parse("SEND file.bin ::1 5000 10").unwrap();
        match r {
            DccOffer::Send { address, .. } => assert_eq!(address, "::1".parse::<IpAddr>().unwrap()),
            other => panic!("unexpected offer: {:?}", other),
        }
    }
}
