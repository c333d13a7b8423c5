//! Casemapping-aware identifier comparison.
//!
//! IRC servers advertise the equivalence relation used for nick and channel names in the
//! `CASEMAPPING` ISUPPORT token. Under the default `rfc1459` mapping the characters `{ | } ~` are
//! the lowercase forms of `[ \ ] ^` (RFC 1459 section 2.2), so "nick[a]" and "nick{a}" name the
//! same user.

use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Casemapping {
    /// A-Z and `[ \ ] ^` fold together with a-z and `{ | } ~`.
    #[default]
    Rfc1459,

    /// Like `Rfc1459` but `~` and `^` stay distinct.
    StrictRfc1459,

    /// Only A-Z fold to a-z.
    Ascii,
}

impl Casemapping {
    /// Parses a `CASEMAPPING` ISUPPORT value. Unknown values fall back to the default mapping,
    /// like they would if the server had sent no `005` at all.
    pub fn parse(value: &str) -> Casemapping {
        if value.eq_ignore_ascii_case("ascii") {
            Casemapping::Ascii
        } else if value.eq_ignore_ascii_case("strict-rfc1459") {
            Casemapping::StrictRfc1459
        } else {
            Casemapping::Rfc1459
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Casemapping::Rfc1459 => "rfc1459",
            Casemapping::StrictRfc1459 => "strict-rfc1459",
            Casemapping::Ascii => "ascii",
        }
    }
}

/// Folds a byte to its "uppercase" form under the mapping. Bytes outside the folded ranges
/// (including all non-ASCII bytes) are returned unchanged.
fn fold(b: u8, mapping: Casemapping) -> u8 {
    let upper_bound = match mapping {
        Casemapping::Ascii => b'z',
        Casemapping::StrictRfc1459 => b'}',
        Casemapping::Rfc1459 => b'~',
    };
    if (b'a'..=b'z').contains(&b) || (b > b'z' && b <= upper_bound) {
        b - 32
    } else {
        b
    }
}

fn cmp_bytes(
    mut a: impl Iterator<Item = u8>,
    mut b: impl Iterator<Item = u8>,
    mapping: Casemapping,
) -> Ordering {
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) => match fold(ca, mapping).cmp(&fold(cb, mapping)) {
                Ordering::Equal => {}
                other => return other,
            },
        }
    }
}

/// Case-insensitive comparison under the given mapping. This is a total order: folded bytes are
/// compared left to right, a missing byte sorts before any byte.
pub fn irc_cmp(a: &str, b: &str, mapping: Casemapping) -> Ordering {
    cmp_bytes(a.bytes(), b.bytes(), mapping)
}

/// Like [`irc_cmp`] but compares at most `n` bytes of each string. Truncation is byte-wise like
/// everything else here, so `n` may land inside a multi-byte sequence.
pub fn irc_cmp_n(a: &str, b: &str, n: usize, mapping: Casemapping) -> Ordering {
    cmp_bytes(a.bytes().take(n), b.bytes().take(n), mapping)
}

pub fn irc_eq(a: &str, b: &str, mapping: Casemapping) -> bool {
    irc_cmp(a, b, mapping) == Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use Casemapping::*;

    #[test]
    fn cmp_default_mapping() {
        assert_eq!(irc_cmp("", "", Rfc1459), Ordering::Equal);
        assert_eq!(irc_cmp("abc", "ABC", Rfc1459), Ordering::Equal);
        assert_eq!(irc_cmp("abc", "test", Rfc1459), Ordering::Less);
        assert_eq!(irc_cmp("test", "abc", Rfc1459), Ordering::Greater);
        assert_eq!(irc_cmp("nick[a]", "nick{a}", Rfc1459), Ordering::Equal);
        assert_eq!(irc_cmp("nick^a", "nick~a", Rfc1459), Ordering::Equal);
        assert_eq!(irc_cmp("nick\\x", "nick|x", Rfc1459), Ordering::Equal);
    }

    #[test]
    fn cmp_strict() {
        assert_eq!(irc_cmp("nick[a]", "nick{a}", StrictRfc1459), Ordering::Equal);
        assert_eq!(irc_cmp("nick^a", "nick~a", StrictRfc1459), Ordering::Less);
        assert_eq!(irc_cmp("nick~a", "nick^a", StrictRfc1459), Ordering::Greater);
    }

    #[test]
    fn cmp_ascii() {
        assert_eq!(irc_cmp("Nick", "nick", Ascii), Ordering::Equal);
        assert_eq!(irc_cmp("nick[a]", "nick{a}", Ascii), Ordering::Less);
        assert_eq!(irc_cmp("nick{a}", "nick[a]", Ascii), Ordering::Greater);
        assert_eq!(irc_cmp("nick^a", "nick~a", Ascii), Ordering::Less);
    }

    #[test]
    fn cmp_non_ascii_bytewise() {
        // UTF-8 continuation bytes compare byte-wise under every mapping
        assert_eq!(irc_cmp("nick_ô", "nick_Ô", Rfc1459), Ordering::Greater);
        assert_eq!(irc_cmp("nick_ô", "nick_Ô", Ascii), Ordering::Greater);
    }

    #[test]
    fn cmp_antisymmetric_prefix() {
        assert_eq!(irc_cmp_n("atest", "abc", 1, Rfc1459), Ordering::Equal);
        assert_eq!(irc_cmp_n("abc", "test", 1, Rfc1459), Ordering::Less);
        assert_eq!(irc_cmp_n("nick[a]", "nick{a}", 10, Rfc1459), Ordering::Equal);
        assert_eq!(irc_cmp_n("abc", "ab", 10, Rfc1459), Ordering::Greater);
    }

    #[test]
    fn cmp_n_inside_multibyte_char() {
        // 'ô' is two bytes starting at index 5; a byte-wise cut through it must not panic
        assert_eq!(irc_cmp_n("nick_ô", "nick_ôx", 6, Rfc1459), Ordering::Equal);
        // the cut keeps only the first byte of each 'ô'/'Ô', which are equal
        assert_eq!(irc_cmp_n("nick_ô", "nick_Ô", 6, Rfc1459), Ordering::Equal);
        assert_eq!(irc_cmp_n("nick_ô", "nick_Ô", 7, Rfc1459), Ordering::Greater);
    }

    #[test]
    fn parse_value() {
        assert_eq!(Casemapping::parse("ascii"), Ascii);
        assert_eq!(Casemapping::parse("ASCII"), Ascii);
        assert_eq!(Casemapping::parse("strict-rfc1459"), StrictRfc1459);
        assert_eq!(Casemapping::parse("rfc1459"), Rfc1459);
        assert_eq!(Casemapping::parse("unicode?"), Rfc1459);
    }
}
