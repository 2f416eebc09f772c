//! Message levels: what kind of traffic a displayed line is.
//!
//! A single flag classifies one message; unions are used by ignore rules
//! to name several kinds at once.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Levels: u32 {
        const PUBLIC  = 1 << 0;
        const MSG     = 1 << 1;
        const NOTICE  = 1 << 2;
        const ACTION  = 1 << 3;
        const CTCP    = 1 << 4;
        const INVITE  = 1 << 5;
        const JOIN    = 1 << 6;
        const PART    = 1 << 7;
        const KICK    = 1 << 8;
        const QUIT    = 1 << 9;
        const NICK    = 1 << 10;
        const MODE    = 1 << 11;
        const TOPIC   = 1 << 12;
        const WALLOP  = 1 << 13;
        const SNOTE   = 1 << 14;
        const CRAP    = 1 << 15;
        const OTHER   = 1 << 16;
    }
}

const NAMES: &[(&str, Levels)] = &[
    ("PUBLIC", Levels::PUBLIC),
    ("MSG", Levels::MSG),
    ("NOTICE", Levels::NOTICE),
    ("ACTION", Levels::ACTION),
    ("CTCP", Levels::CTCP),
    ("INVITE", Levels::INVITE),
    ("JOIN", Levels::JOIN),
    ("PART", Levels::PART),
    ("KICK", Levels::KICK),
    ("QUIT", Levels::QUIT),
    ("NICK", Levels::NICK),
    ("MODE", Levels::MODE),
    ("TOPIC", Levels::TOPIC),
    ("WALLOP", Levels::WALLOP),
    ("SNOTE", Levels::SNOTE),
    ("CRAP", Levels::CRAP),
    ("OTHER", Levels::OTHER),
];

impl Levels {
    /// Parse a comma-separated level list; `ALL` selects everything.
    /// Unknown names are ignored.
    pub fn parse_list(s: &str) -> Levels {
        let mut out = Levels::empty();
        for word in s.split([',', ' ']).filter(|w| !w.is_empty()) {
            let word = word.to_ascii_uppercase();
            if word == "ALL" {
                return Levels::all();
            }
            if let Some((_, l)) = NAMES.iter().find(|(n, _)| *n == word) {
                out |= *l;
            }
        }
        out
    }

    /// Upper-case names of the set flags, comma-joined.
    pub fn names(self) -> String {
        if self == Levels::all() {
            return "ALL".to_string();
        }
        NAMES
            .iter()
            .filter(|(_, l)| self.contains(*l))
            .map(|(n, _)| *n)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Serialize for Levels {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.names())
    }
}

impl<'de> Deserialize<'de> for Levels {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Ok(Levels::parse_list(&s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_name() {
        let l = Levels::parse_list("public, msg,bogus");
        assert_eq!(l, Levels::PUBLIC | Levels::MSG);
        assert_eq!(l.names(), "PUBLIC,MSG");
        assert_eq!(Levels::parse_list("all"), Levels::all());
        assert_eq!(Levels::all().names(), "ALL");
    }
}
