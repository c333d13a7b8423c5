//! The upgrade snapshot: engine state written out as an ordered sequence of typed records, read
//! back after an in-place upgrade. Forward compatibility comes from skipping records whose type
//! the reader does not know.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub name: String,
    pub status: String,
    pub current_nick: Option<String>,
    #[serde(default)]
    pub nick_modes: String,
    pub addresses: Vec<String>,
    #[serde(default)]
    pub capabilities_enabled: Vec<String>,
    pub casemapping: String,
    pub chantypes: String,
    pub chanmodes: [String; 4],
    pub prefix_modes: String,
    pub prefix_chars: String,
    /// Wire lines still queued when the snapshot was taken.
    #[serde(default)]
    pub out_queue: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NickRecord {
    pub name: String,
    #[serde(default)]
    pub prefixes: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub realname: Option<String>,
    #[serde(default)]
    pub away: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelistItemRecord {
    pub mask: String,
    #[serde(default)]
    pub setter: Option<String>,
    #[serde(default)]
    pub time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelistRecord {
    pub letter: char,
    #[serde(default)]
    pub items: Vec<ModelistItemRecord>,
}

/// A channel record follows its server's record in the sequence; `server` ties them together
/// should a reader want to regroup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub server: String,
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub topic_setter: Option<String>,
    #[serde(default)]
    pub topic_time: Option<u64>,
    #[serde(default)]
    pub modes: Option<String>,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub nicks: Vec<NickRecord>,
    #[serde(default)]
    pub modelists: Vec<ModelistRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Server(ServerRecord),
    Channel(ChannelRecord),
}

pub fn write_records(records: &[Record]) -> Result<String, serde_yaml::Error> {
    let mut seq: Vec<serde_yaml::Value> = Vec::with_capacity(records.len());
    for record in records {
        let (tag, mut value) = match record {
            Record::Server(server) => ("server", serde_yaml::to_value(server)?),
            Record::Channel(chan) => ("channel", serde_yaml::to_value(chan)?),
        };
        if let serde_yaml::Value::Mapping(map) = &mut value {
            map.insert(
                serde_yaml::Value::String("record".to_owned()),
                serde_yaml::Value::String(tag.to_owned()),
            );
        }
        seq.push(value);
    }
    serde_yaml::to_string(&seq)
}

pub fn read_records(text: &str) -> Result<Vec<Record>, serde_yaml::Error> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let seq: Vec<serde_yaml::Value> = serde_yaml::from_str(text)?;
    let mut records = Vec::with_capacity(seq.len());
    for value in seq {
        let tag = value
            .get("record")
            .and_then(|tag| tag.as_str())
            .map(str::to_owned);
        match tag.as_deref() {
            Some("server") => records.push(Record::Server(serde_yaml::from_value(value)?)),
            Some("channel") => records.push(Record::Channel(serde_yaml::from_value(value)?)),
            // Unknown record types are ignored
            _ => {}
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_record() -> ServerRecord {
        ServerRecord {
            name: "example".to_owned(),
            status: "registered".to_owned(),
            current_nick: Some("wren".to_owned()),
            nick_modes: "iw".to_owned(),
            addresses: vec!["irc.example.org/6697".to_owned()],
            capabilities_enabled: vec!["sasl".to_owned(), "server-time".to_owned()],
            casemapping: "rfc1459".to_owned(),
            chantypes: "#".to_owned(),
            chanmodes: [
                "eIbq".to_owned(),
                "k".to_owned(),
                "flj".to_owned(),
                "imnpst".to_owned(),
            ],
            prefix_modes: "ov".to_owned(),
            prefix_chars: "@+".to_owned(),
            out_queue: vec!["PRIVMSG #a :queued".to_owned()],
        }
    }

    fn channel_record() -> ChannelRecord {
        ChannelRecord {
            server: "example".to_owned(),
            name: "#wren".to_owned(),
            kind: "channel".to_owned(),
            topic: Some("welcome".to_owned()),
            topic_setter: Some("alice".to_owned()),
            topic_time: Some(1000),
            modes: Some("+nt".to_owned()),
            limit: 0,
            key: None,
            nicks: vec![NickRecord {
                name: "alice".to_owned(),
                prefixes: "@".to_owned(),
                host: None,
                account: None,
                realname: None,
                away: false,
            }],
            modelists: vec![ModelistRecord {
                letter: 'b',
                items: vec![ModelistItemRecord {
                    mask: "*!*@spam.example".to_owned(),
                    setter: Some("alice!a@h".to_owned()),
                    time: 999,
                }],
            }],
        }
    }

    #[test]
    fn round_trip() {
        let records = vec![
            Record::Server(server_record()),
            Record::Channel(channel_record()),
        ];
        let text = write_records(&records).unwrap();
        let read = read_records(&text).unwrap();
        assert_eq!(read, records);
    }

    #[test]
    fn unknown_records_skipped() {
        let records = vec![Record::Server(server_record())];
        let mut text = write_records(&records).unwrap();
        text.push_str("- record: flux_capacitor\n  charge: 88\n");
        let read = read_records(&text).unwrap();
        assert_eq!(read, records);
    }

    #[test]
    fn empty_snapshot() {
        assert_eq!(read_records("").unwrap(), Vec::new());
        assert_eq!(read_records("  \n").unwrap(), Vec::new());
    }
}
