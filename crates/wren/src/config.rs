use libwren_client::{
    BufferSpec, CtcpConfig, PrivateFallback, Proxy, ProxyType, Router, SASLAuth, SaslFail,
    ServerAddr, ServerInfo, TlsVerify,
};
use libwren_common::Chan;

use serde::{Deserialize, Deserializer};

use std::collections::HashMap;
use std::fs;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum SASLMechanism {
    Plain,
    External,
    ScramSha256,
}

#[derive(Clone, Deserialize)]
#[serde(bound(deserialize = "P: Deserialize<'de>"))]
pub(crate) struct SASLConfig<P> {
    #[serde(default = "default_sasl_mechanism")]
    pub(crate) mechanism: SASLMechanism,

    #[serde(default)]
    pub(crate) username: Option<String>,

    #[serde(default)]
    pub(crate) password: Option<P>,

    /// Path to a PEM file with private key and certificate (PKCS8 format), for EXTERNAL.
    #[serde(default)]
    pub(crate) pem: Option<PathBuf>,
}

fn default_sasl_mechanism() -> SASLMechanism {
    SASLMechanism::Plain
}

#[derive(Clone, Deserialize)]
pub(crate) struct ProxyConfig {
    #[serde(rename = "type")]
    pub(crate) proxy_type: String,
    pub(crate) addr: String,
    pub(crate) port: u16,
    #[serde(default)]
    pub(crate) ipv6: bool,
    #[serde(default)]
    pub(crate) username: Option<String>,
    #[serde(default)]
    pub(crate) password: Option<String>,
}

#[derive(Clone, Deserialize)]
#[serde(bound(deserialize = "P: Deserialize<'de>"))]
pub(crate) struct Server<P> {
    /// Server name shown to the user. Defaults to the address.
    #[serde(default)]
    pub(crate) name: Option<String>,

    /// Address of the server. Further `host/port` entries may be listed in `addrs`.
    pub(crate) addr: String,

    /// Port of the server
    pub(crate) port: u16,

    /// Extra addresses to try when the first one fails, as `host/port`.
    #[serde(default)]
    pub(crate) addrs: Vec<String>,

    /// Use TLS
    #[serde(default)]
    pub(crate) tls: bool,

    /// Verify the server certificate against the system trust store.
    #[serde(default = "default_true")]
    pub(crate) tls_verify: bool,

    /// Comma-separated SHA-1/SHA-256/SHA-512 hex fingerprints; any match accepts the certificate.
    #[serde(default)]
    pub(crate) tls_fingerprint: Option<String>,

    #[serde(default)]
    pub(crate) ipv6: bool,

    #[serde(default)]
    pub(crate) proxy: Option<ProxyConfig>,

    /// Server password (optional)
    #[serde(default)]
    pub(crate) pass: Option<P>,

    /// User name to be used in connection registration.
    /// If it is not specified, the first nick will be used instead.
    #[serde(default)]
    pub(crate) user: Option<String>,

    /// Real name to be used in connection registration
    #[serde(deserialize_with = "deser_trimmed_str")]
    pub(crate) realname: String,

    /// Nicks to try when connecting to this server. wren tries these sequentially, and starts
    /// adding trailing underscores to the last one if none of the nicks are available.
    #[serde(deserialize_with = "deser_trimmed_str_vec")]
    pub(crate) nicks: Vec<String>,

    /// Channels to automatically join. A channel may carry a key: `"#chan key"`.
    #[serde(default)]
    pub(crate) join: Vec<String>,

    /// Capabilities to request when the server offers them.
    #[serde(default = "default_capabilities")]
    pub(crate) capabilities: Vec<String>,

    /// NickServ identification password. Used on connecting to the server and nick change.
    #[serde(default)]
    pub(crate) nickserv_ident: Option<P>,

    /// Authentication method
    #[serde(rename = "sasl")]
    #[serde(default)]
    pub(crate) sasl_auth: Option<SASLConfig<P>>,

    /// What to do when SASL fails: continue, reconnect, disconnect.
    #[serde(default)]
    pub(crate) sasl_fail: Option<String>,

    #[serde(default)]
    pub(crate) local_hostname: Option<String>,

    /// Raw IRC lines to send after registration.
    #[serde(default)]
    pub(crate) command: Vec<String>,

    #[serde(default = "default_true")]
    pub(crate) autoconnect: bool,

    #[serde(default)]
    pub(crate) autorejoin: bool,

    #[serde(default = "default_true")]
    pub(crate) autoreconnect: bool,

    #[serde(default = "default_reconnect_delay")]
    pub(crate) autoreconnect_delay: u64,

    #[serde(default = "default_anti_flood_high")]
    pub(crate) anti_flood_prio_high: u64,

    #[serde(default = "default_anti_flood_low")]
    pub(crate) anti_flood_prio_low: u64,

    #[serde(default = "default_connection_timeout")]
    pub(crate) connection_timeout: u64,

    #[serde(default = "default_sasl_timeout")]
    pub(crate) sasl_timeout: u64,

    #[serde(default = "default_lag_check")]
    pub(crate) lag_check: u64,

    #[serde(default = "default_lag_reconnect")]
    pub(crate) lag_reconnect: u64,
}

fn default_true() -> bool {
    true
}

fn default_capabilities() -> Vec<String> {
    vec!["server-time".to_owned(), "away-notify".to_owned()]
}

fn default_reconnect_delay() -> u64 {
    10
}

fn default_anti_flood_high() -> u64 {
    500
}

fn default_anti_flood_low() -> u64 {
    2000
}

fn default_connection_timeout() -> u64 {
    60
}

fn default_sasl_timeout() -> u64 {
    15
}

fn default_lag_check() -> u64 {
    60
}

fn default_lag_reconnect() -> u64 {
    300
}

/// Similar to `Server`, but used when connecting via the `/connect` command.
#[derive(Clone, Deserialize)]
pub(crate) struct Defaults {
    #[serde(deserialize_with = "deser_trimmed_str_vec")]
    pub(crate) nicks: Vec<String>,
    #[serde(deserialize_with = "deser_trimmed_str")]
    pub(crate) realname: String,
    #[serde(default)]
    pub(crate) join: Vec<String>,
    #[serde(default)]
    pub(crate) tls: bool,
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "P: Deserialize<'de>"))]
pub(crate) struct Config<P> {
    pub(crate) servers: Vec<Server<P>>,
    pub(crate) defaults: Defaults,
    pub(crate) log_dir: Option<PathBuf>,

    /// Smart filtering of join/part/mode lines for users that have not spoken recently.
    #[serde(default)]
    pub(crate) smart_filter: bool,
    #[serde(default = "default_smart_filter_modes")]
    pub(crate) smart_filter_modes: String,
    #[serde(default = "default_smart_filter_delay")]
    pub(crate) smart_filter_delay: u64,

    /// CTCP reply templates keyed by lowercase type (optionally `server.type`). An empty value
    /// blocks the CTCP.
    #[serde(default)]
    pub(crate) ctcp: HashMap<String, String>,

    /// Per-message display targets: message name (or `server.message`) to one of
    /// weechat/server/current/private.
    #[serde(default)]
    pub(crate) msgbuffer: HashMap<String, String>,
}

fn default_smart_filter_modes() -> String {
    "+".to_owned()
}

fn default_smart_filter_delay() -> u64 {
    300
}

fn deser_trimmed_str<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let str = String::deserialize(d)?;
    Ok(str.trim().to_owned())
}

fn deser_trimmed_str_vec<'de, D>(d: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let strs: Vec<String> = Vec::deserialize(d)?;
    Ok(strs.into_iter().map(|s| s.trim().to_owned()).collect())
}

/// A password, or a shell command to run to obtain the password. Used for password (server
/// password, SASL, NickServ) fields of `Config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PassOrCmd {
    /// Password is given directly as plain text
    Pass(String),

    /// A shell command to run to get the password
    Cmd(Vec<String>),
}

impl PassOrCmd {
    fn is_empty_cmd(&self) -> bool {
        match self {
            PassOrCmd::Cmd(cmd) => cmd.is_empty(),
            PassOrCmd::Pass(_) => false,
        }
    }
}

impl<'de> Deserialize<'de> for PassOrCmd {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;
        use serde_yaml::Value;

        match Value::deserialize(deserializer)? {
            Value::String(str) => Ok(PassOrCmd::Pass(str)),
            Value::Mapping(map) => match map.get("command") {
                Some(Value::String(cmd)) => match shell_words::split(cmd) {
                    Ok(cmd_parts) => Ok(PassOrCmd::Cmd(cmd_parts)),
                    Err(err) => Err(D::Error::custom(format!(
                        "Unable to parse password field: {err}"
                    ))),
                },
                _ => Err(D::Error::custom(
                    "Expected a 'command' key in password map with string value",
                )),
            },
            _ => Err(D::Error::custom("Password field must be a string or map")),
        }
    }
}

fn run_command(command_name: &str, server_addr: &str, args: &[String]) -> Option<String> {
    println!(
        "Running {} command for {} (`{}`)",
        command_name,
        server_addr,
        shell_words::join(args)
    );

    assert!(!args.is_empty()); // should be checked in `validate`

    let mut cmd = Command::new(&args[0]);
    cmd.args(args[1..].iter());

    let output = match cmd.output() {
        Err(err) => {
            println!("Command failed: {err:?}");
            return None;
        }
        Ok(output) => output,
    };

    if !output.status.success() {
        print!("Command returned non-zero");
        if let Some(code) = output.status.code() {
            println!(": {code}");
        } else {
            println!();
        }
        return None;
    }

    if output.stdout.is_empty() {
        println!("Command returned zero, but stdout is empty. Aborting.");
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    stdout.lines().last().map(str::to_owned)
}

impl Config<PassOrCmd> {
    /// Returns error descriptions.
    pub(crate) fn validate(&self) -> Vec<String> {
        let mut errors = vec![];

        if self.defaults.nicks.is_empty() {
            errors.push(
                "Default nick list can't be empty, please add at least one default nick".to_owned(),
            );
        }

        if self.defaults.realname.is_empty() {
            errors.push(
                "realname can't be empty, please update 'realname' field of 'defaults'".to_owned(),
            );
        }

        for (nick_idx, nick) in self.defaults.nicks.iter().enumerate() {
            if nick.is_empty() {
                errors.push(format!("Default nick {nick_idx} is empty"));
            }
        }

        for server in &self.servers {
            if server.nicks.is_empty() {
                errors.push(format!(
                    "Nick list for server '{}' is empty, please add at least one nick",
                    server.addr
                ));
            }

            for (nick_idx, nick) in server.nicks.iter().enumerate() {
                if nick.is_empty() {
                    errors.push(format!(
                        "Nicks can't be empty, please update nick {} for '{}'",
                        nick_idx, server.addr
                    ));
                }
            }

            if server.realname.is_empty() {
                errors.push(format!(
                    "'realname' can't be empty, please update 'realname' field of '{}'",
                    server.addr
                ));
            }

            if let Some(ref pass) = server.pass {
                if pass.is_empty_cmd() {
                    errors.push(format!("Empty PASS command for '{}'", server.addr));
                }
            }

            if let Some(ref nickserv_ident) = server.nickserv_ident {
                if nickserv_ident.is_empty_cmd() {
                    errors.push(format!(
                        "Empty NickServ password command for '{}'",
                        server.addr
                    ));
                }
            }

            if let Some(ref sasl) = server.sasl_auth {
                match sasl.mechanism {
                    SASLMechanism::Plain | SASLMechanism::ScramSha256 => {
                        if sasl.username.is_none() || sasl.password.is_none() {
                            errors.push(format!(
                                "SASL {} needs username and password for '{}'",
                                if sasl.mechanism == SASLMechanism::Plain {
                                    "PLAIN"
                                } else {
                                    "SCRAM-SHA-256"
                                },
                                server.addr
                            ));
                        }
                        if let Some(password) = &sasl.password {
                            if password.is_empty_cmd() {
                                errors.push(format!(
                                    "Empty SASL password command for '{}'",
                                    server.addr
                                ));
                            }
                        }
                    }
                    SASLMechanism::External => {
                        if sasl.pem.is_none() {
                            errors.push(format!(
                                "SASL EXTERNAL needs a 'pem' file for '{}'",
                                server.addr
                            ));
                        }
                        if !server.tls {
                            errors.push(format!(
                                "TLS is not enabled for '{}', but SASL EXTERNAL authentication \
                                 requires TLS. Please enable TLS for this server in the config \
                                 file.",
                                server.addr
                            ));
                        }
                    }
                }
            }

            if let Some(proxy) = &server.proxy {
                if !matches!(proxy.proxy_type.as_str(), "http" | "socks4" | "socks5") {
                    errors.push(format!(
                        "Unknown proxy type '{}' for '{}' (expected http, socks4 or socks5)",
                        proxy.proxy_type, server.addr
                    ));
                }
            }

            if let Some(sasl_fail) = &server.sasl_fail {
                if !matches!(sasl_fail.as_str(), "continue" | "reconnect" | "disconnect") {
                    errors.push(format!(
                        "Unknown sasl_fail value '{}' for '{}'",
                        sasl_fail, server.addr
                    ));
                }
            }
        }

        for value in self.msgbuffer.values() {
            if !matches!(
                value.as_str(),
                "core" | "weechat" | "server" | "current" | "private"
            ) {
                errors.push(format!("Unknown msgbuffer target '{}'", value));
            }
        }

        errors
    }

    /// Runs password commands and updates the config with plain passwords obtained from the
    /// commands.
    pub(crate) fn read_passwords(self) -> Option<Config<String>> {
        let Config {
            servers,
            defaults,
            log_dir,
            smart_filter,
            smart_filter_modes,
            smart_filter_delay,
            ctcp,
            msgbuffer,
        } = self;

        let mut servers_: Vec<Server<String>> = Vec::with_capacity(servers.len());

        for server in servers {
            let addr = server.addr.clone();

            let pass = match server.pass {
                None => None,
                Some(PassOrCmd::Pass(pass)) => Some(pass),
                Some(PassOrCmd::Cmd(cmd)) => Some(run_command("server password", &addr, &cmd)?),
            };

            let nickserv_ident = match server.nickserv_ident {
                None => None,
                Some(PassOrCmd::Pass(pass)) => Some(pass),
                Some(PassOrCmd::Cmd(cmd)) => Some(run_command("NickServ password", &addr, &cmd)?),
            };

            let sasl_auth = match server.sasl_auth {
                None => None,
                Some(sasl) => {
                    let password = match sasl.password {
                        None => None,
                        Some(PassOrCmd::Pass(pass)) => Some(pass),
                        Some(PassOrCmd::Cmd(cmd)) => {
                            Some(run_command("SASL password", &addr, &cmd)?)
                        }
                    };
                    Some(SASLConfig {
                        mechanism: sasl.mechanism,
                        username: sasl.username,
                        password,
                        pem: sasl.pem,
                    })
                }
            };

            servers_.push(Server {
                name: server.name,
                addr: server.addr,
                port: server.port,
                addrs: server.addrs,
                tls: server.tls,
                tls_verify: server.tls_verify,
                tls_fingerprint: server.tls_fingerprint,
                ipv6: server.ipv6,
                proxy: server.proxy,
                pass,
                user: server.user,
                realname: server.realname,
                nicks: server.nicks,
                join: server.join,
                capabilities: server.capabilities,
                nickserv_ident,
                sasl_auth,
                sasl_fail: server.sasl_fail,
                local_hostname: server.local_hostname,
                command: server.command,
                autoconnect: server.autoconnect,
                autorejoin: server.autorejoin,
                autoreconnect: server.autoreconnect,
                autoreconnect_delay: server.autoreconnect_delay,
                anti_flood_prio_high: server.anti_flood_prio_high,
                anti_flood_prio_low: server.anti_flood_prio_low,
                connection_timeout: server.connection_timeout,
                sasl_timeout: server.sasl_timeout,
                lag_check: server.lag_check,
                lag_reconnect: server.lag_reconnect,
            });
        }

        Some(Config {
            servers: servers_,
            defaults,
            log_dir,
            smart_filter,
            smart_filter_modes,
            smart_filter_delay,
            ctcp,
            msgbuffer,
        })
    }
}

impl Config<String> {
    /// Builds the engine-facing `ServerInfo` values.
    pub(crate) fn server_infos(&self) -> Vec<ServerInfo> {
        self.servers
            .iter()
            .map(|server| self.server_info(server))
            .collect()
    }

    pub(crate) fn router(&self) -> Router {
        let mut router = Router::default();
        for (message, target) in &self.msgbuffer {
            let spec = match target.as_str() {
                // "weechat" is the historical spelling of "core"
                "core" | "weechat" => BufferSpec::Core,
                "current" => BufferSpec::Current,
                "private" => BufferSpec::Private,
                _ => BufferSpec::Server,
            };
            router.targets.insert(message.clone(), spec);
        }
        router.private_fallback = PrivateFallback::Server;
        router
    }

    pub(crate) fn ctcp_config(&self) -> CtcpConfig {
        let mut ctcp = CtcpConfig::default();
        for (name, reply) in &self.ctcp {
            ctcp.replies.insert(name.to_lowercase(), reply.clone());
        }
        ctcp
    }

    fn server_info(&self, server: &Server<String>) -> ServerInfo {
        let mut addrs = vec![ServerAddr {
            host: server.addr.clone(),
            port: server.port,
        }];
        for addr in &server.addrs {
            match addr.split_once('/') {
                Some((host, port)) => {
                    if let Ok(port) = port.parse() {
                        addrs.push(ServerAddr {
                            host: host.to_owned(),
                            port,
                        });
                    }
                }
                None => addrs.push(ServerAddr {
                    host: addr.clone(),
                    port: server.port,
                }),
            }
        }

        // entries may carry a key: "#chan key"
        let auto_join = server.join.iter().map(|entry| Chan::from_entry(entry)).collect();

        let sasl_auth = server.sasl_auth.as_ref().and_then(|sasl| match sasl.mechanism {
            SASLMechanism::Plain => Some(SASLAuth::Plain {
                username: sasl.username.clone()?,
                password: sasl.password.clone()?,
            }),
            SASLMechanism::ScramSha256 => Some(SASLAuth::ScramSha256 {
                username: sasl.username.clone()?,
                password: sasl.password.clone()?,
            }),
            SASLMechanism::External => {
                let pem = sasl.pem.as_ref()?;
                match read_pem(pem) {
                    Ok(auth) => Some(auth),
                    Err(err) => {
                        println!("Could not read PEM file {pem:?}: {err}");
                        None
                    }
                }
            }
        });

        let tls_verify = match (&server.tls_fingerprint, server.tls_verify) {
            (Some(fingerprint), _) => TlsVerify::Fingerprint(fingerprint.clone()),
            (None, true) => TlsVerify::NativeRoots,
            (None, false) => TlsVerify::None,
        };

        let proxy = server.proxy.as_ref().map(|proxy| Proxy {
            proxy_type: match proxy.proxy_type.as_str() {
                "http" => ProxyType::Http,
                "socks4" => ProxyType::Socks4,
                _ => ProxyType::Socks5,
            },
            host: proxy.addr.clone(),
            port: proxy.port,
            ipv6: proxy.ipv6,
            username: proxy.username.clone(),
            password: proxy.password.clone(),
        });

        ServerInfo {
            name: server.name.clone().unwrap_or_else(|| server.addr.clone()),
            addrs,
            proxy,
            ipv6: server.ipv6,
            tls: server.tls,
            tls_verify,
            pass: server.pass.clone(),
            capabilities: server.capabilities.clone(),
            sasl_auth,
            sasl_fail: match server.sasl_fail.as_deref() {
                Some("continue") => SaslFail::Continue,
                Some("disconnect") => SaslFail::Disconnect,
                _ => SaslFail::Reconnect,
            },
            nicks: server.nicks.clone(),
            username: server
                .user
                .clone()
                .or_else(|| server.nicks.first().cloned())
                .unwrap_or_default(),
            realname: server.realname.clone(),
            local_hostname: server.local_hostname.clone(),
            command_on_connect: server.command.clone(),
            auto_join,
            autorejoin: server.autorejoin,
            autoconnect: server.autoconnect,
            autoreconnect: server.autoreconnect,
            autoreconnect_delay_secs: server.autoreconnect_delay,
            anti_flood_prio_high_ms: server.anti_flood_prio_high,
            anti_flood_prio_low_ms: server.anti_flood_prio_low,
            connection_timeout_secs: server.connection_timeout,
            sasl_timeout_secs: server.sasl_timeout,
            lag_check_secs: server.lag_check,
            lag_reconnect_secs: server.lag_reconnect,
            nickserv_ident: server.nickserv_ident.clone(),
            registered_mode: Some('r'),
            smart_filter: self.smart_filter,
            smart_filter_modes: self.smart_filter_modes.clone(),
            smart_filter_delay_secs: self.smart_filter_delay,
            ctcp: self.ctcp_config(),
            router: self.router(),
        }
    }
}

fn read_pem(path: &Path) -> Result<SASLAuth, String> {
    let pem = fs::read(path).map_err(|err| err.to_string())?;
    SASLAuth::external_from_pem(&pem)
}

/// Returns the wren config file path. The file may or may not exist.
///
/// Places to look: (in priority order)
///
/// - $XDG_CONFIG_HOME/wren/config.yml
/// - $HOME/.config/wren/config.yml
///
/// Panics when none of $XDG_CONFIG_HOME or $HOME can be found (using the `dirs` crate).
pub(crate) fn get_config_path() -> PathBuf {
    match dirs::config_dir() {
        None => panic!(
            "Can't read $HOME or $XDG_CONFIG_HOME environment variables,
            please consider setting at least one of these variables"
        ),
        Some(mut config_path) => {
            config_path.push("wren");
            let _ = fs::create_dir_all(&config_path);
            config_path.push("config.yml");
            config_path
        }
    }
}

fn expand_path(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match shellexpand::full(&s) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(err) => {
            println!("Failed to expand path {path:?}: {err}");
            path.to_owned()
        }
    }
}

pub(crate) fn parse_config(config_path: &Path) -> Result<Config<PassOrCmd>, serde_yaml::Error> {
    let contents = {
        let mut str = String::new();
        let mut file = File::open(config_path).unwrap();
        file.read_to_string(&mut str).unwrap();
        str
    };

    let mut config: Config<PassOrCmd> = serde_yaml::from_str(&contents)?;

    if let Some(log_dir) = &mut config.log_dir {
        *log_dir = expand_path(log_dir);
    }
    for server in &mut config.servers {
        if let Some(sasl) = &mut server.sasl_auth {
            if let Some(pem) = &mut sasl.pem {
                *pem = expand_path(pem);
            }
        }
    }

    Ok(config)
}

pub(crate) fn generate_default_config(config_path: &Path) {
    if let Some(parent) = config_path.parent() {
        let _ = ::std::fs::create_dir_all(parent);
    }
    let mut file = File::create(config_path).unwrap();
    file.write_all(get_default_config_yaml().as_bytes())
        .unwrap();
    println!(
        "\
wren couldn't find a config file at {config_path:?}, and created a config file with defaults.
You may want to edit {config_path:?} before re-running wren."
    );
}

fn get_default_config_yaml() -> String {
    let mut log_dir = dirs::home_dir().unwrap();
    log_dir.push("wren_logs");
    format!(
        include_str!("../config.yml"),
        log_dir.as_path().to_str().unwrap()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_default_config() {
        match serde_yaml::from_str::<Config<String>>(&get_default_config_yaml()) {
            Err(yaml_err) => {
                println!("{yaml_err}");
                panic!();
            }
            Ok(config) => {
                assert_eq!(config.servers[0].join, vec!["#wren".to_owned()]);
                assert!(config.servers[0].tls);
                let infos = config.server_infos();
                assert_eq!(infos[0].nicks, vec!["wren_user".to_owned()]);
                assert!(infos[0].tls);
            }
        }
    }

    #[test]
    fn validation() {
        // We trim the string fields when deserializing, so `validate` doesn't consider non-empty
        // strings as empty even if they have only spaces, it assumes spaces should be trimmed
        let yaml = "\
servers:
  - addr: my_server
    port: 123
    realname: ''
    nicks: ['']
defaults:
  nicks: ['']
  realname: ''
";
        let config: Config<PassOrCmd> = serde_yaml::from_str(yaml).unwrap();
        let errors = config.validate();
        assert_eq!(errors.len(), 4);
        assert_eq!(
            &errors[0],
            "realname can't be empty, please update 'realname' field of 'defaults'"
        );
        assert_eq!(&errors[1], "Default nick 0 is empty");
    }

    #[test]
    fn parse_password_field() {
        let field = "command: my pass cmd";
        assert_eq!(
            serde_yaml::from_str::<PassOrCmd>(field).unwrap(),
            PassOrCmd::Cmd(vec!["my".to_owned(), "pass".to_owned(), "cmd".to_owned()])
        );

        let field = "my password";
        assert_eq!(
            serde_yaml::from_str::<PassOrCmd>(field).unwrap(),
            PassOrCmd::Pass(field.to_string())
        );

        let field = "command: \"pass show 'my password'\"";
        assert_eq!(
            serde_yaml::from_str::<PassOrCmd>(field).unwrap(),
            PassOrCmd::Cmd(vec![
                "pass".to_string(),
                "show".to_string(),
                "my password".to_string()
            ])
        );
    }

    #[test]
    fn sasl_config_mechanisms() {
        let yaml = "\
mechanism: scram-sha-256
username: alice
password: secret
";
        let sasl: SASLConfig<String> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(sasl.mechanism, SASLMechanism::ScramSha256);

        let yaml = "\
username: alice
password: secret
";
        let sasl: SASLConfig<String> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(sasl.mechanism, SASLMechanism::Plain);
    }

    #[test]
    fn proxy_and_fingerprint_mapping() {
        let yaml = "\
servers:
  - addr: irc.example.org
    port: 6697
    tls: true
    tls_fingerprint: 0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef
    realname: test
    nicks: [test]
    proxy:
      type: socks5
      addr: localhost
      port: 1080
defaults:
  nicks: [test]
  realname: test
";
        let config: Config<String> = serde_yaml::from_str(yaml).unwrap();
        let infos = config.server_infos();
        assert!(matches!(infos[0].tls_verify, TlsVerify::Fingerprint(_)));
        let proxy = infos[0].proxy.as_ref().unwrap();
        assert_eq!(proxy.proxy_type, ProxyType::Socks5);
        assert_eq!(proxy.port, 1080);
    }

    #[test]
    fn base64_decoder() {
        assert_eq!(base64_decode("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(base64_decode("").unwrap(), b"");
        assert_eq!(base64_decode("!!!"), None);
    }
}
