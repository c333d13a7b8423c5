//! The connection worker: DNS resolution, proxy handshake and TCP connect.
//!
//! All of this is blocking work that must not stall the main task, so it runs on a dedicated
//! blocking thread and reports back over a one-shot pipe. The protocol is a single status code,
//! mirrored in the wire value [`ConnectStatus::as_byte`] for the hook surface:
//!
//! ```text
//! '0'  success
//! '1'  proxy/address not found
//! '2'  IP family mismatch
//! '3'  connection refused / proxy-to-server connect failure
//! '4'  proxy authentication failure
//! '5'  local hostname/bind failure
//! ```
//!
//! At most one worker per server is live: starting a new one drops the previous receiver, and an
//! abandoned worker's result goes nowhere.

use base64::Engine;
use log::debug;
use socket2::{Domain, Socket, Type};
use tokio::sync::oneshot;

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Bound on each blocking proxy-handshake read so an unresponsive proxy cannot pin the thread
/// past the connection timeout.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    Ok,
    AddrNotFound,
    IpFamilyMismatch,
    ConnectionRefused,
    ProxyAuthFailed,
    LocalBindFailed,
}

impl ConnectStatus {
    pub fn as_byte(self) -> u8 {
        match self {
            ConnectStatus::Ok => b'0',
            ConnectStatus::AddrNotFound => b'1',
            ConnectStatus::IpFamilyMismatch => b'2',
            ConnectStatus::ConnectionRefused => b'3',
            ConnectStatus::ProxyAuthFailed => b'4',
            ConnectStatus::LocalBindFailed => b'5',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyType {
    Http,
    Socks4,
    Socks5,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    pub proxy_type: ProxyType,
    pub host: String,
    pub port: u16,
    pub ipv6: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

pub(crate) struct ConnectWorker {
    rcv: oneshot::Receiver<(ConnectStatus, Option<TcpStream>)>,
}

impl ConnectWorker {
    /// Waits for the worker's status byte. A closed channel (runtime shutdown) reads as a refused
    /// connection.
    pub(crate) async fn recv(self) -> (ConnectStatus, Option<TcpStream>) {
        match self.rcv.await {
            Ok(result) => result,
            Err(_) => (ConnectStatus::ConnectionRefused, None),
        }
    }
}

pub(crate) fn spawn(
    host: String,
    port: u16,
    ipv6: bool,
    local_hostname: Option<String>,
    proxy: Option<Proxy>,
) -> ConnectWorker {
    let (snd, rcv) = oneshot::channel();
    tokio::task::spawn_blocking(move || {
        let result = connect_blocking(&host, port, ipv6, local_hostname.as_deref(), proxy.as_ref());
        // The parent may have disconnected meanwhile; its receiver is gone and the socket is
        // dropped here, which is all the reaping a thread needs.
        let _ = snd.send(result);
    });
    ConnectWorker { rcv }
}

fn family_matches(addr: &SocketAddr, ipv6: bool) -> bool {
    addr.is_ipv6() == ipv6
}

fn resolve(
    host: &str,
    port: u16,
    ipv6: bool,
) -> Result<Vec<SocketAddr>, ConnectStatus> {
    let addrs: Vec<SocketAddr> = match (host, port).to_socket_addrs() {
        Err(_) => return Err(ConnectStatus::AddrNotFound),
        Ok(iter) => iter.collect(),
    };
    if addrs.is_empty() {
        return Err(ConnectStatus::AddrNotFound);
    }
    let matching: Vec<SocketAddr> = addrs
        .into_iter()
        .filter(|addr| family_matches(addr, ipv6))
        .collect();
    if matching.is_empty() {
        return Err(ConnectStatus::IpFamilyMismatch);
    }
    Ok(matching)
}

fn connect_blocking(
    host: &str,
    port: u16,
    ipv6: bool,
    local_hostname: Option<&str>,
    proxy: Option<&Proxy>,
) -> (ConnectStatus, Option<TcpStream>) {
    match try_connect(host, port, ipv6, local_hostname, proxy) {
        Ok(stream) => (ConnectStatus::Ok, Some(stream)),
        Err(status) => (status, None),
    }
}

fn try_connect(
    host: &str,
    port: u16,
    ipv6: bool,
    local_hostname: Option<&str>,
    proxy: Option<&Proxy>,
) -> Result<TcpStream, ConnectStatus> {
    match proxy {
        Some(proxy) => {
            let addrs = resolve(&proxy.host, proxy.port, proxy.ipv6)?;
            let mut stream = connect_first(&addrs, None)?;

            stream
                .set_read_timeout(Some(HANDSHAKE_TIMEOUT))
                .map_err(|_| ConnectStatus::ConnectionRefused)?;

            let pass_result = match proxy.proxy_type {
                ProxyType::Http => pass_http_proxy(&mut stream, proxy, host, port),
                ProxyType::Socks4 => pass_socks4_proxy(&mut stream, proxy, host, port),
                ProxyType::Socks5 => pass_socks5_proxy(&mut stream, proxy, host, port),
            };
            match pass_result {
                Ok(()) => {}
                Err(status) => return Err(status),
            }

            stream
                .set_read_timeout(None)
                .map_err(|_| ConnectStatus::ConnectionRefused)?;
            Ok(stream)
        }
        None => {
            let local_addr = match local_hostname {
                None => None,
                Some(local) => {
                    let addrs = (local, 0)
                        .to_socket_addrs()
                        .map_err(|_| ConnectStatus::LocalBindFailed)?
                        .find(|addr| family_matches(addr, ipv6));
                    match addrs {
                        None => return Err(ConnectStatus::LocalBindFailed),
                        some => some,
                    }
                }
            };

            let addrs = resolve(host, port, ipv6)?;
            connect_first(&addrs, local_addr)
        }
    }
}

fn connect_first(
    addrs: &[SocketAddr],
    local_addr: Option<SocketAddr>,
) -> Result<TcpStream, ConnectStatus> {
    for addr in addrs {
        debug!("worker: connecting to {}", addr);
        let result = match local_addr {
            None => TcpStream::connect(addr),
            Some(local) => connect_bound(addr, &local),
        };
        match result {
            Ok(stream) => return Ok(stream),
            Err(err) => debug!("worker: connect to {} failed: {}", addr, err),
        }
    }
    Err(ConnectStatus::ConnectionRefused)
}

fn connect_bound(addr: &SocketAddr, local: &SocketAddr) -> std::io::Result<TcpStream> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.bind(&(*local).into())?;
    socket.connect(&(*addr).into())?;
    Ok(socket.into())
}

/// HTTP `CONNECT`, with optional Basic authentication. The proxy must answer `HTTP/1.x 200`.
fn pass_http_proxy(
    stream: &mut TcpStream,
    proxy: &Proxy,
    host: &str,
    port: u16,
) -> Result<(), ConnectStatus> {
    let request = match (&proxy.username, &proxy.password) {
        (Some(username), password) => {
            let auth = format!("{}:{}", username, password.as_deref().unwrap_or(""));
            let auth = base64::engine::general_purpose::STANDARD.encode(auth);
            format!(
                "CONNECT {}:{} HTTP/1.0\r\nProxy-Authorization: Basic {}\r\n\r\n",
                host, port, auth
            )
        }
        (None, _) => format!("CONNECT {}:{} HTTP/1.0\r\n\r\n", host, port),
    };

    stream
        .write_all(request.as_bytes())
        .map_err(|_| ConnectStatus::ProxyAuthFailed)?;

    let mut buffer = [0u8; 256];
    let n = stream
        .read(&mut buffer)
        .map_err(|_| ConnectStatus::ProxyAuthFailed)?;

    // success looks like: "HTTP/1.0 200 OK"
    if n < 12 || &buffer[0..7] != b"HTTP/1." || &buffer[9..12] != b"200" {
        return Err(ConnectStatus::ProxyAuthFailed);
    }
    Ok(())
}

/// SOCKS4: version 4, method 1 (connect), IPv4 only. Expects reply code 0x5A.
fn pass_socks4_proxy(
    stream: &mut TcpStream,
    proxy: &Proxy,
    host: &str,
    port: u16,
) -> Result<(), ConnectStatus> {
    // SOCKS4 carries a raw IPv4 address, so the target is resolved here (by the proxy-side
    // worker, not the main task)
    let target = (host, port)
        .to_socket_addrs()
        .map_err(|_| ConnectStatus::AddrNotFound)?
        .find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .ok_or(ConnectStatus::AddrNotFound)?;

    let mut request = Vec::with_capacity(16);
    request.push(4); // version
    request.push(1); // connect
    request.extend_from_slice(&port.to_be_bytes());
    request.extend_from_slice(&target.ip().octets());
    if let Some(username) = &proxy.username {
        request.extend_from_slice(username.as_bytes());
    }
    request.push(0);

    stream
        .write_all(&request)
        .map_err(|_| ConnectStatus::ProxyAuthFailed)?;

    let mut reply = [0u8; 8];
    stream
        .read_exact(&mut reply)
        .map_err(|_| ConnectStatus::ProxyAuthFailed)?;
    if reply[1] != 0x5A {
        return Err(ConnectStatus::ProxyAuthFailed);
    }
    Ok(())
}

/// SOCKS5 (RFC 1928), optional username/password subnegotiation (RFC 1929), domain-name connect.
fn pass_socks5_proxy(
    stream: &mut TcpStream,
    proxy: &Proxy,
    host: &str,
    port: u16,
) -> Result<(), ConnectStatus> {
    let with_auth = proxy.username.is_some();
    let greeting = [5u8, 1, if with_auth { 2 } else { 0 }];
    stream
        .write_all(&greeting)
        .map_err(|_| ConnectStatus::ProxyAuthFailed)?;

    let mut reply = [0u8; 2];
    stream
        .read_exact(&mut reply)
        .map_err(|_| ConnectStatus::ProxyAuthFailed)?;

    if with_auth {
        if reply != [5, 2] {
            return Err(ConnectStatus::ProxyAuthFailed);
        }
        let username = proxy.username.as_deref().unwrap_or("");
        let password = proxy.password.as_deref().unwrap_or("");
        if username.len() > 255 || password.len() > 255 {
            return Err(ConnectStatus::ProxyAuthFailed);
        }
        let mut auth = Vec::with_capacity(3 + username.len() + password.len());
        auth.push(1);
        auth.push(username.len() as u8);
        auth.extend_from_slice(username.as_bytes());
        auth.push(password.len() as u8);
        auth.extend_from_slice(password.as_bytes());
        stream
            .write_all(&auth)
            .map_err(|_| ConnectStatus::ProxyAuthFailed)?;

        let mut auth_reply = [0u8; 2];
        stream
            .read_exact(&mut auth_reply)
            .map_err(|_| ConnectStatus::ProxyAuthFailed)?;
        if auth_reply[1] != 0 {
            return Err(ConnectStatus::ProxyAuthFailed);
        }
    } else if reply != [5, 0] {
        return Err(ConnectStatus::ProxyAuthFailed);
    }

    // connect request with a domain-name address (type 3)
    if host.len() > 255 {
        return Err(ConnectStatus::AddrNotFound);
    }
    let mut request = Vec::with_capacity(7 + host.len());
    request.extend_from_slice(&[5, 1, 0, 3, host.len() as u8]);
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    stream
        .write_all(&request)
        .map_err(|_| ConnectStatus::ProxyAuthFailed)?;

    let mut reply = [0u8; 4];
    stream
        .read_exact(&mut reply)
        .map_err(|_| ConnectStatus::ProxyAuthFailed)?;
    if reply[0] != 5 || reply[1] != 0 {
        return Err(ConnectStatus::ProxyAuthFailed);
    }

    // drain the bound-address part of the reply, whose size depends on the address type
    let remaining = match reply[3] {
        1 => 6,
        4 => 18,
        3 => {
            let mut len = [0u8; 1];
            stream
                .read_exact(&mut len)
                .map_err(|_| ConnectStatus::ProxyAuthFailed)?;
            len[0] as usize + 2
        }
        _ => return Err(ConnectStatus::ProxyAuthFailed),
    };
    let mut buffer = [0u8; 258];
    stream
        .read_exact(&mut buffer[..remaining])
        .map_err(|_| ConnectStatus::ProxyAuthFailed)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_bytes() {
        assert_eq!(ConnectStatus::Ok.as_byte(), b'0');
        assert_eq!(ConnectStatus::AddrNotFound.as_byte(), b'1');
        assert_eq!(ConnectStatus::IpFamilyMismatch.as_byte(), b'2');
        assert_eq!(ConnectStatus::ConnectionRefused.as_byte(), b'3');
        assert_eq!(ConnectStatus::ProxyAuthFailed.as_byte(), b'4');
        assert_eq!(ConnectStatus::LocalBindFailed.as_byte(), b'5');
    }

    #[test]
    fn resolve_family_filter() {
        // 127.0.0.1 never resolves to an IPv6 address
        assert_eq!(
            resolve("127.0.0.1", 6667, true),
            Err(ConnectStatus::IpFamilyMismatch)
        );
        let addrs = resolve("127.0.0.1", 6667, false).unwrap();
        assert!(addrs.iter().all(|a| a.is_ipv4()));
    }

    #[test]
    fn socks5_handshake_against_fake_proxy() {
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut greeting = [0u8; 3];
            sock.read_exact(&mut greeting).unwrap();
            assert_eq!(greeting, [5, 1, 0]);
            sock.write_all(&[5, 0]).unwrap();

            // connect request: 5 1 0 3 <len> <host> <port>
            let mut head = [0u8; 5];
            sock.read_exact(&mut head).unwrap();
            assert_eq!(&head[..4], &[5, 1, 0, 3]);
            let mut rest = vec![0u8; head[4] as usize + 2];
            sock.read_exact(&mut rest).unwrap();
            assert_eq!(&rest[..head[4] as usize], b"irc.example.org");

            // reply with an IPv4 bound address
            sock.write_all(&[5, 0, 0, 1, 0, 0, 0, 0, 0, 0]).unwrap();
        });

        let mut stream = TcpStream::connect(addr).unwrap();
        let proxy = Proxy {
            proxy_type: ProxyType::Socks5,
            host: addr.ip().to_string(),
            port: addr.port(),
            ipv6: false,
            username: None,
            password: None,
        };
        pass_socks5_proxy(&mut stream, &proxy, "irc.example.org", 6667).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn http_connect_against_fake_proxy() {
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buffer = [0u8; 512];
            let n = sock.read(&mut buffer).unwrap();
            let request = String::from_utf8_lossy(&buffer[..n]).into_owned();
            assert!(request.starts_with("CONNECT irc.example.org:6667 HTTP/1.0\r\n"));
            sock.write_all(b"HTTP/1.0 200 Connection established\r\n\r\n")
                .unwrap();
        });

        let mut stream = TcpStream::connect(addr).unwrap();
        let proxy = Proxy {
            proxy_type: ProxyType::Http,
            host: addr.ip().to_string(),
            port: addr.port(),
            ipv6: false,
            username: None,
            password: None,
        };
        pass_http_proxy(&mut stream, &proxy, "irc.example.org", 6667).unwrap();
        server.join().unwrap();
    }
}
