//! SASL authentication: PLAIN, EXTERNAL and SCRAM-SHA-256 (RFC 7677).
//!
//! The dialog runs inside the CAP negotiation: `AUTHENTICATE <mech>`, then base64 payloads both
//! ways, finished by a `90x` numeric. Payloads longer than 400 bytes are split over multiple
//! `AUTHENTICATE` lines; a payload of exactly `n * 400` bytes is terminated with `AUTHENTICATE +`.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use std::fmt;

type HmacSha256 = Hmac<Sha256>;

const AUTHENTICATE_CHUNK: usize = 400;

fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

/// SASL credentials, from the server configuration.
#[derive(Debug, Clone)]
pub enum SASLAuth {
    Plain {
        username: String,
        password: String,
    },

    /// TLS client certificate authentication. `cert` and `key` are DER blobs read from the
    /// configured PEM file.
    External {
        cert: Vec<u8>,
        key: Vec<u8>,
    },

    ScramSha256 {
        username: String,
        password: String,
    },
}

impl SASLAuth {
    pub fn mechanism(&self) -> &'static str {
        match self {
            SASLAuth::Plain { .. } => "PLAIN",
            SASLAuth::External { .. } => "EXTERNAL",
            SASLAuth::ScramSha256 { .. } => "SCRAM-SHA-256",
        }
    }

    /// Builds EXTERNAL credentials from the contents of a PEM file holding the certificate and
    /// its PKCS8 private key.
    pub fn external_from_pem(pem: &[u8]) -> Result<SASLAuth, String> {
        let mut reader = std::io::BufReader::new(pem);
        let cert = rustls_pemfile::certs(&mut reader)
            .next()
            .ok_or("PEM must contain at least one certificate")?
            .map_err(|err| format!("Could not parse PEM: {}", err))?;

        let mut reader = std::io::BufReader::new(pem);
        let key = rustls_pemfile::pkcs8_private_keys(&mut reader)
            .next()
            .ok_or("PEM must contain a PKCS8 private key")?
            .map_err(|err| format!("Could not parse PEM: {}", err))?;

        Ok(SASLAuth::External {
            cert: cert.as_ref().to_vec(),
            key: key.secret_pkcs8_der().to_vec(),
        })
    }
}

/// What to do when SASL authentication fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaslFail {
    /// Finish registration unauthenticated.
    Continue,
    /// Disconnect and schedule a reconnect.
    #[default]
    Reconnect,
    /// Disconnect and stay down.
    Disconnect,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ScramError {
    InvalidEncoding,
    NonceMismatch,
    MissingField(&'static str),
    ServerVerificationFailed,
    UnexpectedMessage,
}

impl fmt::Display for ScramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScramError::InvalidEncoding => write!(f, "invalid base64 encoding"),
            ScramError::NonceMismatch => write!(f, "server nonce does not match client nonce"),
            ScramError::MissingField(field) => {
                write!(f, "missing {} in server message", field)
            }
            ScramError::ServerVerificationFailed => write!(f, "server signature verification failed"),
            ScramError::UnexpectedMessage => write!(f, "unexpected SASL message"),
        }
    }
}

impl std::error::Error for ScramError {}

#[derive(Debug)]
enum ScramState {
    Initial,
    ClientFirstSent { client_first_bare: String },
    ClientFinalSent { server_signature: Vec<u8> },
    Complete,
}

/// SCRAM-SHA-256 client state machine.
///
/// Protocol flow:
///
/// 1. client-first-message: `n,,n=user,r=nonce`
/// 2. server-first-message: `r=nonce+server,s=salt,i=iterations`
/// 3. client-final-message: `c=biws,r=nonce+server,p=proof`
/// 4. server-final-message: `v=verifier`
#[derive(Debug)]
pub(crate) struct ScramClient {
    username: String,
    password: String,
    client_nonce: String,
    state: ScramState,
}

impl ScramClient {
    pub(crate) fn new(username: &str, password: &str) -> ScramClient {
        ScramClient {
            username: username.to_owned(),
            password: password.to_owned(),
            client_nonce: generate_nonce(),
            state: ScramState::Initial,
        }
    }

    /// The client-first-message, base64-encoded for AUTHENTICATE.
    pub(crate) fn client_first(&mut self) -> String {
        // gs2-header "n,,": no channel binding, no authzid
        let bare = format!("n={},r={}", saslprep_name(&self.username), self.client_nonce);
        let full = format!("n,,{}", bare);
        self.state = ScramState::ClientFirstSent {
            client_first_bare: bare,
        };
        b64().encode(full.as_bytes())
    }

    /// Consumes the server-first-message and produces the client-final-message (base64).
    pub(crate) fn process_server_first(&mut self, server_first_b64: &str) -> Result<String, ScramError> {
        let client_first_bare = match &self.state {
            ScramState::ClientFirstSent { client_first_bare } => client_first_bare.clone(),
            _ => return Err(ScramError::UnexpectedMessage),
        };

        let decoded = b64()
            .decode(server_first_b64)
            .map_err(|_| ScramError::InvalidEncoding)?;
        let server_first =
            String::from_utf8(decoded).map_err(|_| ScramError::InvalidEncoding)?;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations: Option<u32> = None;
        for part in server_first.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                nonce = Some(value.to_owned());
            } else if let Some(value) = part.strip_prefix("s=") {
                salt = Some(b64().decode(value).map_err(|_| ScramError::InvalidEncoding)?);
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = Some(value.parse().map_err(|_| ScramError::InvalidEncoding)?);
            }
        }
        let nonce = nonce.ok_or(ScramError::MissingField("nonce"))?;
        let salt = salt.ok_or(ScramError::MissingField("salt"))?;
        let iterations = iterations.ok_or(ScramError::MissingField("iteration count"))?;

        if !nonce.starts_with(&self.client_nonce) {
            return Err(ScramError::NonceMismatch);
        }

        // SaltedPassword = Hi(password, salt, i)
        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        );

        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key = Sha256::digest(&client_key);

        // AuthMessage = client-first-bare , server-first , client-final-without-proof
        let client_final_without_proof = format!("c=biws,r={}", nonce);
        let auth_message = format!(
            "{},{},{}",
            client_first_bare, server_first, client_final_without_proof
        );

        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
        let client_proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        let server_key = hmac_sha256(&salted_password, b"Server Key");
        let server_signature = hmac_sha256(&server_key, auth_message.as_bytes());

        self.state = ScramState::ClientFinalSent { server_signature };

        let client_final = format!(
            "{},p={}",
            client_final_without_proof,
            b64().encode(&client_proof)
        );
        Ok(b64().encode(client_final.as_bytes()))
    }

    /// Verifies the server-final-message (`v=...`).
    pub(crate) fn verify_server_final(&mut self, server_final_b64: &str) -> Result<(), ScramError> {
        let expected = match &self.state {
            ScramState::ClientFinalSent { server_signature } => server_signature.clone(),
            _ => return Err(ScramError::UnexpectedMessage),
        };

        let decoded = b64()
            .decode(server_final_b64)
            .map_err(|_| ScramError::InvalidEncoding)?;
        let server_final =
            String::from_utf8(decoded).map_err(|_| ScramError::InvalidEncoding)?;

        let verifier = server_final
            .split(',')
            .find_map(|part| part.strip_prefix("v="))
            .ok_or(ScramError::MissingField("verifier"))?;
        let verifier = b64()
            .decode(verifier)
            .map_err(|_| ScramError::InvalidEncoding)?;

        if verifier != expected {
            return Err(ScramError::ServerVerificationFailed);
        }
        self.state = ScramState::Complete;
        Ok(())
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn generate_nonce() -> String {
    let mut bytes = [0u8; 18];
    if getrandom::getrandom(&mut bytes).is_err() {
        // extremely unlikely; fall back to a time-derived nonce
        let t = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        return format!("{}_{}", t, std::process::id());
    }
    b64().encode(bytes)
}

/// RFC 5802 username escaping: `=` and `,` are not allowed verbatim.
fn saslprep_name(s: &str) -> String {
    s.replace('=', "=3D").replace(',', "=2C")
}

/// The PLAIN initial response: `authzid \0 authcid \0 password`, base64-encoded.
pub(crate) fn plain_payload(username: &str, password: &str) -> String {
    b64().encode(format!("{}\x00{}\x00{}", username, username, password))
}

/// Splits an already-encoded payload into AUTHENTICATE argument lines. An empty payload, or one
/// that is an exact multiple of the chunk size, needs a final `+`.
pub(crate) fn chunk_payload(encoded: &str) -> Vec<String> {
    if encoded.is_empty() {
        return vec!["+".to_owned()];
    }
    let mut chunks: Vec<String> = encoded
        .as_bytes()
        .chunks(AUTHENTICATE_CHUNK)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect();
    if encoded.len() % AUTHENTICATE_CHUNK == 0 {
        chunks.push("+".to_owned());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_payload_shape() {
        let payload = plain_payload("alice", "secret");
        let decoded = b64().decode(payload).unwrap();
        assert_eq!(decoded, b"alice\x00alice\x00secret");
    }

    #[test]
    fn chunking() {
        assert_eq!(chunk_payload(""), vec!["+"]);
        assert_eq!(chunk_payload("abc"), vec!["abc"]);

        let exactly_400 = "a".repeat(400);
        assert_eq!(chunk_payload(&exactly_400), vec![exactly_400.clone(), "+".to_owned()]);

        let chunks = chunk_payload(&"a".repeat(401));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 400);
        assert_eq!(chunks[1], "a");
    }

    #[test]
    fn scram_username_escaping() {
        assert_eq!(saslprep_name("a=b,c"), "a=3Db=2Cc");
    }

    // RFC 7677 section 3 test vectors
    #[test]
    fn scram_rfc_vectors() {
        let mut client = ScramClient::new("user", "pencil");
        client.client_nonce = "rOprNGfwEbeRWgbNEkqO".to_owned();

        let first = client.client_first();
        assert_eq!(
            b64().decode(first).unwrap(),
            b"n,,n=user,r=rOprNGfwEbeRWgbNEkqO".to_vec()
        );

        let server_first = b64().encode(
            "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
             s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096",
        );
        let client_final_b64 = client.process_server_first(&server_first).unwrap();
        let client_final = String::from_utf8(b64().decode(client_final_b64).unwrap()).unwrap();
        assert_eq!(
            client_final,
            "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
             p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
        );

        let server_final = b64().encode("v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=");
        assert_eq!(client.verify_server_final(&server_final), Ok(()));
    }

    #[test]
    fn scram_rejects_bad_nonce() {
        let mut client = ScramClient::new("user", "pencil");
        client.client_nonce = "clientnonce".to_owned();
        client.client_first();

        let server_first = b64().encode("r=evilnonce,s=c2FsdA==,i=4096");
        assert_eq!(
            client.process_server_first(&server_first),
            Err(ScramError::NonceMismatch)
        );
    }
}
