//! MikroTik RouterOS API transport for roster fetches.
//!
//! Implements the RouterOS management protocol: length-prefixed words
//! grouped into sentences over a plain TCP connection (default port
//! 8728). A fetch logs in with the router's API credentials (post-6.43
//! plain login) and reads the PPPoE roster from `/ppp/secret/print`.
//!
//! The caller owns the overall timeout; this client maps connect/socket
//! failures to `Unreachable`, login traps to `AuthRejected` and framing
//! or content violations to `ProtocolError`. A reply containing a
//! malformed account entry fails the whole fetch.

use async_trait::async_trait;
use pppsync_core::{DeviceAccount, RosterClient, RosterError, RosterTarget};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

/// Reply categories in the RouterOS protocol.
const REPLY_RE: &str = "!re";
const REPLY_DONE: &str = "!done";
const REPLY_TRAP: &str = "!trap";
const REPLY_FATAL: &str = "!fatal";

/// Upper bound on a single word; anything larger is a framing violation
/// for our use (secrets and profile names are short).
const MAX_WORD_LEN: u32 = 1 << 20;

/// Encodes a RouterOS word length prefix.
///
/// The encoding stores small lengths in one byte and escalates to up to
/// five bytes with high-bit tags, per the RouterOS API definition.
pub fn encode_length(len: u32) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else if len < 0x4000 {
        let v = len | 0x8000;
        vec![(v >> 8) as u8, v as u8]
    } else if len < 0x20_0000 {
        let v = len | 0xC0_0000;
        vec![(v >> 16) as u8, (v >> 8) as u8, v as u8]
    } else if len < 0x1000_0000 {
        let v = len | 0xE000_0000;
        vec![(v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8, v as u8]
    } else {
        vec![
            0xF0,
            (len >> 24) as u8,
            (len >> 16) as u8,
            (len >> 8) as u8,
            len as u8,
        ]
    }
}

/// Encodes one sentence: each word length-prefixed, terminated by a
/// zero-length word.
pub fn encode_sentence<S: AsRef<str>>(words: &[S]) -> Vec<u8> {
    let mut buf = Vec::new();
    for word in words {
        let bytes = word.as_ref().as_bytes();
        buf.extend_from_slice(&encode_length(bytes.len() as u32));
        buf.extend_from_slice(bytes);
    }
    buf.push(0);
    buf
}

/// Decodes a word length prefix from the stream.
async fn read_length<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u32, RosterError> {
    let first = read_u8(reader).await?;
    let len = if first < 0x80 {
        u32::from(first)
    } else if first < 0xC0 {
        let b = read_u8(reader).await?;
        (u32::from(first & 0x3F) << 8) | u32::from(b)
    } else if first < 0xE0 {
        let b1 = read_u8(reader).await?;
        let b2 = read_u8(reader).await?;
        (u32::from(first & 0x1F) << 16) | (u32::from(b1) << 8) | u32::from(b2)
    } else if first < 0xF0 {
        let b1 = read_u8(reader).await?;
        let b2 = read_u8(reader).await?;
        let b3 = read_u8(reader).await?;
        (u32::from(first & 0x0F) << 24)
            | (u32::from(b1) << 16)
            | (u32::from(b2) << 8)
            | u32::from(b3)
    } else if first == 0xF0 {
        let b1 = read_u8(reader).await?;
        let b2 = read_u8(reader).await?;
        let b3 = read_u8(reader).await?;
        let b4 = read_u8(reader).await?;
        (u32::from(b1) << 24) | (u32::from(b2) << 16) | (u32::from(b3) << 8) | u32::from(b4)
    } else {
        return Err(RosterError::ProtocolError(format!(
            "invalid length prefix byte 0x{first:02x}"
        )));
    };

    if len > MAX_WORD_LEN {
        return Err(RosterError::ProtocolError(format!(
            "word length {len} exceeds limit"
        )));
    }
    Ok(len)
}

async fn read_u8<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u8, RosterError> {
    reader
        .read_u8()
        .await
        .map_err(|e| RosterError::ProtocolError(format!("read failed: {e}")))
}

/// Reads one sentence (words up to the empty terminator).
pub async fn read_sentence<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Vec<String>, RosterError> {
    let mut words = Vec::new();
    loop {
        let len = read_length(reader).await?;
        if len == 0 {
            return Ok(words);
        }
        let mut buf = vec![0u8; len as usize];
        reader
            .read_exact(&mut buf)
            .await
            .map_err(|e| RosterError::ProtocolError(format!("read failed: {e}")))?;
        let word = String::from_utf8(buf)
            .map_err(|_| RosterError::ProtocolError("non-UTF-8 word".to_string()))?;
        words.push(word);
    }
}

async fn write_sentence<W, S>(writer: &mut W, words: &[S]) -> Result<(), RosterError>
where
    W: AsyncWrite + Unpin,
    S: AsRef<str>,
{
    let buf = encode_sentence(words);
    writer
        .write_all(&buf)
        .await
        .map_err(|e| RosterError::ProtocolError(format!("write failed: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| RosterError::ProtocolError(format!("write failed: {e}")))
}

/// Splits a `=key=value` attribute word.
fn parse_attribute(word: &str) -> Option<(&str, &str)> {
    let rest = word.strip_prefix('=')?;
    let (key, value) = rest.split_once('=')?;
    Some((key, value))
}

/// Builds a `DeviceAccount` from one `!re` sentence of
/// `/ppp/secret/print`. A missing `name` makes the entry malformed.
fn parse_account(words: &[String]) -> Result<DeviceAccount, RosterError> {
    let mut attrs: HashMap<&str, &str> = HashMap::new();
    for word in words.iter().skip(1) {
        if let Some((key, value)) = parse_attribute(word) {
            attrs.insert(key, value);
        }
    }

    let username = attrs
        .get("name")
        .filter(|n| !n.is_empty())
        .ok_or_else(|| RosterError::ProtocolError("secret entry without name".to_string()))?;

    // RouterOS omits the password field when the caller may not read it.
    let secret = attrs.get("password").copied().unwrap_or_default();
    let disabled = matches!(attrs.get("disabled").copied(), Some("true") | Some("yes"));
    let profile = attrs.get("profile").copied().unwrap_or("default");

    Ok(DeviceAccount {
        username: (*username).to_string(),
        secret: secret.to_string(),
        enabled: !disabled,
        profile: profile.to_string(),
    })
}

/// RouterOS API roster client.
///
/// Stateless: every fetch opens a fresh connection with the credentials
/// passed in the target, so concurrent syncs of different routers never
/// share session state.
#[derive(Debug, Default, Clone)]
pub struct RouterOsClient;

impl RouterOsClient {
    /// Creates a client.
    pub fn new() -> Self {
        Self
    }

    async fn login<S>(stream: &mut S, target: &RosterTarget) -> Result<(), RosterError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let words = [
            "/login".to_string(),
            format!("=name={}", target.username),
            format!("=password={}", target.password),
        ];
        write_sentence(stream, &words).await?;

        let reply = read_sentence(stream).await?;
        match reply.first().map(String::as_str) {
            Some(REPLY_DONE) => Ok(()),
            Some(REPLY_TRAP) | Some(REPLY_FATAL) => Err(RosterError::AuthRejected),
            other => Err(RosterError::ProtocolError(format!(
                "unexpected login reply: {other:?}"
            ))),
        }
    }

    async fn read_secrets<S>(stream: &mut S) -> Result<Vec<DeviceAccount>, RosterError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        write_sentence(stream, &["/ppp/secret/print"]).await?;

        let mut accounts = Vec::new();
        loop {
            let sentence = read_sentence(stream).await?;
            match sentence.first().map(String::as_str) {
                Some(REPLY_RE) => accounts.push(parse_account(&sentence)?),
                Some(REPLY_DONE) => return Ok(accounts),
                Some(REPLY_TRAP) => {
                    let detail = sentence
                        .iter()
                        .find_map(|w| parse_attribute(w).filter(|(k, _)| *k == "message"))
                        .map(|(_, v)| v.to_string())
                        .unwrap_or_else(|| "trap".to_string());
                    return Err(RosterError::ProtocolError(detail));
                }
                other => {
                    return Err(RosterError::ProtocolError(format!(
                        "unexpected print reply: {other:?}"
                    )))
                }
            }
        }
    }
}

#[async_trait]
impl RosterClient for RouterOsClient {
    #[instrument(skip(self, target), fields(host = %target.host, port = target.port))]
    async fn fetch_roster(
        &self,
        target: &RosterTarget,
    ) -> Result<Vec<DeviceAccount>, RosterError> {
        let mut stream = TcpStream::connect((target.host.as_str(), target.port))
            .await
            .map_err(|e| RosterError::Unreachable(e.to_string()))?;

        Self::login(&mut stream, target).await?;
        let accounts = Self::read_secrets(&mut stream).await?;
        debug!(count = accounts.len(), "Fetched PPPoE roster");

        // Best-effort close; the session is one-shot.
        let _ = stream.shutdown().await;
        Ok(accounts)
    }
}
