//! The line-oriented wire protocol.
//!
//! Commands are lines of space-separated tokens terminated by `\n`. A
//! token of the form `$<n>` announces a binary blob: exactly `n` raw
//! bytes follow the next space, then the line continues as usual.
//!
//! Responses, one line each unless stated otherwise:
//!
//! - `+OK`, `+PONG`
//! - `:<int>`
//! - `+STR <text>`
//! - `*<count> <name> ...` for name listings
//! - `+MSGS <count>` followed by `<count>` lines of
//!   `+MSG <id> <receipt|-> $<len> <payload>`
//! - `+DICT <key> <value> ...`
//! - `-ERR <code> <text>`

use std::io;

use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use ferriq_common::{DictValue, QueueError, Response};

/// Longest accepted text token.
const MAX_TOKEN_LEN: usize = 1024;
/// Most tokens accepted on one line.
const MAX_TOKENS: usize = 64;
/// Largest accepted binary blob.
const MAX_BLOB_LEN: usize = 512 * 1024;

/// One token of a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Text(String),
    Blob(Vec<u8>),
}

impl Token {
    /// The token as text, if it is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Blob(_) => None,
        }
    }

    /// The token's bytes, whatever its kind.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Blob(bytes) => bytes,
        }
    }
}

fn framing_error(text: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, text)
}

/// Read one command line. Returns `None` on a clean end of stream.
///
/// # Errors
/// On transport failures, or `InvalidData` when the peer violates the
/// framing rules (oversized tokens, malformed blob headers, EOF inside
/// a line).
pub async fn read_tokens<R>(reader: &mut R) -> io::Result<Option<Vec<Token>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut tokens: Vec<Token> = Vec::new();
    let mut current: Vec<u8> = Vec::new();
    let mut started = false;

    loop {
        let mut byte = [0_u8; 1];
        if reader.read(&mut byte).await? == 0 {
            if started {
                return Err(framing_error("connection closed inside a command line"));
            }
            return Ok(None);
        }
        started = true;

        match byte[0] {
            b'\r' => {}
            b'\n' => {
                if !current.is_empty() {
                    tokens.push(finish_text_token(&mut current)?);
                }
                return Ok(Some(tokens));
            }
            b' ' => {
                if current.is_empty() {
                    continue;
                }
                if tokens.len() >= MAX_TOKENS {
                    return Err(framing_error("too many tokens on one line"));
                }
                if current.first() == Some(&b'$') {
                    let len = parse_blob_len(&current)?;
                    let mut blob = vec![0_u8; len];
                    reader.read_exact(&mut blob).await?;
                    current.clear();
                    tokens.push(Token::Blob(blob));
                } else {
                    tokens.push(finish_text_token(&mut current)?);
                }
            }
            b => {
                if current.len() >= MAX_TOKEN_LEN {
                    return Err(framing_error("token too long"));
                }
                current.push(b);
            }
        }
    }
}

fn finish_text_token(current: &mut Vec<u8>) -> io::Result<Token> {
    if current.first() == Some(&b'$') {
        return Err(framing_error("blob token must be followed by its payload"));
    }
    let text = String::from_utf8(std::mem::take(current))
        .map_err(|_| framing_error("token is not valid UTF-8"))?;
    Ok(Token::Text(text))
}

fn parse_blob_len(header: &[u8]) -> io::Result<usize> {
    let digits =
        std::str::from_utf8(&header[1..]).map_err(|_| framing_error("malformed blob header"))?;
    let len: usize = digits
        .parse()
        .map_err(|_| framing_error("malformed blob header"))?;
    if len > MAX_BLOB_LEN {
        return Err(framing_error("blob exceeds the payload size limit"));
    }
    Ok(len)
}

fn dict_value_text(value: &DictValue) -> String {
    match value {
        DictValue::Int(v) => v.to_string(),
        DictValue::Bool(v) => v.to_string(),
        DictValue::Str(v) => v.clone(),
    }
}

/// Write one operation outcome.
///
/// # Errors
/// On transport failures.
pub async fn write_outcome<W>(
    writer: &mut W,
    outcome: &Result<Response, QueueError>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match outcome {
        Ok(response) => write_response(writer, response).await,
        Err(error) => {
            let line = format!("-ERR {} {}\n", error.code(), error);
            writer.write_all(line.as_bytes()).await
        }
    }
}

async fn write_response<W>(writer: &mut W, response: &Response) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match response {
        Response::Ok => writer.write_all(b"+OK\n").await,
        Response::Pong => writer.write_all(b"+PONG\n").await,
        Response::Int(v) => writer.write_all(format!(":{v}\n").as_bytes()).await,
        Response::Str(text) => writer.write_all(format!("+STR {text}\n").as_bytes()).await,
        Response::Names(names) => {
            let mut line = format!("*{}", names.len());
            for name in names {
                line.push(' ');
                line.push_str(name);
            }
            line.push('\n');
            writer.write_all(line.as_bytes()).await
        }
        Response::Items(items) => {
            writer
                .write_all(format!("+MSGS {}\n", items.len()).as_bytes())
                .await?;
            for item in items {
                let header = format!(
                    "+MSG {} {} ${} ",
                    item.id,
                    item.receipt.as_deref().unwrap_or("-"),
                    item.payload.len()
                );
                writer.write_all(header.as_bytes()).await?;
                writer.write_all(&item.payload).await?;
                writer.write_all(b"\n").await?;
            }
            Ok(())
        }
        Response::Dict(dict) => {
            let mut line = String::from("+DICT");
            for (key, value) in dict {
                line.push(' ');
                line.push_str(key);
                line.push(' ');
                line.push_str(&dict_value_text(value));
            }
            line.push('\n');
            writer.write_all(line.as_bytes()).await
        }
    }
}
