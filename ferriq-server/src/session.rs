//! Per-connection session dispatcher.
//!
//! A session parses token lines into either a global command (queue
//! lifecycle, liveness) or, once a queue context is selected with
//! `CTX`, one of the engine's typed commands. Command names and
//! parameter names are case-insensitive; parameters are `NAME value`
//! pairs.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::broadcast;
use tracing::debug;

use ferriq_common::clock::now_ms;
use ferriq_common::{QueueError, Response, Signal};
use ferriq_queue::{Command, ConfigPatch, PQueue, QueueManager, ServiceType};

use crate::proto::{self, Token};

/// Greeting sent to every new connection.
const GREETING: &str = "FERRIQ-0.1";

enum Outcome {
    Reply(Result<Response, QueueError>),
    Quit,
}

/// One client connection's state: the manager handle and the optional
/// queue context.
pub struct Session {
    manager: Arc<QueueManager>,
    ctx: Option<Arc<PQueue>>,
}

impl Session {
    pub const fn new(manager: Arc<QueueManager>) -> Self {
        Self { manager, ctx: None }
    }

    /// Drive the session until the peer quits, the transport fails, or
    /// the process shuts down.
    ///
    /// # Errors
    /// On transport failures or protocol framing violations.
    pub async fn run<R, W>(
        mut self,
        reader: R,
        writer: W,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut writer = BufWriter::new(writer);

        proto::write_outcome(&mut writer, &Ok(Response::Str(GREETING.to_string()))).await?;
        writer.flush().await?;

        loop {
            tokio::select! {
                line = proto::read_tokens(&mut reader) => {
                    let Some(tokens) = line? else { break };
                    if tokens.is_empty() {
                        continue;
                    }
                    match self.dispatch(tokens).await {
                        Outcome::Reply(outcome) => {
                            if let Err(ref error) = outcome {
                                debug!(code = error.code(), error = %error, "command failed");
                            }
                            proto::write_outcome(&mut writer, &outcome).await?;
                            writer.flush().await?;
                        }
                        Outcome::Quit => {
                            proto::write_outcome(&mut writer, &Ok(Response::Ok)).await?;
                            writer.flush().await?;
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    writer.write_all(b"-ERR 500 server is shutting down\n").await?;
                    writer.flush().await?;
                    break;
                }
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, tokens: Vec<Token>) -> Outcome {
        let Some(head) = tokens[0].as_text() else {
            return Outcome::Reply(Err(QueueError::invalid("command must be a text token")));
        };
        let command = head.to_ascii_uppercase();
        let rest = &tokens[1..];

        match command.as_str() {
            "PING" => Outcome::Reply(no_params(rest).map(|()| Response::Pong)),
            "TS" => Outcome::Reply(no_params(rest).map(|()| Response::Int(now_ms()))),
            "QUIT" => match no_params(rest) {
                Ok(()) => Outcome::Quit,
                Err(e) => Outcome::Reply(Err(e)),
            },
            "CRT" => Outcome::Reply(self.create_queue(rest)),
            "DROP" => Outcome::Reply(self.drop_queue(rest)),
            "DISABLE" => Outcome::Reply(self.disable_queue(rest)),
            "ENABLE" => Outcome::Reply(self.enable_queue(rest)),
            "LIST" => Outcome::Reply(self.list_queues(rest)),
            "CTX" => Outcome::Reply(self.set_context(rest)),
            _ => match self.ctx.clone() {
                Some(queue) => match parse_queue_command(&command, rest) {
                    Ok(cmd) => Outcome::Reply(queue.execute(cmd).await),
                    Err(e) => Outcome::Reply(Err(e)),
                },
                None => Outcome::Reply(Err(QueueError::invalid(format!(
                    "unknown command: {command}"
                )))),
            },
        }
    }

    fn create_queue(&self, tokens: &[Token]) -> Result<Response, QueueError> {
        let (name, rest) = tokens
            .split_first()
            .ok_or_else(|| QueueError::invalid("queue name must be provided"))?;
        let name = name
            .as_text()
            .ok_or_else(|| QueueError::invalid("queue name must be a text token"))?;
        let patch = parse_config_patch(rest)?;
        self.manager
            .create_queue(name, ServiceType::PriorityQueue, patch)?;
        Ok(Response::Ok)
    }

    fn drop_queue(&mut self, tokens: &[Token]) -> Result<Response, QueueError> {
        let name = single_name(tokens, "DROP")?;
        // A dropped queue must not linger as this session's context.
        if self.ctx.as_ref().is_some_and(|q| q.name() == name) {
            self.ctx = None;
        }
        self.manager.drop_queue(name)?;
        Ok(Response::Ok)
    }

    fn disable_queue(&mut self, tokens: &[Token]) -> Result<Response, QueueError> {
        let name = single_name(tokens, "DISABLE")?;
        if self.ctx.as_ref().is_some_and(|q| q.name() == name) {
            self.ctx = None;
        }
        self.manager.disable_queue(name)?;
        Ok(Response::Ok)
    }

    fn enable_queue(&self, tokens: &[Token]) -> Result<Response, QueueError> {
        let name = single_name(tokens, "ENABLE")?;
        self.manager.enable_queue(name)?;
        Ok(Response::Ok)
    }

    fn list_queues(&self, tokens: &[Token]) -> Result<Response, QueueError> {
        let prefix = match tokens {
            [] => None,
            [prefix] => Some(
                prefix
                    .as_text()
                    .ok_or_else(|| QueueError::invalid("LIST prefix must be a text token"))?,
            ),
            _ => return Err(QueueError::invalid("LIST accepts a name prefix only")),
        };
        Ok(Response::Names(self.manager.list(prefix, None)))
    }

    fn set_context(&mut self, tokens: &[Token]) -> Result<Response, QueueError> {
        let name = single_name(tokens, "CTX")?;
        let queue = self
            .manager
            .queue(name)
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))?;
        self.ctx = Some(queue);
        Ok(Response::Ok)
    }
}

fn no_params(tokens: &[Token]) -> Result<(), QueueError> {
    if tokens.is_empty() {
        Ok(())
    } else {
        Err(QueueError::invalid("command does not accept any parameters"))
    }
}

fn single_name<'a>(tokens: &'a [Token], command: &str) -> Result<&'a str, QueueError> {
    let [name] = tokens else {
        return Err(QueueError::invalid(format!(
            "{command} accepts a queue name only"
        )));
    };
    name.as_text()
        .ok_or_else(|| QueueError::invalid("queue name must be a text token"))
}

fn unknown_param(name: &str) -> QueueError {
    QueueError::invalid(format!("unknown parameter: {name}"))
}

/// Pairwise parameter reader over a token slice.
struct Cursor<'a> {
    tokens: &'a [Token],
    at: usize,
}

impl<'a> Cursor<'a> {
    const fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, at: 0 }
    }

    /// Next parameter name, uppercased; `None` at the end of the line.
    fn next_name(&mut self) -> Result<Option<String>, QueueError> {
        let Some(token) = self.tokens.get(self.at) else {
            return Ok(None);
        };
        self.at += 1;
        token.as_text().map_or_else(
            || Err(QueueError::invalid("parameter name must be a text token")),
            |text| Ok(Some(text.to_ascii_uppercase())),
        )
    }

    fn take_value(&mut self, name: &str) -> Result<&'a Token, QueueError> {
        let token = self
            .tokens
            .get(self.at)
            .ok_or_else(|| QueueError::invalid(format!("parameter {name} is missing a value")))?;
        self.at += 1;
        Ok(token)
    }

    fn take_text(&mut self, name: &str) -> Result<String, QueueError> {
        self.take_value(name)?.as_text().map_or_else(
            || Err(QueueError::invalid(format!("parameter {name} must be text"))),
            |text| Ok(text.to_string()),
        )
    }

    fn take_bytes(&mut self, name: &str) -> Result<Vec<u8>, QueueError> {
        Ok(self.take_value(name)?.as_bytes().to_vec())
    }

    fn take_i64(&mut self, name: &str) -> Result<i64, QueueError> {
        let text = self.take_text(name)?;
        text.parse().map_err(|_| {
            QueueError::invalid(format!("parameter {name} must be a 64-bit integer"))
        })
    }
}

fn parse_config_patch(tokens: &[Token]) -> Result<ConfigPatch, QueueError> {
    let mut patch = ConfigPatch::default();
    let mut cursor = Cursor::new(tokens);
    while let Some(name) = cursor.next_name()? {
        match name.as_str() {
            "TTL" => patch.msg_ttl = Some(cursor.take_i64("TTL")?),
            "MAXSIZE" => patch.max_size = Some(cursor.take_i64("MAXSIZE")?),
            "DELAY" => patch.delivery_delay = Some(cursor.take_i64("DELAY")?),
            "POPLIMIT" => patch.pop_count_limit = Some(cursor.take_i64("POPLIMIT")?),
            "TIMEOUT" => patch.pop_lock_timeout = Some(cursor.take_i64("TIMEOUT")?),
            other => return Err(unknown_param(other)),
        }
    }
    Ok(patch)
}

fn required_id(id: Option<String>) -> Result<String, QueueError> {
    id.ok_or_else(|| QueueError::invalid("message ID is not defined"))
}

fn required_receipt(receipt: Option<String>) -> Result<String, QueueError> {
    receipt.ok_or_else(|| QueueError::invalid("receipt is not defined"))
}

fn required_timeout(timeout: Option<i64>) -> Result<i64, QueueError> {
    timeout.ok_or_else(|| QueueError::invalid("message timeout is not defined"))
}

/// Parse one id-only parameter list (`ID <id>`).
fn parse_id_only(tokens: &[Token]) -> Result<String, QueueError> {
    let mut id = None;
    let mut cursor = Cursor::new(tokens);
    while let Some(name) = cursor.next_name()? {
        match name.as_str() {
            "ID" => id = Some(cursor.take_text("ID")?),
            other => return Err(unknown_param(other)),
        }
    }
    required_id(id)
}

fn parse_receipt_only(tokens: &[Token]) -> Result<String, QueueError> {
    let mut receipt = None;
    let mut cursor = Cursor::new(tokens);
    while let Some(name) = cursor.next_name()? {
        match name.as_str() {
            "RCPT" => receipt = Some(cursor.take_text("RCPT")?),
            other => return Err(unknown_param(other)),
        }
    }
    required_receipt(receipt)
}

fn parse_pop(tokens: &[Token], lock: bool) -> Result<Command, QueueError> {
    let mut limit = 1;
    let mut wait = 0;
    let mut lock_timeout = None;
    let mut cursor = Cursor::new(tokens);
    while let Some(name) = cursor.next_name()? {
        match name.as_str() {
            "LIMIT" => limit = cursor.take_i64("LIMIT")?,
            "WAIT" => wait = cursor.take_i64("WAIT")?,
            "TIMEOUT" => lock_timeout = Some(cursor.take_i64("TIMEOUT")?),
            other => return Err(unknown_param(other)),
        }
    }
    Ok(Command::Pop {
        limit,
        wait,
        lock_timeout,
        lock,
    })
}

fn parse_push(tokens: &[Token]) -> Result<Command, QueueError> {
    let mut id = None;
    let mut payload = None;
    let mut ttl = None;
    let mut delay = None;
    let mut priority = None;
    let mut cursor = Cursor::new(tokens);
    while let Some(name) = cursor.next_name()? {
        match name.as_str() {
            "ID" => id = Some(cursor.take_text("ID")?),
            "PL" => payload = Some(cursor.take_bytes("PL")?),
            "TTL" => ttl = Some(cursor.take_i64("TTL")?),
            "DELAY" => delay = Some(cursor.take_i64("DELAY")?),
            "PRIORITY" => priority = Some(cursor.take_i64("PRIORITY")?),
            other => return Err(unknown_param(other)),
        }
    }
    Ok(Command::Push {
        id,
        payload: payload.unwrap_or_default(),
        ttl,
        delay,
        priority,
    })
}

fn parse_update_lock(tokens: &[Token]) -> Result<Command, QueueError> {
    let mut id = None;
    let mut timeout = None;
    let mut cursor = Cursor::new(tokens);
    while let Some(name) = cursor.next_name()? {
        match name.as_str() {
            "ID" => id = Some(cursor.take_text("ID")?),
            "TIMEOUT" => timeout = Some(cursor.take_i64("TIMEOUT")?),
            other => return Err(unknown_param(other)),
        }
    }
    Ok(Command::UpdateLock {
        id: required_id(id)?,
        timeout: required_timeout(timeout)?,
    })
}

fn parse_update_lock_by_receipt(tokens: &[Token]) -> Result<Command, QueueError> {
    let mut receipt = None;
    let mut timeout = None;
    let mut cursor = Cursor::new(tokens);
    while let Some(name) = cursor.next_name()? {
        match name.as_str() {
            "RCPT" => receipt = Some(cursor.take_text("RCPT")?),
            "TIMEOUT" => timeout = Some(cursor.take_i64("TIMEOUT")?),
            other => return Err(unknown_param(other)),
        }
    }
    Ok(Command::UpdateLockByReceipt {
        receipt: required_receipt(receipt)?,
        timeout: required_timeout(timeout)?,
    })
}

fn parse_queue_command(command: &str, tokens: &[Token]) -> Result<Command, QueueError> {
    match command {
        "PUSH" => parse_push(tokens),
        "POP" => parse_pop(tokens, false),
        "POPLCK" => parse_pop(tokens, true),
        "DEL" => Ok(Command::Delete {
            id: parse_id_only(tokens)?,
        }),
        "DELLCK" => Ok(Command::DeleteLocked {
            id: parse_id_only(tokens)?,
        }),
        "UNLCK" => Ok(Command::Unlock {
            id: parse_id_only(tokens)?,
        }),
        "UPDLCK" => parse_update_lock(tokens),
        "DELRCPT" => Ok(Command::DeleteByReceipt {
            receipt: parse_receipt_only(tokens)?,
        }),
        "UNLCKRCPT" => Ok(Command::UnlockByReceipt {
            receipt: parse_receipt_only(tokens)?,
        }),
        "UPDLCKRCPT" => parse_update_lock_by_receipt(tokens),
        "MSGINFO" => Ok(Command::MessageInfo {
            id: parse_id_only(tokens)?,
        }),
        "STATUS" => no_params(tokens).map(|()| Command::Status),
        "SETCFG" => Ok(Command::SetConfig(parse_config_patch(tokens)?)),
        "CLEAR" => no_params(tokens).map(|()| Command::Clear),
        other => Err(QueueError::invalid(format!("unknown command: {other}"))),
    }
}
