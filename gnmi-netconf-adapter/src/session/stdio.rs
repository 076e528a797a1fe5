//! NETCONF 1.0 over a byte stream.
//!
//! Messages are delimited by `]]>]]>`. The transport (usually an
//! `ssh -s <host> netconf` subprocess) is responsible for dialing and
//! authentication.

use std::future::Future;
use std::process::Stdio;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::{Datastore, NetconfOps, SessionError};

const DELIMITER: &[u8] = b"]]>]]>";
const BASE_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
const BASE_CAPABILITY: &str = "urn:ietf:params:netconf:base:1.0";

/// A NETCONF session over any reader/writer pair.
pub struct StdioSession<R, W> {
    reader: R,
    writer: W,
    buffer: Vec<u8>,
    /// Prefix of `buffer` already searched for a delimiter.
    scanned: usize,
    message_id: u64,
    session_id: Option<String>,
    child: Option<Child>,
}

impl StdioSession<ChildStdout, ChildStdin> {
    /// Spawn `command` and speak NETCONF over its stdin/stdout.
    pub async fn spawn(command: &[String]) -> Result<Self, SessionError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| SessionError::Other("empty NETCONF transport command".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::Other("transport stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::Other("transport stdout unavailable".to_string()))?;

        let mut session = Self::connect(stdout, stdin).await?;
        session.child = Some(child);
        Ok(session)
    }

    /// OS process id of the transport subprocess, while it is running.
    pub fn process_id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }
}

impl<R, W> StdioSession<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Exchange `<hello>` messages on an established stream.
    pub async fn connect(reader: R, writer: W) -> Result<Self, SessionError> {
        let mut session = Self {
            reader,
            writer,
            buffer: Vec::new(),
            scanned: 0,
            message_id: 0,
            session_id: None,
            child: None,
        };

        let hello = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <hello xmlns=\"{BASE_NS}\"><capabilities>\
             <capability>{BASE_CAPABILITY}</capability>\
             </capabilities></hello>"
        );
        session.send(&hello).await?;

        let server_hello = session.receive().await?;
        let summary = summarize(&server_hello)?;
        if !summary.is_hello {
            return Err(SessionError::Framing(
                "expected <hello> from the device".to_string(),
            ));
        }
        if !summary
            .capabilities
            .iter()
            .any(|c| c == BASE_CAPABILITY)
        {
            warn!("device does not advertise {}", BASE_CAPABILITY);
        }
        session.session_id = summary.session_id;
        info!(session_id = ?session.session_id, "NETCONF session established");
        Ok(session)
    }

    /// Session id assigned by the device in its `<hello>`.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    async fn send(&mut self, message: &str) -> Result<(), SessionError> {
        self.writer.write_all(message.as_bytes()).await?;
        self.writer.write_all(DELIMITER).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<String, SessionError> {
        loop {
            if let Some(message) = take_message(&mut self.buffer, &mut self.scanned) {
                return String::from_utf8(message)
                    .map_err(|e| SessionError::Framing(format!("message is not UTF-8: {}", e)));
            }
            let mut chunk = [0u8; 8192];
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                return Err(SessionError::Closed);
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Send one `<rpc>` and return the `<data>` contents of its reply.
    ///
    /// A caller dropped after sending leaves its reply in the stream; replies
    /// carrying an older `message-id` are skipped. Replies without one are
    /// taken as the answer.
    async fn rpc(&mut self, operation: &str) -> Result<String, SessionError> {
        self.message_id += 1;
        let message_id = self.message_id;
        let request = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <rpc message-id=\"{message_id}\" xmlns=\"{BASE_NS}\">{operation}</rpc>"
        );
        debug!(message_id, "sending NETCONF rpc");
        self.send(&request).await?;

        loop {
            let reply = self.receive().await?;
            let summary = summarize(&reply)?;
            match summary.message_id {
                Some(id) if id < message_id => {
                    warn!(
                        message_id = id,
                        expected = message_id,
                        "discarding reply to an abandoned rpc"
                    );
                }
                Some(id) if id > message_id => {
                    return Err(SessionError::Framing(format!(
                        "reply for message-id {} while waiting for {}",
                        id, message_id
                    )));
                }
                _ => {
                    if let Some(error) = summary.error {
                        return Err(SessionError::Rpc(error));
                    }
                    return Ok(summary.data);
                }
            }
        }
    }

    async fn get_config(
        &mut self,
        filter: Option<&str>,
        source: Datastore,
    ) -> Result<String, SessionError> {
        let filter = filter
            .map(|f| format!("<filter type=\"subtree\">{}</filter>", f))
            .unwrap_or_default();
        self.rpc(&format!(
            "<get-config><source><{source}/></source>{filter}</get-config>"
        ))
        .await
    }

    async fn edit(&mut self, target: Datastore, config: &str) -> Result<(), SessionError> {
        self.rpc(&format!(
            "<edit-config><target><{target}/></target>\
             <default-operation>merge</default-operation>\
             <error-option>rollback-on-error</error-option>\
             <config>{config}</config></edit-config>"
        ))
        .await
        .map(|_| ())
    }
}

impl<R, W> NetconfOps for StdioSession<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn get_config_subtree(
        &mut self,
        filter: Option<&str>,
        source: Datastore,
    ) -> impl Future<Output = Result<String, SessionError>> + Send {
        self.get_config(filter, source)
    }

    fn edit_config(
        &mut self,
        target: Datastore,
        config: &str,
    ) -> impl Future<Output = Result<(), SessionError>> + Send {
        self.edit(target, config)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Split the first delimited message off the front of `buffer`.
///
/// The search resumes at `scanned`, so bytes already examined by an earlier
/// call are not searched again; only the tail that could hold the start of a
/// split delimiter is revisited.
fn take_message(buffer: &mut Vec<u8>, scanned: &mut usize) -> Option<Vec<u8>> {
    let start = (*scanned).min(buffer.len());
    match find(&buffer[start..], DELIMITER) {
        Some(pos) => {
            let end = start + pos;
            let message = buffer.drain(..end).collect();
            buffer.drain(..DELIMITER.len());
            *scanned = 0;
            Some(message)
        }
        None => {
            *scanned = buffer.len().saturating_sub(DELIMITER.len() - 1);
            None
        }
    }
}

fn reply_message_id(start: &BytesStart<'_>) -> Option<u64> {
    let attr = start.try_get_attribute("message-id").ok().flatten()?;
    std::str::from_utf8(&attr.value).ok()?.trim().parse().ok()
}

#[derive(Debug, Default)]
struct Summary {
    is_hello: bool,
    /// `message-id` of an `<rpc-reply>`.
    message_id: Option<u64>,
    session_id: Option<String>,
    capabilities: Vec<String>,
    /// Raw contents of `<rpc-reply><data>`.
    data: String,
    error: Option<String>,
}

/// Pull the parts of a hello or rpc-reply the session cares about.
fn summarize(message: &str) -> Result<Summary, SessionError> {
    let mut reader = Reader::from_str(message);
    let mut summary = Summary::default();
    let mut stack: Vec<String> = Vec::new();
    let mut data_start = None;
    let mut errors: Vec<String> = Vec::new();
    let mut in_error = false;
    let mut severity_warning = false;
    let mut error_text: Option<String> = None;

    loop {
        let before = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| SessionError::Framing(format!("malformed reply: {}", e)))?;
        match event {
            Event::Start(start) => {
                let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                if stack.is_empty() && name == "hello" {
                    summary.is_hello = true;
                }
                if stack.is_empty() && name == "rpc-reply" {
                    summary.message_id = reply_message_id(&start);
                }
                if stack.len() == 1 && name == "data" {
                    data_start = Some(reader.buffer_position() as usize);
                }
                if name == "rpc-error" {
                    in_error = true;
                    severity_warning = false;
                    error_text = None;
                }
                stack.push(name);
            }
            Event::Empty(start) => {
                let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                if stack.is_empty() && name == "hello" {
                    summary.is_hello = true;
                }
                if stack.is_empty() && name == "rpc-reply" {
                    summary.message_id = reply_message_id(&start);
                }
            }
            Event::End(_) => {
                let name = stack.pop().unwrap_or_default();
                if stack.len() == 1 && name == "data" {
                    if let Some(start) = data_start.take() {
                        summary.data = message[start..before].to_string();
                    }
                }
                if name == "rpc-error" {
                    in_error = false;
                    if !severity_warning {
                        errors.push(
                            error_text
                                .take()
                                .unwrap_or_else(|| "unspecified rpc-error".to_string()),
                        );
                    }
                }
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| SessionError::Framing(format!("malformed reply: {}", e)))?;
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                match stack.last().map(String::as_str) {
                    Some("session-id") => summary.session_id = Some(text.to_string()),
                    Some("capability") => summary.capabilities.push(text.to_string()),
                    Some("error-severity") if in_error => severity_warning = text == "warning",
                    Some("error-message") if in_error => error_text = Some(text.to_string()),
                    Some("error-tag") if in_error && error_text.is_none() => {
                        error_text = Some(text.to_string())
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !errors.is_empty() {
        summary.error = Some(errors.join("; "));
    }
    Ok(summary)
}
