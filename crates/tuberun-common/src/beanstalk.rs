// BeanstalkClient: async client for the beanstalkd text protocol.
//
// Wire protocol (one request, one response, CRLF-terminated lines):
//   use <tube>                          -> USING <tube>
//   watch <tube> / ignore <tube>        -> WATCHING <count> | NOT_IGNORED
//   put <pri> <delay> <ttr> <bytes>     -> INSERTED <id> | BURIED <id> | ...
//   <body>
//   reserve-with-timeout <seconds>      -> RESERVED <id> <bytes> + <body> | TIMED_OUT | DEADLINE_SOON
//   delete <id>                         -> DELETED | NOT_FOUND
//   bury <id> <pri>                     -> BURIED | NOT_FOUND

use crate::constants;
use crate::job_queue::{JobQueue, PutOptions, QueueError, ReservedJob};

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Longest tube name the server accepts.
const MAX_TUBE_NAME_LEN: usize = 200;

/// A single connection to a beanstalkd server.
pub struct BeanstalkClient {
    address: String,
    stream: BufReader<TcpStream>,
    using: String,
    watching: Vec<String>,
}

impl BeanstalkClient {
    /// Connect to `address` (`host:port`). The connection starts out using and
    /// watching the `default` tube.
    pub async fn connect(address: &str) -> Result<Self, QueueError> {
        let stream = TcpStream::connect(address).await?;
        Ok(Self {
            address: address.to_string(),
            stream: BufReader::new(stream),
            using: constants::queue::DEFAULT_TUBE.to_string(),
            watching: vec![constants::queue::DEFAULT_TUBE.to_string()],
        })
    }

    /// Connect and bind the connection to a single tube, both for `put` and
    /// for `reserve`.
    pub async fn open_tube(address: &str, tube: &str) -> Result<Self, QueueError> {
        let mut client = Self::connect(address).await?;
        client.use_tube(tube).await?;
        client.watch_only(tube).await?;
        Ok(client)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// The tube `put` writes to.
    pub fn using(&self) -> &str {
        &self.using
    }

    /// The tubes `reserve` pulls from.
    pub fn watching(&self) -> &[String] {
        &self.watching
    }

    /// Select the tube subsequent `put` commands write to.
    pub async fn use_tube(&mut self, tube: &str) -> Result<(), QueueError> {
        validate_tube_name(tube)?;
        let line = self.round_trip(&format!("use {tube}"), None).await?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["USING", name] if *name == tube => {
                self.using = tube.to_string();
                Ok(())
            }
            _ => Err(response_error(&line)),
        }
    }

    /// Add a tube to the watch list. Returns the number of watched tubes.
    pub async fn watch(&mut self, tube: &str) -> Result<usize, QueueError> {
        validate_tube_name(tube)?;
        let count = self.expect_watching(&format!("watch {tube}")).await?;
        if !self.watching.iter().any(|t| t == tube) {
            self.watching.push(tube.to_string());
        }
        Ok(count)
    }

    /// Remove a tube from the watch list. Returns the number of watched tubes.
    pub async fn ignore(&mut self, tube: &str) -> Result<usize, QueueError> {
        validate_tube_name(tube)?;
        let count = self.expect_watching(&format!("ignore {tube}")).await?;
        self.watching.retain(|t| t != tube);
        Ok(count)
    }

    /// Watch `tube` and nothing else.
    pub async fn watch_only(&mut self, tube: &str) -> Result<(), QueueError> {
        self.watch(tube).await?;
        let others: Vec<String> = self
            .watching
            .iter()
            .filter(|t| t.as_str() != tube)
            .cloned()
            .collect();
        for other in others {
            self.ignore(&other).await?;
        }
        Ok(())
    }

    async fn expect_watching(&mut self, command: &str) -> Result<usize, QueueError> {
        let line = self.round_trip(command, None).await?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["WATCHING", count] => parse_number(count, &line),
            ["NOT_IGNORED"] => Err(QueueError::Server(
                "cannot ignore the only watched tube".to_string(),
            )),
            _ => Err(response_error(&line)),
        }
    }

    // -----------------------------------------------------------------------
    // Framing
    // -----------------------------------------------------------------------

    async fn round_trip(&mut self, command: &str, body: Option<&[u8]>) -> Result<String, QueueError> {
        let stream = self.stream.get_mut();
        stream.write_all(command.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        if let Some(body) = body {
            stream.write_all(body).await?;
            stream.write_all(b"\r\n").await?;
        }
        stream.flush().await?;

        self.read_line().await
    }

    async fn read_line(&mut self) -> Result<String, QueueError> {
        let mut buf = Vec::new();
        let read = self.stream.read_until(b'\n', &mut buf).await?;
        if read == 0 {
            return Err(QueueError::ConnectionClosed);
        }
        Ok(String::from_utf8_lossy(&buf)
            .trim_end_matches(|c| c == '\r' || c == '\n')
            .to_string())
    }

    async fn read_body(&mut self, len: usize) -> Result<Vec<u8>, QueueError> {
        let mut body = vec![0u8; len + 2];
        match self.stream.read_exact(&mut body).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(QueueError::ConnectionClosed)
            }
            Err(e) => return Err(e.into()),
        }
        if !body.ends_with(b"\r\n") {
            return Err(QueueError::UnexpectedResponse(
                "job body not terminated by CRLF".to_string(),
            ));
        }
        body.truncate(len);
        Ok(body)
    }

    /// Read past a body without keeping it, so the next response lines up.
    async fn skip_body(&mut self, len: usize) -> Result<(), QueueError> {
        let expected = (len as u64).saturating_add(2);
        let skipped =
            tokio::io::copy(&mut (&mut self.stream).take(expected), &mut tokio::io::sink()).await?;
        if skipped < expected {
            return Err(QueueError::ConnectionClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for BeanstalkClient {
    async fn reserve(&mut self, timeout: Duration) -> Result<Option<ReservedJob>, QueueError> {
        let line = self
            .round_trip(&format!("reserve-with-timeout {}", timeout.as_secs()), None)
            .await?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["RESERVED", id, len] => {
                let id = parse_number(id, &line)?;
                let len: usize = parse_number(len, &line)?;
                if len > constants::queue::MAX_JOB_SIZE {
                    self.skip_body(len).await?;
                    return Err(QueueError::OversizedJob { id, len });
                }
                let body = self.read_body(len).await?;
                Ok(Some(ReservedJob { id, body }))
            }
            // DEADLINE_SOON only warns that one of our reservations is about
            // to expire; there is still nothing new to hand out.
            ["TIMED_OUT"] | ["DEADLINE_SOON"] => Ok(None),
            _ => Err(response_error(&line)),
        }
    }

    async fn delete(&mut self, id: u64) -> Result<(), QueueError> {
        let line = self.round_trip(&format!("delete {id}"), None).await?;
        match line.as_str() {
            "DELETED" => Ok(()),
            "NOT_FOUND" => Err(QueueError::NotFound(id)),
            _ => Err(response_error(&line)),
        }
    }

    async fn bury(&mut self, id: u64) -> Result<(), QueueError> {
        let line = self
            .round_trip(&format!("bury {id} {}", constants::queue::BURY_PRIORITY), None)
            .await?;
        match line.as_str() {
            "BURIED" => Ok(()),
            "NOT_FOUND" => Err(QueueError::NotFound(id)),
            _ => Err(response_error(&line)),
        }
    }

    async fn put(&mut self, body: &[u8], options: PutOptions) -> Result<u64, QueueError> {
        // The server bumps a zero time-to-run to one second anyway.
        let ttr = options.ttr.as_secs().max(1);
        let command = format!(
            "put {} {} {} {}",
            options.priority,
            options.delay.as_secs(),
            ttr,
            body.len()
        );
        let line = self.round_trip(&command, Some(body)).await?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["INSERTED", id] => parse_number(id, &line),
            ["BURIED", id] => Err(QueueError::BuriedOnPut(parse_number(id, &line)?)),
            _ => Err(response_error(&line)),
        }
    }
}

fn response_error(line: &str) -> QueueError {
    match line {
        "JOB_TOO_BIG" => QueueError::JobTooBig,
        "DRAINING" => QueueError::Draining,
        "OUT_OF_MEMORY" | "INTERNAL_ERROR" | "BAD_FORMAT" | "UNKNOWN_COMMAND"
        | "EXPECTED_CRLF" => QueueError::Server(line.to_string()),
        _ => QueueError::UnexpectedResponse(line.to_string()),
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, line: &str) -> Result<T, QueueError> {
    value
        .parse()
        .map_err(|_| QueueError::UnexpectedResponse(line.to_string()))
}

/// Tube names are 1..=200 bytes of `[A-Za-z0-9+/;.$_()-]` and may not start
/// with a hyphen.
pub fn validate_tube_name(name: &str) -> Result<(), QueueError> {
    let valid_char = |c: char| c.is_ascii_alphanumeric() || "+/;.$_()-".contains(c);
    if name.is_empty()
        || name.len() > MAX_TUBE_NAME_LEN
        || name.starts_with('-')
        || !name.chars().all(valid_char)
    {
        return Err(QueueError::InvalidTubeName(name.to_string()));
    }
    Ok(())
}
