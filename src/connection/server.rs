// Server-role connection flow: handshake, `connect`, optional Adobe FME
// auth challenge/response, then read commands until `play` or `publish`.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::amf::AMF0Value;
use crate::config::CoreConfig;
use crate::error::{Result, RtmpError};
use crate::handshake::{do_server_handshake, Rc4Stream};
use crate::log::Logger;
use crate::message::{Command, Message, PeerBandwidthLimitType, UserControlEvent};
use crate::raw_message::RawMessageIo;
use crate::util::ByteCounter;

use super::auth::{
    auth_failed_error, format_need_auth_description, generate_hex_challenge, parse_auth_query, verify_response,
    AUTH_FAILED_DESCRIPTION, NEED_AUTH_PREFIX,
};
use super::url::{resolve_app_and_stream_key, strip_leading_quote};
use super::{Connection, RtmpUrl, CHUNK_STREAM_ID_COMMAND, CHUNK_STREAM_ID_PROTOCOL};

const FMS_VER: &str = "LNX 9,0,124,2";

/// A `connect` command's parsed `app`/`tcUrl`, with any `?authmod=adobe...`
/// suffix split off.
struct ConnectAttempt {
    transaction_id: f64,
    app: String,
    tc_url: String,
    auth_query: Option<String>,
    object_encoding: f64,
}

fn split_query(raw: &str) -> (String, Option<String>) {
    match raw.split_once('?') {
        Some((base, query)) => (base.to_string(), Some(query.to_string())),
        None => (raw.to_string(), None),
    }
}

/// Server-role connection: drives the inbound handshake and command
/// exchange described for accepting either a `play` or `publish` session.
pub struct ServerConn<S> {
    stream: ByteCounter<Rc4Stream<S>>,
    io: RawMessageIo,
    logger: Logger,
    config: CoreConfig,
    attempt: ConnectAttempt,
}

impl<S> ServerConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Performs the handshake and reads the client's first `connect`
    /// command, without yet deciding whether authentication is required.
    pub async fn initialize(mut stream: S, config: &CoreConfig, logger: Logger) -> Result<ServerConn<S>> {
        let handshake_result = do_server_handshake(&mut stream, &logger).await?;
        let stream = Rc4Stream::new(stream, handshake_result.keys);

        let mut stream = ByteCounter::new(stream);
        let mut io = RawMessageIo::new(config.chunk_size, config.max_body_size);
        io.set_write_ack_window(config.window_ack_size);

        let attempt = Self::read_connect(&mut stream, &mut io, &logger).await?;

        Ok(ServerConn { stream, io, logger, config: config.clone(), attempt })
    }

    async fn read_connect(stream: &mut ByteCounter<Rc4Stream<S>>, io: &mut RawMessageIo, logger: &Logger) -> Result<ConnectAttempt> {
        loop {
            let raw = io.read_message(stream, logger).await?;
            let msg = Message::from_raw(&raw)?;
            match msg {
                Message::CommandAmf0(cmd) if cmd.name == "connect" => {
                    let args = cmd.arguments.first().cloned().unwrap_or(AMF0Value::Null);

                    let raw_app = args.get_string_prop("app").to_string();
                    let raw_tc_url = {
                        let v = args.get("tcUrl").or_else(|| args.get("tcurl"));
                        v.map(|v| v.get_string().to_string()).unwrap_or_default()
                    };

                    let (app, auth_query) = split_query(&raw_app);
                    let (tc_url, tc_query) = split_query(strip_leading_quote(&raw_tc_url));

                    return Ok(ConnectAttempt {
                        transaction_id: cmd.transaction_id,
                        app,
                        tc_url,
                        auth_query: auth_query.or(tc_query),
                        object_encoding: args.get_f64_prop("objectEncoding"),
                    });
                }
                other => {
                    return Err(RtmpError::UnexpectedCommand {
                        name: format!("{:?}", other),
                        transaction_id: 0.0,
                    })
                }
            }
        }
    }

    /// The `app` name negotiated by the (possibly still unauthenticated)
    /// `connect` command, for the host to decide whether auth is required.
    pub fn app(&self) -> &str {
        &self.attempt.app
    }

    pub fn tc_url(&self) -> &str {
        &self.attempt.tc_url
    }

    /// Runs the Adobe FME challenge/response exchange (§4.7) against a
    /// single fixed `user`/`pass` pair, rejecting the connection on
    /// mismatch. Drives as many additional `connect` round-trips as the
    /// protocol requires before returning.
    pub async fn check_credentials(&mut self, user: &str, pass: &str) -> Result<()> {
        // First connect carries no auth query at all: reject with the
        // standard prefix and wait for the client's second attempt.
        self.send_error(NEED_AUTH_PREFIX.to_string()).await?;
        self.attempt = Self::read_connect(&mut self.stream, &mut self.io, &self.logger).await?;

        let second_query = self.attempt.auth_query.clone().unwrap_or_default();
        let client_user = parse_auth_query(&second_query).user.unwrap_or_default();

        if client_user != user {
            self.send_error(AUTH_FAILED_DESCRIPTION.to_string()).await?;
            return auth_failed_error();
        }

        let salt = generate_hex_challenge();
        let challenge = generate_hex_challenge();
        self.send_error(format_need_auth_description(&client_user, &salt, &challenge)).await?;

        self.attempt = Self::read_connect(&mut self.stream, &mut self.io, &self.logger).await?;

        let third_query = self.attempt.auth_query.clone().unwrap_or_default();
        let parsed = parse_auth_query(&third_query);
        let client_challenge = parsed.challenge.unwrap_or_default();
        let response = parsed.response.unwrap_or_default();

        if verify_response(user, pass, &salt, &challenge, &client_challenge, &response) {
            Ok(())
        } else {
            self.send_error(AUTH_FAILED_DESCRIPTION.to_string()).await?;
            auth_failed_error()
        }
    }

    async fn send_error(&mut self, description: String) -> Result<()> {
        let cmd = Command::new(
            "_error",
            self.attempt.transaction_id,
            vec![
                AMF0Value::Null,
                AMF0Value::Object(vec![
                    ("level".to_string(), AMF0Value::str("error")),
                    ("code".to_string(), AMF0Value::str("NetConnection.Connect.Rejected")),
                    ("description".to_string(), AMF0Value::str(description)),
                ]),
            ],
        );
        let raw = Message::CommandAmf0(cmd).to_raw(CHUNK_STREAM_ID_COMMAND, 0, 0);
        self.io.write_message(&mut self.stream, &raw, &self.logger).await
    }

    /// Completes the server-side flow: sends the control-message burst and
    /// `_result`, then reads commands until a `play` or `publish` arrives,
    /// yielding a fully negotiated [`Connection`].
    pub async fn accept(mut self) -> Result<Connection<Rc4Stream<S>>> {
        let protocol_burst = [
            Message::SetWindowAckSize(self.config.window_ack_size),
            Message::SetPeerBandwidth { size: self.config.peer_bandwidth, limit_type: PeerBandwidthLimitType::Dynamic },
            Message::SetChunkSize(self.config.chunk_size as u32),
        ];
        for msg in &protocol_burst {
            let raw = msg.to_raw(CHUNK_STREAM_ID_PROTOCOL, 0, 0);
            self.io.write_message(&mut self.stream, &raw, &self.logger).await?;
        }

        let result = Command::new(
            "_result",
            self.attempt.transaction_id,
            vec![
                AMF0Value::Object(vec![
                    ("fmsVer".to_string(), AMF0Value::str(FMS_VER)),
                    ("capabilities".to_string(), AMF0Value::num(31.0)),
                ]),
                AMF0Value::Object(vec![
                    ("level".to_string(), AMF0Value::str("status")),
                    ("code".to_string(), AMF0Value::str("NetConnection.Connect.Success")),
                    ("description".to_string(), AMF0Value::str("Connection succeeded.")),
                    ("objectEncoding".to_string(), AMF0Value::num(self.attempt.object_encoding)),
                ]),
            ],
        );
        let raw = Message::CommandAmf0(result).to_raw(CHUNK_STREAM_ID_COMMAND, 0, 0);
        self.io.write_message(&mut self.stream, &raw, &self.logger).await?;

        loop {
            let raw = self.io.read_message(&mut self.stream, &self.logger).await?;
            let msg = Message::from_raw(&raw)?;

            match msg {
                Message::CommandAmf0(cmd) if cmd.name == "createStream" => {
                    let result = Command::new("_result", cmd.transaction_id, vec![AMF0Value::Null, AMF0Value::num(1.0)]);
                    let raw = Message::CommandAmf0(result).to_raw(CHUNK_STREAM_ID_COMMAND, 0, 0);
                    self.io.write_message(&mut self.stream, &raw, &self.logger).await?;
                }
                Message::CommandAmf0(cmd) if cmd.name == "releaseStream" || cmd.name == "FCPublish" => {
                    // Acknowledged implicitly; these exist only to coax
                    // legacy FME-derived encoders along.
                }
                Message::CommandAmf0(cmd) if cmd.name == "play" => {
                    let stream_key = cmd.arguments.get(1).map(|v| v.get_string().to_string()).unwrap_or_default();
                    let url = self.resolve_url(&stream_key)?;

                    self.emit(Message::UserControl(UserControlEvent::StreamIsRecorded(1))).await?;
                    self.emit(Message::UserControl(UserControlEvent::StreamBegin(1))).await?;

                    for (code, description) in [
                        ("NetStream.Play.Reset", "Playing and resetting stream."),
                        ("NetStream.Play.Start", "Started playing stream."),
                        ("NetStream.Data.Start", "Started playing stream."),
                        ("NetStream.Play.PublishNotify", "Now publishing."),
                    ] {
                        self.emit_status(code, description).await?;
                    }

                    return Ok(Connection::from_parts(self.stream, self.io, self.logger, url, false));
                }
                Message::CommandAmf0(cmd) if cmd.name == "publish" => {
                    let stream_key = cmd.arguments.get(1).map(|v| v.get_string().to_string()).unwrap_or_default();
                    let url = self.resolve_url(&stream_key)?;

                    self.emit_status("NetStream.Publish.Start", "Publishing stream.").await?;

                    return Ok(Connection::from_parts(self.stream, self.io, self.logger, url, true));
                }
                other => {
                    return Err(RtmpError::UnexpectedCommand {
                        name: format!("{:?}", other),
                        transaction_id: self.attempt.transaction_id,
                    })
                }
            }
        }
    }

    async fn emit(&mut self, msg: Message) -> Result<()> {
        let raw = msg.to_raw(CHUNK_STREAM_ID_COMMAND, 0, 1);
        self.io.write_message(&mut self.stream, &raw, &self.logger).await
    }

    async fn emit_status(&mut self, code: &str, description: &str) -> Result<()> {
        let cmd = Command::new(
            "onStatus",
            0.0,
            vec![
                AMF0Value::Null,
                AMF0Value::Object(vec![
                    ("level".to_string(), AMF0Value::str("status")),
                    ("code".to_string(), AMF0Value::str(code)),
                    ("description".to_string(), AMF0Value::str(description)),
                ]),
            ],
        );
        self.emit(Message::CommandAmf0(cmd)).await
    }

    fn resolve_url(&self, stream_key_arg: &str) -> Result<RtmpUrl> {
        let (app, stream_key) = resolve_app_and_stream_key(&self.attempt.tc_url, &self.attempt.app, stream_key_arg);

        let parsed = url::Url::parse(&self.attempt.tc_url).map_err(|e| RtmpError::InvalidURL(e.to_string()))?;
        let scheme = parsed.scheme().to_string();
        let host = parsed.host_str().unwrap_or_default().to_string();
        let port = parsed.port();

        Ok(RtmpUrl {
            scheme,
            host,
            port,
            user: None,
            pass: None,
            app,
            stream_key,
            query: None,
        })
    }
}
