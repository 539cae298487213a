// Client-role connection flow: connect / createStream / play / publish.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::amf::AMF0Value;
use crate::config::CoreConfig;
use crate::error::{Result, RtmpError};
use crate::handshake::{do_client_handshake, Rc4Stream};
use crate::log::{LogConfig, Logger};
use crate::message::{Command, Message, PeerBandwidthLimitType, UserControlEvent};

use super::auth::{compute_response, generate_hex_challenge, parse_auth_query, NEED_AUTH_PREFIX};
use super::{Connection, RtmpUrl, CHUNK_STREAM_ID_COMMAND, CHUNK_STREAM_ID_PROTOCOL};

const FLASH_VER: &str = "LNX 9,0,124,2";

/// What the server's reply to a `connect` attempt told the client to do
/// next, one state per round of the Adobe FME challenge/response (§4.7).
enum ConnectOutcome {
    Success,
    /// First `_error`: bare `code=403 need auth; authmod=adobe`, no salt or
    /// challenge yet. The client must retry with just `?authmod=adobe&user=`.
    NeedUsername,
    /// Second `_error`: `authmod=adobe ?reason=needauth&...&salt=&challenge=`.
    /// The client can now compute and send the real response.
    NeedResponse { salt: String, challenge: String },
}

/// Client-role connection: drives the outbound handshake and command
/// exchange described for `publish`/`play` against a server.
pub struct Client<S> {
    conn: Connection<Rc4Stream<S>>,
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Performs the handshake and full connect/createStream/play-or-publish
    /// exchange, transparently handling one round of Adobe FME auth if the
    /// server challenges the connection.
    pub async fn connect(mut stream: S, url: RtmpUrl, publish: bool, config: &CoreConfig) -> Result<Client<S>> {
        let logger = Logger::new(LogConfig::default());
        let handshake_result = do_client_handshake(&mut stream, &logger, config.obfuscated_handshake).await?;
        let stream = Rc4Stream::new(stream, handshake_result.keys);

        let mut conn = Connection::new(stream, config, logger, url.clone(), publish);

        conn.write_message(CHUNK_STREAM_ID_PROTOCOL, &Message::SetWindowAckSize(config.window_ack_size))
            .await?;
        conn.write_message(
            CHUNK_STREAM_ID_PROTOCOL,
            &Message::SetPeerBandwidth { size: config.peer_bandwidth, limit_type: PeerBandwidthLimitType::Dynamic },
        )
        .await?;
        conn.write_message(CHUNK_STREAM_ID_PROTOCOL, &Message::SetChunkSize(config.chunk_size as u32))
            .await?;

        Self::send_connect(&mut conn, &url, None).await?;

        match Self::await_connect_result(&mut conn).await? {
            ConnectOutcome::Success => {}
            ConnectOutcome::NeedUsername => {
                let user = url.user.clone().unwrap_or_default();

                Self::send_connect(&mut conn, &url, Some(format!("?authmod=adobe&user={}", user))).await?;

                match Self::await_connect_result(&mut conn).await? {
                    ConnectOutcome::NeedResponse { salt, challenge } => {
                        let pass = url.pass.clone().unwrap_or_default();
                        let client_challenge = generate_hex_challenge();
                        let response = compute_response(&user, &pass, &salt, &challenge, &client_challenge);

                        Self::send_connect(
                            &mut conn,
                            &url,
                            Some(format!(
                                "?authmod=adobe&user={}&challenge={}&response={}",
                                user, client_challenge, response
                            )),
                        )
                        .await?;

                        match Self::await_connect_result(&mut conn).await? {
                            ConnectOutcome::Success => {}
                            _ => return Err(RtmpError::AuthenticationFailed),
                        }
                    }
                    // A server that accepts outright after the username-only
                    // retry (no salt/challenge round) still satisfies auth.
                    ConnectOutcome::Success => {}
                    ConnectOutcome::NeedUsername => return Err(RtmpError::AuthenticationFailed),
                }
            }
            ConnectOutcome::NeedResponse { .. } => return Err(RtmpError::AuthenticationFailed),
        }

        if publish {
            Self::run_publish_handshake(&mut conn, &url).await?;
        } else {
            Self::run_play_handshake(&mut conn, &url).await?;
        }

        Ok(Client { conn })
    }

    async fn send_connect(conn: &mut Connection<Rc4Stream<S>>, url: &RtmpUrl, auth_suffix: Option<String>) -> Result<()> {
        let suffix = auth_suffix.unwrap_or_default();
        let app = format!("{}{}", url.app, suffix);
        let tc_url = format!("{}{}", url.tc_url(), suffix);

        let args = AMF0Value::Object(vec![
            ("app".to_string(), AMF0Value::str(app)),
            ("flashVer".to_string(), AMF0Value::str(FLASH_VER)),
            ("tcUrl".to_string(), AMF0Value::str(tc_url)),
            ("fpad".to_string(), AMF0Value::Boolean(false)),
            ("capabilities".to_string(), AMF0Value::num(15.0)),
            ("audioCodecs".to_string(), AMF0Value::num(4071.0)),
            ("videoCodecs".to_string(), AMF0Value::num(252.0)),
            ("videoFunction".to_string(), AMF0Value::num(1.0)),
        ]);

        conn.write_command(&Message::CommandAmf0(Command::new("connect", 1.0, vec![args]))).await
    }

    async fn await_connect_result(conn: &mut Connection<Rc4Stream<S>>) -> Result<ConnectOutcome> {
        loop {
            match conn.read_message().await? {
                Message::CommandAmf0(cmd) if cmd.name == "_result" => return Ok(ConnectOutcome::Success),
                Message::CommandAmf0(cmd) if cmd.name == "_error" => {
                    let description = cmd
                        .arguments
                        .iter()
                        .find_map(|v| v.get("description").map(|d| d.get_string().to_string()))
                        .unwrap_or_default();

                    // Second error carries the real salt/challenge; check it
                    // first since it also starts with the bare prefix's
                    // "authmod=adobe" substring.
                    if let Some(q) = description.strip_prefix("authmod=adobe ?") {
                        let parsed = parse_auth_query(q);
                        if let (Some(salt), Some(challenge)) = (parsed.salt, parsed.challenge) {
                            return Ok(ConnectOutcome::NeedResponse { salt, challenge });
                        }
                    }

                    if description.starts_with(NEED_AUTH_PREFIX) {
                        return Ok(ConnectOutcome::NeedUsername);
                    }

                    return Err(RtmpError::BadResult(description));
                }
                other => {
                    return Err(RtmpError::UnexpectedCommand {
                        name: format!("{:?}", other),
                        transaction_id: 1.0,
                    })
                }
            }
        }
    }

    async fn run_play_handshake(conn: &mut Connection<Rc4Stream<S>>, url: &RtmpUrl) -> Result<()> {
        conn.write_command(&Message::CommandAmf0(Command::new("createStream", 2.0, vec![AMF0Value::Null])))
            .await?;
        Self::await_result(conn).await?;

        conn.write_command(&Message::UserControl(UserControlEvent::SetBufferLength {
            stream_id: 1,
            buffer_ms: 100,
        }))
        .await?;

        conn.write_command(&Message::CommandAmf0(Command::new(
            "play",
            3.0,
            vec![AMF0Value::Null, AMF0Value::str(url.stream_key.clone())],
        )))
        .await?;

        Self::await_on_status(conn).await
    }

    async fn run_publish_handshake(conn: &mut Connection<Rc4Stream<S>>, url: &RtmpUrl) -> Result<()> {
        conn.write_command(&Message::CommandAmf0(Command::new(
            "releaseStream",
            2.0,
            vec![AMF0Value::Null, AMF0Value::str(url.stream_key.clone())],
        )))
        .await?;
        conn.write_command(&Message::CommandAmf0(Command::new(
            "FCPublish",
            3.0,
            vec![AMF0Value::Null, AMF0Value::str(url.stream_key.clone())],
        )))
        .await?;
        conn.write_command(&Message::CommandAmf0(Command::new("createStream", 4.0, vec![AMF0Value::Null])))
            .await?;
        Self::await_result(conn).await?;

        conn.write_command(&Message::CommandAmf0(Command::new(
            "publish",
            5.0,
            vec![AMF0Value::Null, AMF0Value::str(url.stream_key.clone()), AMF0Value::str(url.app.clone())],
        )))
        .await?;

        Self::await_on_status(conn).await
    }

    async fn await_result(conn: &mut Connection<Rc4Stream<S>>) -> Result<()> {
        loop {
            match conn.read_message().await? {
                Message::CommandAmf0(cmd) if cmd.name == "_result" => return Ok(()),
                Message::CommandAmf0(cmd) if cmd.name == "_error" => {
                    return Err(RtmpError::BadResult(cmd.name))
                }
                _ => continue,
            }
        }
    }

    async fn await_on_status(conn: &mut Connection<Rc4Stream<S>>) -> Result<()> {
        loop {
            match conn.read_message().await? {
                Message::CommandAmf0(cmd) if cmd.name == "onStatus" => {
                    let ok = cmd
                        .arguments
                        .iter()
                        .any(|v| v.get_string_prop("level") == "status");
                    if ok {
                        return Ok(());
                    }
                    return Err(RtmpError::BadResult("onStatus".to_string()));
                }
                _ => continue,
            }
        }
    }

    pub async fn read_message(&mut self) -> Result<Message> {
        self.conn.read_message().await
    }

    pub async fn write_message(&mut self, chunk_stream_id: u32, msg: &Message) -> Result<()> {
        self.conn.write_message(chunk_stream_id, msg).await
    }

    pub fn bytes_received(&self) -> u64 {
        self.conn.bytes_received()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.conn.bytes_sent()
    }

    pub fn publish(&self) -> bool {
        self.conn.publish
    }

    pub fn url(&self) -> &RtmpUrl {
        &self.conn.url
    }

    pub fn into_connection(self) -> Connection<Rc4Stream<S>> {
        self.conn
    }
}
