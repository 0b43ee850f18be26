//! Channel-Hub client.
//!
//! One connection serves both roles. A producer registers channels and
//! answers pad requests through its `on_pad_request` callback; a consumer
//! lists channels and asks for pads. The broker correlates a consumer's
//! `PadRequest` with the producer's answer, so `request_pad` simply blocks
//! on the reply to its own request id.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use padlink_core::{NO_VALUE, RESULT, ServerLocation, Session, SessionCore, SessionError, SessionHandler};
use padlink_proto::{
    BodyReader, ChubKind, Frame, common,
    payloads::chub::{ChannelList, PadRequestResponse},
};
use thiserror::Error;

/// Event kind fired when a channel list arrived (id = request id).
const CHANNELS: u32 = 1;
/// Event kind fired when a pad answer arrived (id = request id).
const PAD_CREATED: u32 = 2;

/// Channel-Hub client errors.
#[derive(Debug, Error)]
pub enum ChubClientError {
    /// Transport setup failed.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// The broker rejected `ActivateSession`.
    #[error("session activation failed")]
    ActivationFailed,
}

/// Producer callback: mint a pad name for a request on `channel`, or
/// `None` to deny.
pub type PadRequestHandler = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

struct ChubHandler {
    on_pad_request: Option<PadRequestHandler>,
    channels_buffer: Mutex<Option<Vec<String>>>,
    pad_buffer: Mutex<Option<PadRequestResponse>>,
}

impl ChubHandler {
    fn stash_channels(&self, names: Vec<String>) {
        let mut slot = self.channels_buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.replace(names).is_some() {
            tracing::warn!("previous channel list was not consumed");
        }
    }

    fn stash_pad(&self, resp: PadRequestResponse) {
        let mut slot = self.pad_buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.replace(resp).is_some() {
            tracing::warn!("previous pad response was not consumed");
        }
    }
}

#[async_trait]
impl SessionHandler for ChubHandler {
    async fn on_frame(&self, session: &Arc<SessionCore>, frame: &Frame) -> bool {
        match ChubKind::from_u16(frame.kind) {
            Some(ChubKind::ChannelList) => {
                let Ok(list) = ChannelList::from_frame(frame) else {
                    return false;
                };
                self.stash_channels(list.names);
                session.events().invoke(CHANNELS, frame.id, NO_VALUE);
                true
            },
            Some(ChubKind::PadRequest) => {
                let Some(handler) = &self.on_pad_request else {
                    tracing::warn!("pad request on a consumer-only session");
                    return false;
                };
                let Ok(channel) = BodyReader::new(&frame.body).tail_str() else {
                    return false;
                };
                let reply = match handler(channel) {
                    Some(pad_name) => PadRequestResponse { ok: true, pad_name },
                    None => PadRequestResponse::denied(),
                };
                tracing::info!(channel, ok = reply.ok, pad = reply.pad_name, "pad request");

                // the answer carries the broker's forward id; its result
                // comes back under that same id
                let forward_id = frame.id;
                session.events().register_callback(RESULT, forward_id, |result| {
                    if result == 0 {
                        tracing::warn!("pad answer rejected by broker");
                    }
                });
                let Ok(reply_frame) = reply.to_frame(forward_id) else {
                    return false;
                };
                session.send_frame(reply_frame).await
            },
            Some(ChubKind::PadRequestResponse) => {
                let Ok(resp) = PadRequestResponse::from_frame(frame) else {
                    return false;
                };
                let ok = resp.ok;
                self.stash_pad(resp);
                session.events().invoke(PAD_CREATED, frame.id, u32::from(ok));
                true
            },
            _ => false,
        }
    }
}

/// Session parameters.
#[derive(Debug, Clone)]
pub struct ChannelHubParams {
    /// Broker endpoint.
    pub channel_hub: ServerLocation,
    /// User certificate for session activation.
    pub user_certificate: String,
}

/// A Channel-Hub client.
pub struct ChannelHubClient {
    session: Session,
    handler: Arc<ChubHandler>,
}

impl std::fmt::Debug for ChannelHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHubClient").finish_non_exhaustive()
    }
}

impl ChannelHubClient {
    /// Connect and activate. Pass `on_pad_request` to act as a producer.
    pub async fn start(
        params: ChannelHubParams,
        on_pad_request: Option<PadRequestHandler>,
    ) -> Result<Self, ChubClientError> {
        let handler = Arc::new(ChubHandler {
            on_pad_request,
            channels_buffer: Mutex::new(None),
            pad_buffer: Mutex::new(None),
        });
        let session = Session::start(&params.channel_hub, Arc::clone(&handler) as _).await?;

        if !session
            .core()
            .send_request(common::ACTIVATE_SESSION, Bytes::from(params.user_certificate))
            .await
        {
            session.stop();
            return Err(ChubClientError::ActivationFailed);
        }
        Ok(Self { session, handler })
    }

    /// Advertise a channel owned by this session.
    pub async fn register_channel(&self, name: &str) -> bool {
        self.session
            .core()
            .send_request(ChubKind::RegisterChannel.to_u16(), Bytes::copy_from_slice(name.as_bytes()))
            .await
    }

    /// Remove a channel owned by this session.
    pub async fn unregister_channel(&self, name: &str) -> bool {
        self.session
            .core()
            .send_request(
                ChubKind::UnregisterChannel.to_u16(),
                Bytes::copy_from_slice(name.as_bytes()),
            )
            .await
    }

    /// List registered channels in registration order.
    pub async fn get_channels(&self) -> Option<Vec<String>> {
        let core = self.session.core();
        let id = core.allocate_packet_id();
        if !core.send_frame(Frame::empty(ChubKind::GetChannels.to_u16(), id)).await {
            return None;
        }
        core.events().wait_for(CHANNELS, id).await?;
        self.handler.channels_buffer.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Ask the producer of `channel` for a fresh pad name.
    ///
    /// `None` means denied, unknown channel, or a lost producer.
    pub async fn request_pad(&self, channel: &str) -> Option<String> {
        let core = Arc::clone(self.session.core());
        let id = core.allocate_packet_id();

        // an Error reply (unknown channel, pending request, ...) must also
        // resolve the wait, as a denial
        let core2 = Arc::clone(&core);
        if !core.events().register_callback(RESULT, id, move |result| {
            if result == 0 {
                core2.events().invoke(PAD_CREATED, id, 0);
            }
        }) {
            return None;
        }

        let frame = Frame::new(ChubKind::PadRequest.to_u16(), id, Bytes::copy_from_slice(channel.as_bytes()));
        if !core.send_frame(frame).await {
            core.events().cancel(RESULT, id);
            return None;
        }

        let verdict = core.events().wait_for(PAD_CREATED, id).await;
        core.events().cancel(RESULT, id);
        if verdict != Some(1) {
            return None;
        }
        let resp = self.handler.pad_buffer.lock().unwrap_or_else(PoisonError::into_inner).take()?;
        if resp.pad_name.is_empty() { None } else { Some(resp.pad_name) }
    }

    /// Whether the session is still live.
    pub fn is_connected(&self) -> bool {
        self.session.core().is_connected()
    }

    /// Stop the session (idempotent).
    pub fn stop(&self) {
        self.session.stop();
    }
}

#[cfg(test)]
mod tests {
    use padlink_core::transport::spawn_io;
    use padlink_proto::FrameCutter;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;

    async fn read_frame(stream: &mut DuplexStream) -> Frame {
        let mut cutter = FrameCutter::new();
        loop {
            if let Some(frame) = cutter.next_frame().unwrap() {
                return frame;
            }
            assert!(stream.read_buf(cutter.buffer_mut()).await.unwrap() > 0);
        }
    }

    async fn write_frame(stream: &mut DuplexStream, frame: Frame) {
        stream.write_all(&frame.to_bytes().unwrap()).await.unwrap();
    }

    fn attach(
        on_pad_request: Option<PadRequestHandler>,
    ) -> (ChannelHubClient, DuplexStream) {
        let (near, far) = tokio::io::duplex(4096);
        let handler = Arc::new(ChubHandler {
            on_pad_request,
            channels_buffer: Mutex::new(None),
            pad_buffer: Mutex::new(None),
        });
        let session = Session::attach(spawn_io(near), Arc::clone(&handler) as _);
        (ChannelHubClient { session, handler }, far)
    }

    #[tokio::test]
    async fn get_channels_parses_nul_list() {
        let (client, mut far) = attach(None);
        let request = tokio::spawn(async move {
            let names = client.get_channels().await;
            (client, names)
        });

        let frame = read_frame(&mut far).await;
        assert_eq!(frame.kind, ChubKind::GetChannels.to_u16());
        // reply without trailing NUL; the parser accepts both
        write_frame(&mut far, Frame::new(ChubKind::ChannelList.to_u16(), frame.id, &b"a\0b"[..]))
            .await;

        let (_client, names) = request.await.unwrap();
        assert_eq!(names, Some(vec!["a".to_owned(), "b".to_owned()]));
    }

    #[tokio::test]
    async fn request_pad_returns_minted_name() {
        let (client, mut far) = attach(None);
        let request = tokio::spawn(async move {
            let pad = client.request_pad("chan").await;
            (client, pad)
        });

        let frame = read_frame(&mut far).await;
        assert_eq!(frame.kind, ChubKind::PadRequest.to_u16());
        let reply = PadRequestResponse { ok: true, pad_name: "pad_1".to_owned() };
        write_frame(&mut far, reply.to_frame(frame.id).unwrap()).await;

        let (_client, pad) = request.await.unwrap();
        assert_eq!(pad, Some("pad_1".to_owned()));
    }

    #[tokio::test]
    async fn request_pad_error_reply_is_denial() {
        let (client, mut far) = attach(None);
        let request = tokio::spawn(async move {
            let pad = client.request_pad("ghost").await;
            (client, pad)
        });

        let frame = read_frame(&mut far).await;
        write_frame(&mut far, Frame::empty(common::ERROR, frame.id)).await;

        let (_client, pad) = request.await.unwrap();
        assert_eq!(pad, None);
    }

    #[tokio::test]
    async fn producer_answers_pad_request() {
        let minted = Arc::new(Mutex::new(0u32));
        let minted2 = Arc::clone(&minted);
        let handler: PadRequestHandler = Box::new(move |channel| {
            let mut count = minted2.lock().unwrap();
            if channel == "a" && *count < 2 {
                *count += 1;
                Some(format!("pad_a_{count}"))
            } else {
                None
            }
        });
        let (_client, mut far) = attach(Some(handler));

        // broker forwards a pad request under its own id
        write_frame(&mut far, Frame::new(ChubKind::PadRequest.to_u16(), 0x8000_0001, &b"a"[..]))
            .await;
        let reply = read_frame(&mut far).await;
        assert_eq!(reply.id, 0x8000_0001);
        let resp = PadRequestResponse::from_frame(&reply).unwrap();
        assert!(resp.ok);
        assert_eq!(resp.pad_name, "pad_a_1");

        // a third request on "a" is denied
        write_frame(&mut far, Frame::new(ChubKind::PadRequest.to_u16(), 0x8000_0002, &b"a"[..]))
            .await;
        let reply = read_frame(&mut far).await;
        let resp = PadRequestResponse::from_frame(&reply).unwrap();
        assert!(resp.ok); // second mint
        write_frame(&mut far, Frame::new(ChubKind::PadRequest.to_u16(), 0x8000_0003, &b"a"[..]))
            .await;
        let reply = read_frame(&mut far).await;
        let resp = PadRequestResponse::from_frame(&reply).unwrap();
        assert!(!resp.ok);
        assert!(resp.pad_name.is_empty());
    }

    #[tokio::test]
    async fn drained_session_returns_none() {
        let (client, far) = attach(None);
        drop(far);
        client.session.closed().await;
        assert_eq!(client.get_channels().await, None);
        assert_eq!(client.request_pad("a").await, None);
    }
}
