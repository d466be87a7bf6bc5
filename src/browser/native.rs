//! Native messaging transport. Every frame is a 32-bit length in native byte order followed by
//! that many bytes of UTF-8 JSON. The browser writes into our stdin and reads our stdout.

use anyhow::{bail, Result};
use tokio::{
    io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc::{self, error::TrySendError},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{error::TrackerError, host::event::HostEvent};

use super::{
    messages::{BrowserMessage, InboundEnvelope, Notification, Outbound, RequestId, Response, TabId},
    BrowserApi,
};

/// Browsers refuse bigger messages coming from a host.
pub const MAX_OUTBOUND_FRAME: usize = 1024 * 1024;
/// The extension never sends anything close to this, anything bigger is a broken stream.
pub const MAX_INBOUND_FRAME: usize = 64 * 1024 * 1024;

/// Reads one frame. `None` means the browser closed the stream, including in the middle of a
/// length prefix.
pub async fn read_frame(reader: &mut (impl AsyncRead + Unpin)) -> Result<Option<Vec<u8>>> {
    let mut length = [0u8; 4];
    match reader.read_exact(&mut length).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => Err(e)?,
    }
    let length = u32::from_ne_bytes(length) as usize;
    if length > MAX_INBOUND_FRAME {
        bail!("Inbound frame of {length} bytes exceeds {MAX_INBOUND_FRAME}");
    }
    let mut payload = vec![0; length];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

pub async fn write_frame(writer: &mut (impl AsyncWrite + Unpin), payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_OUTBOUND_FRAME {
        bail!(
            "Outbound frame of {} bytes exceeds {MAX_OUTBOUND_FRAME}",
            payload.len()
        );
    }
    let length = payload.len() as u32;
    writer.write_all(&length.to_ne_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Turns inbound frames into [HostEvent]s. When the browser closes the stream the whole host
/// is shut down.
pub struct InboundReader<R> {
    reader: R,
    next: mpsc::Sender<HostEvent>,
    shutdown: CancellationToken,
}

impl<R: AsyncRead + Unpin> InboundReader<R> {
    pub fn new(reader: R, next: mpsc::Sender<HostEvent>, shutdown: CancellationToken) -> Self {
        Self {
            reader,
            next,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            let frame = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                frame = read_frame(&mut self.reader) => frame,
            };

            match frame {
                Ok(Some(payload)) => match serde_json::from_slice::<InboundEnvelope>(&payload) {
                    Ok(envelope) => {
                        debug!("Received {:?}", envelope);
                        if self.next.send(HostEvent::Inbound(envelope)).await.is_err() {
                            warn!("Event loop is gone, dropping inbound messages");
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        warn!(
                            "Ignoring malformed message {}: {e}",
                            String::from_utf8_lossy(&payload)
                        );
                    }
                },
                Ok(None) => {
                    info!("Browser closed the connection");
                    self.shutdown.cancel();
                    return Ok(());
                }
                Err(e) => {
                    error!("Inbound stream is broken {e:?}");
                    self.shutdown.cancel();
                    return Err(e);
                }
            }
        }
    }
}

/// Serializes outbound messages into frames. Runs until every sender is dropped.
pub struct OutboundWriter<W> {
    writer: W,
    receiver: mpsc::Receiver<Outbound>,
}

impl<W: AsyncWrite + Unpin> OutboundWriter<W> {
    pub fn new(writer: W, receiver: mpsc::Receiver<Outbound>) -> Self {
        Self { writer, receiver }
    }

    pub async fn run(mut self) -> Result<()> {
        while let Some(outbound) = self.receiver.recv().await {
            let payload = match serde_json::to_vec(&outbound) {
                Ok(v) => v,
                Err(e) => {
                    error!("Couldn't serialize {:?}: {e}", outbound);
                    continue;
                }
            };
            if payload.len() > MAX_OUTBOUND_FRAME {
                warn!("Dropping outbound frame of {} bytes", payload.len());
                continue;
            }
            write_frame(&mut self.writer, &payload).await?;
        }
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// [BrowserApi] realization that queues frames for [OutboundWriter].
#[derive(Clone)]
pub struct NativeMessagingBrowser {
    outbound: mpsc::Sender<Outbound>,
}

impl NativeMessagingBrowser {
    pub fn new(outbound: mpsc::Sender<Outbound>) -> Self {
        Self { outbound }
    }

    fn push(&self, outbound: Outbound) -> Result<(), TrackerError> {
        self.outbound.try_send(outbound).map_err(|e| match e {
            TrySendError::Full(_) => TrackerError::DeliveryFailure("outbound queue is full".into()),
            TrySendError::Closed(_) => {
                TrackerError::DeliveryFailure("outbound stream is closed".into())
            }
        })
    }
}

impl BrowserApi for NativeMessagingBrowser {
    fn send_to_tab(&self, tab_id: TabId, message: BrowserMessage) -> Result<(), TrackerError> {
        self.push(Outbound::Tab { tab_id, message })
    }

    fn broadcast(&self, message: BrowserMessage) -> Result<(), TrackerError> {
        self.push(Outbound::Runtime { message })
    }

    fn notify(&self, notification: Notification) -> Result<(), TrackerError> {
        self.push(Outbound::Notification(notification))
    }

    fn reply(&self, request_id: RequestId, payload: Response) -> Result<(), TrackerError> {
        self.push(Outbound::Reply {
            request_id,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::json;
    use tokio::{io::AsyncWriteExt, sync::mpsc};
    use tokio_util::sync::CancellationToken;

    use crate::{
        browser::{
            messages::{Ack, InboundMessage, Outbound, Response},
            native::{read_frame, write_frame, InboundReader, NativeMessagingBrowser, OutboundWriter},
            BrowserApi,
        },
        error::TrackerError,
        host::event::HostEvent,
        utils::logging::TEST_LOGGING,
    };

    fn frame(value: serde_json::Value) -> Vec<u8> {
        let payload = serde_json::to_vec(&value).unwrap();
        let mut bytes = (payload.len() as u32).to_ne_bytes().to_vec();
        bytes.extend(payload);
        bytes
    }

    #[tokio::test]
    async fn frames_survive_the_pipe() -> Result<()> {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, b"{\"x\":1}").await?;
        write_frame(&mut a, b"").await?;
        drop(a);

        assert_eq!(read_frame(&mut b).await?, Some(b"{\"x\":1}".to_vec()));
        assert_eq!(read_frame(&mut b).await?, Some(vec![]));
        assert_eq!(read_frame(&mut b).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn truncated_prefix_counts_as_closed() -> Result<()> {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_all(&[1, 0]).await?;
        drop(a);
        assert_eq!(read_frame(&mut b).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn oversized_frames_are_refused() -> Result<()> {
        let (mut a, _b) = tokio::io::duplex(16);
        let payload = vec![b' '; super::MAX_OUTBOUND_FRAME + 1];
        assert!(write_frame(&mut a, &payload).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn reader_skips_garbage_and_stops_on_eof() -> Result<()> {
        *TEST_LOGGING;
        let (mut browser, host) = tokio::io::duplex(4096);
        let (sender, mut receiver) = mpsc::channel(8);
        let shutdown = CancellationToken::new();

        browser.write_all(&frame(json!({"message": {"type": "nonsense"}}))).await?;
        browser
            .write_all(&frame(json!({"requestId": 1, "message": {"type": "getSettings"}})))
            .await?;
        drop(browser);

        InboundReader::new(host, sender, shutdown.clone()).run().await?;

        match receiver.recv().await {
            Some(HostEvent::Inbound(envelope)) => {
                assert_eq!(envelope.request_id, Some(1));
                assert_eq!(envelope.message, InboundMessage::GetSettings);
            }
            other => panic!("Unexpected event {other:?}"),
        }
        assert!(receiver.recv().await.is_none());
        assert!(shutdown.is_cancelled());
        Ok(())
    }

    #[tokio::test]
    async fn writer_frames_queued_messages() -> Result<()> {
        let (sender, receiver) = mpsc::channel(8);
        let (host, mut browser) = tokio::io::duplex(4096);
        let api = NativeMessagingBrowser::new(sender);

        api.reply(5, Response::Ack(Ack::ok()))?;
        drop(api);

        OutboundWriter::new(host, receiver).run().await?;

        let payload = read_frame(&mut browser).await?.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload)?;
        assert_eq!(value["target"], "reply");
        assert_eq!(value["requestId"], 5);
        assert_eq!(read_frame(&mut browser).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn closed_stream_is_a_delivery_failure() {
        let (sender, receiver) = mpsc::channel::<Outbound>(1);
        drop(receiver);
        let api = NativeMessagingBrowser::new(sender);
        assert!(matches!(
            api.reply(1, Response::Ack(Ack::ok())),
            Err(TrackerError::DeliveryFailure(_))
        ));
    }
}
