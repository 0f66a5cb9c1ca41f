//! Request/reply channel between the capture widget and the background
//! handler.

use crate::models::{Ack, ExtensionMessage, SenderInfo};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("background handler is not running")]
    Disconnected,
    #[error("background handler dropped the request")]
    NoReply,
}

/// One message in flight, with the slot for its reply.
#[derive(Debug)]
pub struct Envelope {
    pub message: ExtensionMessage,
    pub sender: SenderInfo,
    reply: oneshot::Sender<Ack>,
}

impl Envelope {
    pub fn respond(self, ack: Ack) {
        // The caller may have stopped waiting.
        let _ = self.reply.send(ack);
    }
}

#[derive(Clone)]
pub struct MessageSender {
    tx: mpsc::Sender<Envelope>,
}

pub type MessageReceiver = mpsc::Receiver<Envelope>;

pub fn channel(buffer: usize) -> (MessageSender, MessageReceiver) {
    let (tx, rx) = mpsc::channel(buffer);
    (MessageSender { tx }, rx)
}

impl MessageSender {
    /// Send a message and wait for the handler's acknowledgement.
    pub async fn send(
        &self,
        message: ExtensionMessage,
        sender: SenderInfo,
    ) -> Result<Ack, MessageError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                message,
                sender,
                reply,
            })
            .await
            .map_err(|_| MessageError::Disconnected)?;
        rx.await.map_err(|_| MessageError::NoReply)
    }
}
