//! Socket dialling seam.
//!
//! The transport core is written against boxed text-frame halves, so the
//! reconnect machinery can be driven by scripted connections in tests.
//! Production dialling goes through tokio-tungstenite.

use std::pin::Pin;

use futures::{
    future::BoxFuture,
    sink::{Sink, SinkExt},
    stream::{Stream, StreamExt},
};
use tokio_tungstenite::tungstenite::Message;

use crate::error::ChatError;

/// Outbound half: accepts text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChatError> + Send>>;

/// Inbound half: yields text frames until the connection ends.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

pub trait Dialer: Send + Sync + 'static {
    /// Open a connection to `url`, yielding the frame halves.
    fn dial(&self, url: String) -> BoxFuture<'static, Result<(FrameSink, FrameStream), ChatError>>;
}

/// Production dialer over tokio-tungstenite.
pub struct WsDialer;

impl Dialer for WsDialer {
    fn dial(&self, url: String) -> BoxFuture<'static, Result<(FrameSink, FrameStream), ChatError>> {
        Box::pin(async move {
            let (ws, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
            let (sink, stream) = ws.split();

            let sink: FrameSink = Box::pin(
                sink.with(|text: String| async move { Ok::<Message, ChatError>(Message::Text(text)) }),
            );

            // Binary frames are not part of this protocol; ping/pong is
            // answered by tungstenite itself. Close ends the stream.
            let stream: FrameStream = Box::pin(stream.filter_map(|message| async move {
                match message {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(Message::Close(_)) => None,
                    Ok(_) => None,
                    Err(e) => Some(Err(ChatError::from(e))),
                }
            }));

            Ok((sink, stream))
        })
    }
}
