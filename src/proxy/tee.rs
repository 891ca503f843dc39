//! Splitting one upstream body into a client stream and an observer stream.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::tasks::BackgroundTasks;

/// Stream handed to the client response body.
pub type ClientStream = UnboundedReceiverStream<Result<Bytes, std::io::Error>>;

/// Stream handed to the usage observer.
pub type ObserverStream = UnboundedReceiverStream<Bytes>;

/// Duplicate `upstream` into two independent readers.
///
/// A pump task on `tasks` reads the upstream and forwards every chunk to
/// both sides over unbounded channels, so a slow observer never holds back
/// the client. A reader that goes away (for example a disconnected client)
/// is skipped and the pump keeps draining for the other one.
pub fn tee<S, E>(upstream: S, tasks: &BackgroundTasks) -> (ClientStream, ObserverStream)
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let (client_tx, client_rx) = mpsc::unbounded_channel();
    let (observer_tx, observer_rx) = mpsc::unbounded_channel();

    tasks.spawn(async move {
        let mut upstream = Box::pin(upstream);
        while let Some(item) = upstream.next().await {
            match item {
                Ok(chunk) => {
                    let _ = client_tx.send(Ok(chunk.clone()));
                    let _ = observer_tx.send(chunk);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream stream failed mid-response");
                    let _ = client_tx.send(Err(std::io::Error::other(e.to_string())));
                    break;
                }
            }
        }
    });

    (
        UnboundedReceiverStream::new(client_rx),
        UnboundedReceiverStream::new(observer_rx),
    )
}
