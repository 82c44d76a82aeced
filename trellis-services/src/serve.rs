//! Accept loop: one spawned task per connection, shutdown via oneshot.

use std::{fmt::Debug, rc::Rc};

use futures::channel::oneshot;
use service_async::Service;
use trellis_core::listener::{AcceptedAddr, AcceptedStream, Listener};

pub async fn serve<S>(listener: Listener, service: Rc<S>, mut shutdown: oneshot::Receiver<()>)
where
    S: Service<(AcceptedStream, AcceptedAddr)> + 'static,
    S::Error: Debug,
{
    loop {
        monoio::select! {
            _ = &mut shutdown => {
                tracing::info!("listener stopping");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let service = service.clone();
                    monoio::spawn(async move {
                        if let Err(e) = service.call((stream, addr)).await {
                            tracing::warn!("connection handling error: {e:?}");
                        }
                    });
                }
                Err(e) => tracing::warn!("accept failed: {e:?}"),
            }
        }
    }
}
