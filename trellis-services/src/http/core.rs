//! HTTP/1 connection service.
//!
//! Accepts a raw stream plus its peer address, stamps the typed connection
//! context, then decodes requests, hands each one to the engine, encodes the
//! response, and keeps the connection alive per the request's version and
//! `Connection` header. Header reads honor the configured timeouts; decode
//! failures answer 400 and close.

use std::{convert::Infallible, rc::Rc};

use bytes::BytesMut;
use http::{header, StatusCode, Version};
use monoio::io::{sink::SinkExt, stream::Stream, AsyncReadRent, AsyncWriteRent, Split, Splitable};
use monoio_http::{
    common::body::{Body, HttpBody},
    h1::codec::{
        decoder::{FillPayload, RequestDecoder},
        encoder::GenericEncoder,
    },
};
use service_async::{AsyncMakeService, MakeService, ParamRef, ParamSet, Service};
use tracing::{info, warn};
use trellis_core::{
    config::ServerOptions,
    context::{keys::PeerAddr, ConnContext},
    http::{generate_response, Body as RequestBody, Request},
    listener::AcceptedAddr,
};

use super::{Engine, CLOSE_VALUE, KEEPALIVE_VALUE};

pub struct HttpConnService {
    engine: Rc<Engine>,
    timeouts: ServerOptions,
}

impl HttpConnService {
    pub fn new(engine: Rc<Engine>, timeouts: ServerOptions) -> Self {
        HttpConnService { engine, timeouts }
    }

    pub fn factory(engine: Rc<Engine>, timeouts: ServerOptions) -> HttpConnServiceFactory {
        HttpConnServiceFactory { engine, timeouts }
    }
}

fn should_keep_alive(version: Version, headers: &http::HeaderMap) -> bool {
    let connection = headers
        .get(header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    match version {
        Version::HTTP_10 => connection.eq_ignore_ascii_case(KEEPALIVE_VALUE_STR),
        _ => !connection.eq_ignore_ascii_case(super::CLOSE),
    }
}

const KEEPALIVE_VALUE_STR: &str = "keep-alive";

impl<S> Service<(S, AcceptedAddr)> for HttpConnService
where
    S: Split + AsyncReadRent + AsyncWriteRent,
{
    type Response = ();
    type Error = Infallible;

    async fn call(&self, (stream, addr): (S, AcceptedAddr)) -> Result<Self::Response, Self::Error> {
        // the connection context is stamped once per connection; every
        // request on it shares the peer address
        let conn = ConnContext::new().param_set(PeerAddr::from(addr));
        let peer = ParamRef::<PeerAddr>::param_ref(&conn).0.clone();
        let (reader, writer) = stream.into_split();
        let mut decoder = RequestDecoder::new(reader);
        let mut encoder = GenericEncoder::new(writer);
        decoder.set_timeout(self.timeouts.keepalive_timeout);

        loop {
            if !self.engine.is_accepting() {
                break;
            }

            let decoded = match self.timeouts.read_header_timeout {
                Some(header_timeout) => {
                    match monoio::time::timeout(header_timeout, decoder.next()).await {
                        Ok(inner) => inner,
                        Err(_) => {
                            info!("connection {peer:?} timed out reading a request header");
                            break;
                        }
                    }
                }
                None => decoder.next().await,
            };

            let decoded = match decoded {
                Some(Ok(request)) => request,
                Some(Err(err)) => {
                    warn!("decoding request failed: {err}");
                    let _ = encoder
                        .send_and_flush(generate_response::<HttpBody>(
                            StatusCode::BAD_REQUEST,
                            true,
                        ))
                        .await;
                    break;
                }
                None => {
                    info!("connection {peer:?} closed");
                    break;
                }
            };

            if let Err(err) = decoder.fill_payload().await {
                warn!("reading request body failed: {err}");
                break;
            }

            let (parts, mut payload) = HttpBody::request(decoded).into_parts();
            let mut collected = BytesMut::new();
            while let Some(Ok(chunk)) = payload.next_data().await {
                collected.extend_from_slice(&chunk);
            }

            let keep_alive = should_keep_alive(parts.version, &parts.headers);
            let request = Request::new(
                parts.method,
                parts.uri,
                parts.version,
                parts.headers,
                RequestBody::fixed(collected.freeze()),
                Some(peer.clone()),
            );
            let version = request.version();

            let response = self.engine.handle(request).await;
            let mut transport = response.into_transport().await;
            if !keep_alive {
                transport
                    .headers_mut()
                    .insert(header::CONNECTION, CLOSE_VALUE);
            } else if version == Version::HTTP_10 {
                transport
                    .headers_mut()
                    .insert(header::CONNECTION, KEEPALIVE_VALUE);
            }

            if let Err(err) = encoder.send_and_flush(transport).await {
                warn!("writing response failed: {err}");
                break;
            }
            if !keep_alive {
                break;
            }
        }
        Ok(())
    }
}

pub struct HttpConnServiceFactory {
    engine: Rc<Engine>,
    timeouts: ServerOptions,
}

impl MakeService for HttpConnServiceFactory {
    type Service = HttpConnService;
    type Error = Infallible;

    fn make_via_ref(&self, _old: Option<&Self::Service>) -> Result<Self::Service, Self::Error> {
        Ok(HttpConnService::new(self.engine.clone(), self.timeouts.clone()))
    }
}

impl AsyncMakeService for HttpConnServiceFactory {
    type Service = HttpConnService;
    type Error = Infallible;

    async fn make_via_ref(
        &self,
        _old: Option<&Self::Service>,
    ) -> Result<Self::Service, Self::Error> {
        Ok(HttpConnService::new(self.engine.clone(), self.timeouts.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_alive_rules() {
        let mut headers = http::HeaderMap::new();
        assert!(should_keep_alive(Version::HTTP_11, &headers));
        assert!(!should_keep_alive(Version::HTTP_10, &headers));

        headers.insert(header::CONNECTION, "close".parse().unwrap());
        assert!(!should_keep_alive(Version::HTTP_11, &headers));

        headers.insert(header::CONNECTION, "Keep-Alive".parse().unwrap());
        assert!(should_keep_alive(Version::HTTP_10, &headers));
    }
}
