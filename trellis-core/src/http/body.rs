//! Lazily-consumed, cached request body.
//!
//! Raw bytes are pulled from the transport the first time [`Body::bytes`] is
//! called and cached; repeat calls return the same buffer. A byte limit can
//! be armed before consumption (the body-limit middleware does this) and cuts
//! off streamed bodies as soon as the accumulated size passes it.

use std::{
    cell::{Cell, RefCell},
    io,
};

use bytes::{Bytes, BytesMut};
use futures::{stream::LocalBoxStream, Stream, StreamExt};

#[derive(thiserror::Error, Debug)]
pub enum BodyError {
    #[error("request body exceeds the configured limit")]
    TooLarge,
    #[error("error reading request body: {0}")]
    Io(#[from] io::Error),
}

type ChunkStream = LocalBoxStream<'static, Result<Bytes, io::Error>>;

enum BodySource {
    Fixed(Bytes),
    Streamed(ChunkStream),
}

pub struct Body {
    source: RefCell<Option<BodySource>>,
    cached: RefCell<Option<Bytes>>,
    consumed: Cell<bool>,
    limit: Cell<Option<usize>>,
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl Body {
    pub fn empty() -> Self {
        Self::fixed(Bytes::new())
    }

    pub fn fixed(bytes: Bytes) -> Self {
        Body {
            source: RefCell::new(Some(BodySource::Fixed(bytes))),
            cached: RefCell::new(None),
            consumed: Cell::new(false),
            limit: Cell::new(None),
        }
    }

    pub fn streaming<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, io::Error>> + 'static,
    {
        Body {
            source: RefCell::new(Some(BodySource::Streamed(stream.boxed_local()))),
            cached: RefCell::new(None),
            consumed: Cell::new(false),
            limit: Cell::new(None),
        }
    }

    /// Arm a byte cap for the not-yet-consumed body.
    pub fn set_limit(&self, limit: usize) {
        self.limit.set(Some(limit));
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit.get()
    }

    /// True once the body has been pulled from the transport.
    pub fn consumed(&self) -> bool {
        self.consumed.get()
    }

    /// Read the whole body. The first call consumes the source; later calls
    /// are served from the cache and return the same buffer.
    pub async fn bytes(&self) -> Result<Bytes, BodyError> {
        if let Some(cached) = self.cached.borrow().as_ref() {
            return Ok(cached.clone());
        }
        self.consumed.set(true);
        let source = self.source.borrow_mut().take();
        let limit = self.limit.get();

        let collected = match source {
            None => Bytes::new(),
            Some(BodySource::Fixed(bytes)) => {
                if matches!(limit, Some(limit) if bytes.len() > limit) {
                    return Err(BodyError::TooLarge);
                }
                bytes
            }
            Some(BodySource::Streamed(mut chunks)) => {
                let mut buffer = BytesMut::new();
                while let Some(chunk) = chunks.next().await {
                    let chunk = chunk?;
                    if matches!(limit, Some(limit) if buffer.len() + chunk.len() > limit) {
                        return Err(BodyError::TooLarge);
                    }
                    buffer.extend_from_slice(&chunk);
                }
                buffer.freeze()
            }
        };

        *self.cached.borrow_mut() = Some(collected.clone());
        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;

    #[test]
    fn test_repeat_reads_share_the_buffer() {
        block_on(async {
            let body = Body::fixed(Bytes::from_static(b"payload"));
            assert!(!body.consumed());
            let first = body.bytes().await.unwrap();
            assert!(body.consumed());
            let second = body.bytes().await.unwrap();
            assert_eq!(first, second);
            // same backing buffer, not merely equal content
            assert_eq!(first.as_ptr(), second.as_ptr());
        });
    }

    #[test]
    fn test_streamed_body_collects_chunks() {
        block_on(async {
            let chunks = futures::stream::iter(
                [Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))].into_iter(),
            );
            let body = Body::streaming(chunks);
            assert_eq!(body.bytes().await.unwrap(), Bytes::from_static(b"abcd"));
        });
    }

    #[test]
    fn test_limit_cuts_off_streamed_body() {
        block_on(async {
            let chunks = futures::stream::iter(
                [Ok(Bytes::from_static(b"abc")), Ok(Bytes::from_static(b"def"))].into_iter(),
            );
            let body = Body::streaming(chunks);
            body.set_limit(4);
            assert!(matches!(body.bytes().await, Err(BodyError::TooLarge)));
        });
    }

    #[test]
    fn test_limit_on_fixed_body() {
        block_on(async {
            let body = Body::fixed(Bytes::from_static(b"0123456789"));
            body.set_limit(5);
            assert!(matches!(body.bytes().await, Err(BodyError::TooLarge)));
        });
    }
}
