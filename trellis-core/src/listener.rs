//! Unified listener over TCP and Unix domain sockets.
//!
//! The transport contract the engine consumes is deliberately thin: a
//! listener yields `(AcceptedStream, AcceptedAddr)` pairs, and the connection
//! service drives the HTTP codec over the stream.

use std::{io, net::SocketAddr, path::Path};

use monoio::{
    buf::{IoBuf, IoBufMut, IoVecBuf, IoVecBufMut},
    io::{AsyncReadRent, AsyncWriteRent, Split},
    net::{ListenerOpts, TcpListener, TcpStream},
    BufResult,
};
use service_async::MakeService;

pub enum ListenerBuilder {
    Tcp(SocketAddr, ListenerOpts),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixListener),
}

impl ListenerBuilder {
    pub fn bind_tcp(addr: SocketAddr, opts: ListenerOpts) -> io::Result<ListenerBuilder> {
        Ok(Self::Tcp(addr, opts))
    }

    #[cfg(unix)]
    pub fn bind_unix<P: AsRef<Path>>(path: P) -> io::Result<ListenerBuilder> {
        // Stale socket files from a previous run would fail the bind.
        let _ = std::fs::remove_file(path.as_ref());
        let listener = std::os::unix::net::UnixListener::bind(path)?;
        if monoio::utils::is_legacy() {
            listener.set_nonblocking(true)?;
        }
        Ok(Self::Unix(listener))
    }

    pub fn build(&self) -> io::Result<Listener> {
        match self {
            ListenerBuilder::Tcp(addr, opts) => {
                TcpListener::bind_with_config(addr, opts).map(Listener::Tcp)
            }
            #[cfg(unix)]
            ListenerBuilder::Unix(listener) => {
                let sys_listener = listener.try_clone()?;
                monoio::net::UnixListener::from_std(sys_listener).map(Listener::Unix)
            }
        }
    }
}

impl MakeService for ListenerBuilder {
    type Service = Listener;
    type Error = io::Error;

    fn make_via_ref(&self, _old: Option<&Self::Service>) -> Result<Self::Service, Self::Error> {
        self.build()
    }
}

pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(monoio::net::UnixListener),
}

impl Listener {
    pub async fn accept(&self) -> io::Result<(AcceptedStream, AcceptedAddr)> {
        match self {
            Listener::Tcp(l) => {
                let (stream, addr) = l.accept().await?;
                Ok((AcceptedStream::Tcp(stream), AcceptedAddr::Tcp(addr)))
            }
            #[cfg(unix)]
            Listener::Unix(l) => {
                let (stream, addr) = l.accept().await?;
                Ok((AcceptedStream::Unix(stream), AcceptedAddr::Unix(addr)))
            }
        }
    }
}

pub enum AcceptedStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(monoio::net::UnixStream),
}

unsafe impl Split for AcceptedStream {}

#[derive(Debug, Clone)]
pub enum AcceptedAddr {
    Tcp(SocketAddr),
    #[cfg(unix)]
    Unix(monoio::net::unix::SocketAddr),
}

impl AcceptedAddr {
    /// The transport remote IP; Unix peers have none.
    pub fn ip(&self) -> Option<std::net::IpAddr> {
        match self {
            AcceptedAddr::Tcp(addr) => Some(addr.ip()),
            #[cfg(unix)]
            AcceptedAddr::Unix(_) => None,
        }
    }
}

impl From<SocketAddr> for AcceptedAddr {
    fn from(value: SocketAddr) -> Self {
        Self::Tcp(value)
    }
}

#[cfg(unix)]
impl From<monoio::net::unix::SocketAddr> for AcceptedAddr {
    fn from(value: monoio::net::unix::SocketAddr) -> Self {
        Self::Unix(value)
    }
}

impl AsyncReadRent for AcceptedStream {
    async fn read<T: IoBufMut>(&mut self, buf: T) -> BufResult<usize, T> {
        match self {
            AcceptedStream::Tcp(inner) => inner.read(buf).await,
            #[cfg(unix)]
            AcceptedStream::Unix(inner) => inner.read(buf).await,
        }
    }

    async fn readv<T: IoVecBufMut>(&mut self, buf: T) -> BufResult<usize, T> {
        match self {
            AcceptedStream::Tcp(inner) => inner.readv(buf).await,
            #[cfg(unix)]
            AcceptedStream::Unix(inner) => inner.readv(buf).await,
        }
    }
}

impl AsyncWriteRent for AcceptedStream {
    async fn write<T: IoBuf>(&mut self, buf: T) -> BufResult<usize, T> {
        match self {
            AcceptedStream::Tcp(inner) => inner.write(buf).await,
            #[cfg(unix)]
            AcceptedStream::Unix(inner) => inner.write(buf).await,
        }
    }

    async fn writev<T: IoVecBuf>(&mut self, buf_vec: T) -> BufResult<usize, T> {
        match self {
            AcceptedStream::Tcp(inner) => inner.writev(buf_vec).await,
            #[cfg(unix)]
            AcceptedStream::Unix(inner) => inner.writev(buf_vec).await,
        }
    }

    async fn flush(&mut self) -> io::Result<()> {
        match self {
            AcceptedStream::Tcp(inner) => inner.flush().await,
            #[cfg(unix)]
            AcceptedStream::Unix(inner) => inner.flush().await,
        }
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            AcceptedStream::Tcp(inner) => inner.shutdown().await,
            #[cfg(unix)]
            AcceptedStream::Unix(inner) => inner.shutdown().await,
        }
    }
}
