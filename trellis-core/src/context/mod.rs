use keys::{ClientAddr, PeerAddr};

pub mod keys;

certain_map::certain_map! {
    #[style = "unfilled"]
    #[derive(Debug, Clone)]
    pub struct ConnContext {
        // Stamped by the connection service when the connection is accepted
        peer_addr: PeerAddr,
        // Set by the engine once the request's client IP is resolved
        client_addr: Option<ClientAddr>,
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;

    use certain_map::ParamSet;
    use service_async::ParamRef;

    use super::{keys::*, ConnContext};
    use crate::listener::AcceptedAddr;

    #[test]
    fn test_attach_peer_addr() {
        let ctx = ConnContext::new();
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let ctx = ctx.param_set(PeerAddr::from(AcceptedAddr::from(addr)));
        match ParamRef::<PeerAddr>::param_ref(&ctx).0 {
            AcceptedAddr::Tcp(socket_addr) => assert_eq!(addr, socket_addr),
            #[cfg(unix)]
            _ => unreachable!(),
        }
    }
}
