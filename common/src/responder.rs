use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
    assets::WebAssets,
    config::{ControlConfig, ResponderConfig},
    error::ResponderError,
    http::{request_complete, Request, Response, Routes},
    lifecycle::Endpoint,
    state::{ControlState, TemperatureProvider},
};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);
// Write budget when the read used up the whole client timeout.
const WRITE_GRACE: Duration = Duration::from_millis(100);

pub struct Responder<P: ?Sized = ControlState> {
    config: ResponderConfig,
    control: ControlConfig,
    provider: Arc<P>,
    assets: WebAssets,
    listener: Option<TcpListener>,
}

impl<P> Responder<P>
where
    P: TemperatureProvider + ?Sized,
{
    pub fn new(
        config: ResponderConfig,
        control: ControlConfig,
        provider: Arc<P>,
        assets: WebAssets,
    ) -> Self {
        Self {
            config,
            control,
            provider,
            assets,
            listener: None,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    fn accept_within(
        listener: &TcpListener,
        timeout: Duration,
    ) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        let deadline = Instant::now() + timeout;
        loop {
            match listener.accept() {
                Ok(client) => return Ok(Some(client)),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    thread::sleep(ACCEPT_POLL_INTERVAL.min(deadline - now));
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
    }

    fn serve(&self, mut stream: TcpStream) -> io::Result<()> {
        let deadline = Instant::now() + self.config.client_timeout();
        stream.set_nonblocking(false)?;

        let raw = read_request(&mut stream, self.config.max_request_bytes, deadline)?;
        let response = match Request::parse(&raw) {
            Ok(request) => {
                debug!("{:?} {}", request.method, request.path);
                Routes {
                    provider: self.provider.as_ref(),
                    control: &self.control,
                    assets: &self.assets,
                }
                .dispatch(&request)
            }
            Err(err) => {
                warn!("rejecting malformed request: {err}");
                Response::bad_request("Malformed request")
            }
        };

        stream.set_write_timeout(Some(remaining(deadline).unwrap_or(WRITE_GRACE)))?;
        stream.write_all(&response.to_bytes())?;
        stream.flush()?;
        let _ = stream.shutdown(Shutdown::Both);
        Ok(())
    }
}

impl<P> Endpoint for Responder<P>
where
    P: TemperatureProvider + ?Sized,
{
    fn start(&mut self) -> Result<(), ResponderError> {
        if self.listener.is_some() {
            return Ok(());
        }

        let addr = self.config.socket_addr();
        let listener =
            TcpListener::bind(addr).map_err(|source| ResponderError::Bind { addr, source })?;
        listener.set_nonblocking(true)?;
        self.listener = Some(listener);
        Ok(())
    }

    fn stop(&mut self) {
        self.listener = None;
    }

    fn poll(&mut self) -> Result<bool, ResponderError> {
        let Some(listener) = self.listener.as_ref() else {
            return Ok(false);
        };

        let Some((stream, peer)) = Self::accept_within(listener, self.config.accept_timeout())?
        else {
            return Ok(false);
        };

        info!("client connected from {peer}");
        if let Err(err) = self.serve(stream) {
            warn!("error handling client {peer}: {err}");
        }
        Ok(true)
    }
}

// A timeout after partial data keeps what was read.
fn read_request(
    stream: &mut TcpStream,
    max_bytes: usize,
    deadline: Instant,
) -> io::Result<Vec<u8>> {
    let mut buf = vec![0_u8; max_bytes];
    let mut filled = 0;

    while filled < max_bytes {
        let Some(left) = remaining(deadline) else {
            if filled == 0 {
                return Err(io::Error::from(io::ErrorKind::TimedOut));
            }
            break;
        };
        stream.set_read_timeout(Some(left))?;

        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(read) => {
                filled += read;
                if request_complete(&buf[..filled]) {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                if filled == 0 {
                    return Err(err);
                }
                break;
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }

    buf.truncate(filled);
    Ok(buf)
}

fn remaining(deadline: Instant) -> Option<Duration> {
    Some(deadline.saturating_duration_since(Instant::now())).filter(|left| !left.is_zero())
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;
    use pretty_assertions::assert_eq;

    fn responder(state: Arc<ControlState>) -> Responder {
        let mut responder = Responder::new(
            ResponderConfig {
                bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port: 0,
                accept_timeout_ms: 50,
                client_timeout_ms: 300,
                ..ResponderConfig::default()
            },
            ControlConfig::default(),
            state,
            WebAssets::builtin(),
        );
        responder.start().unwrap();
        responder
    }

    fn exchange(responder: &mut Responder, raw: &str) -> String {
        let addr = responder.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(raw.as_bytes()).unwrap();

        assert!(responder.poll().unwrap());

        let mut reply = String::new();
        client.read_to_string(&mut reply).unwrap();
        reply
    }

    fn body(reply: &str) -> &str {
        reply.split_once("\r\n\r\n").map(|(_, body)| body).unwrap_or("")
    }

    #[test]
    fn idle_poll_returns_after_accept_timeout() {
        let mut responder = responder(Arc::new(ControlState::new(Some(4.0), 0.0, 20.0)));
        let started = Instant::now();
        assert!(!responder.poll().unwrap());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn serves_target_then_data_over_socket() {
        let state = Arc::new(ControlState::new(Some(22.0), 0.0, 20.0));
        let mut responder = responder(state.clone());

        let reply = exchange(
            &mut responder,
            "POST /api/target HTTP/1.1\r\nHost: freezer\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 11\r\n\r\ntarget=18.5",
        );
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(body(&reply), r#"{"success":true,"target":18.5}"#);
        assert_eq!(state.target(), 18.5);

        let reply = exchange(&mut responder, "GET /api/data HTTP/1.1\r\nHost: freezer\r\n\r\n");
        assert!(reply.contains("Access-Control-Allow-Origin: *\r\n"));
        assert_eq!(
            body(&reply),
            r#"{"temperature":22.0,"target_temperature":18.5,"state":"cooling"}"#
        );
    }

    #[test]
    fn malformed_request_gets_400_and_close() {
        let mut responder = responder(Arc::new(ControlState::new(Some(4.0), 0.0, 20.0)));
        let reply = exchange(&mut responder, "HELLO\r\n\r\n");
        assert!(reply.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(reply.contains("Connection: close\r\n"));
    }

    #[test]
    fn unknown_path_is_404() {
        let mut responder = responder(Arc::new(ControlState::new(Some(4.0), 0.0, 20.0)));
        let reply = exchange(&mut responder, "GET /favicon.ico HTTP/1.1\r\n\r\n");
        assert!(reply.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn body_arriving_late_is_still_read() {
        let state = Arc::new(ControlState::new(Some(4.0), 0.0, 20.0));
        let mut responder = responder(state.clone());
        let addr = responder.local_addr().unwrap();

        let client = thread::spawn(move || {
            let mut client = TcpStream::connect(addr).unwrap();
            client
                .write_all(b"POST /api/target HTTP/1.1\r\nContent-Length: 16\r\n\r\n")
                .unwrap();
            thread::sleep(Duration::from_millis(50));
            client.write_all(b"{\"target\":-19.5}").unwrap();
            let mut reply = String::new();
            client.read_to_string(&mut reply).unwrap();
            reply
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while !responder.poll().unwrap() && Instant::now() < deadline {}

        let reply = client.join().unwrap();
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(state.target(), -19.5);
    }

    #[test]
    fn silent_client_is_dropped_after_timeout() {
        let mut responder = responder(Arc::new(ControlState::new(Some(4.0), 0.0, 20.0)));
        let addr = responder.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();

        let started = Instant::now();
        assert!(responder.poll().unwrap());
        assert!(started.elapsed() < Duration::from_secs(3));

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).unwrap();
        assert!(reply.is_empty());
    }

    #[test]
    fn trickling_client_cannot_hold_the_poll() {
        let mut responder = responder(Arc::new(ControlState::new(Some(4.0), 0.0, 20.0)));
        let addr = responder.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();

        let trickle = thread::spawn(move || {
            for byte in b"GET /api/data HTTP/1.1\r\nHost: freezer\r\n".iter().cycle().take(40) {
                if client.write_all(&[*byte]).is_err() {
                    break;
                }
                thread::sleep(Duration::from_millis(50));
            }
        });

        let started = Instant::now();
        assert!(responder.poll().unwrap());
        let elapsed = started.elapsed();
        assert!(
            elapsed < Duration::from_secs(1),
            "poll held for {elapsed:?} with a 300 ms client timeout"
        );

        trickle.join().unwrap();
    }

    #[test]
    fn stopped_responder_serves_nothing() {
        let mut responder = responder(Arc::new(ControlState::new(Some(4.0), 0.0, 20.0)));
        let addr = responder.local_addr();
        responder.start().unwrap();
        assert_eq!(responder.local_addr(), addr);

        responder.stop();
        assert!(!responder.is_listening());
        assert!(!responder.poll().unwrap());
    }
}
