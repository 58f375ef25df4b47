//! Client for a server's administrative profiling endpoint.
//!
//! One `GET /debug/pprof/profile` through a hyper client bound to the
//! caller's reactor. The body is collected whole, whatever transfer coding
//! the server picked.

use errors::*;
use futures::{future, Future, Stream};
use hyper::{Client, StatusCode, Uri};
use std::net::SocketAddr;
use std::time::Duration;
use tokio_core::reactor::Handle;

/// Requests a CPU profile spanning `window`. The request blocks on the
/// server side for the whole window; the future resolves to the raw body.
pub fn fetch(
    handle: &Handle,
    addr: SocketAddr,
    window: Duration,
) -> Box<Future<Item = Vec<u8>, Error = Error>> {
    let uri = match profile_uri(addr, window) {
        Ok(uri) => uri,
        Err(e) => return Box::new(future::err(e)),
    };
    trace!("profile request: GET {}", uri);

    let client = Client::new(handle);
    let work = client
        .get(uri)
        .and_then(|res| {
            let status = res.status();
            res.body().concat2().map(move |body| (status, body))
        })
        .then(move |res| {
            // the pool lives until the reply is in
            drop(client);
            match res {
                Ok((status, body)) => {
                    accept(status, body.to_vec()).chain_err(|| ErrorKind::CaptureEndpoint(addr))
                }
                Err(e) => Err(Error::with_chain(e, ErrorKind::CaptureEndpoint(addr))),
            }
        });
    Box::new(work)
}

fn profile_uri(addr: SocketAddr, window: Duration) -> Result<Uri> {
    // a zero window would make the server fall back to its own default
    let seconds = ::std::cmp::max(window.as_secs(), 1);
    format!("http://{}/debug/pprof/profile?seconds={}", addr, seconds)
        .parse::<Uri>()
        .map_err(|e| Error::with_chain(e, ErrorKind::CaptureEndpoint(addr)))
}

/// Keeps the body of a `200` reply and rejects everything else.
fn accept(status: StatusCode, body: Vec<u8>) -> Result<Vec<u8>> {
    if status != StatusCode::Ok {
        bail!("unexpected status {}", status);
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use tokio_core::reactor::Core;

    /// Answers one request with `reply` and returns the request head.
    fn endpoint(reply: &'static [u8]) -> (SocketAddr, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 256];
            while !buf.ends_with(b"\r\n\r\n") {
                let n = socket.read(&mut chunk).unwrap();
                assert!(n > 0);
                buf.extend_from_slice(&chunk[..n]);
            }
            socket.write_all(reply).unwrap();
            String::from_utf8(buf).unwrap()
        });
        (addr, server)
    }

    fn run_fetch(addr: SocketAddr, window: Duration) -> Result<Vec<u8>> {
        let mut core = Core::new().unwrap();
        let handle = core.handle();
        core.run(fetch(&handle, addr, window))
    }

    #[test]
    fn query_asks_for_whole_seconds() {
        let addr = "127.0.0.1:16060".parse().unwrap();
        let uri = profile_uri(addr, Duration::from_secs(5)).unwrap();
        assert_eq!(uri.path(), "/debug/pprof/profile");
        assert_eq!(uri.query(), Some("seconds=5"));
        let uri = profile_uri(addr, Duration::from_millis(10)).unwrap();
        assert_eq!(uri.query(), Some("seconds=1"));
    }

    #[test]
    fn fetches_sized_body() {
        let (addr, server) =
            endpoint(b"HTTP/1.1 200 OK\r\nContent-Length: 7\r\nConnection: close\r\n\r\nsamples");
        let got = run_fetch(addr, Duration::from_secs(2)).unwrap();
        assert_eq!(got, b"samples".to_vec());
        let request = server.join().unwrap();
        assert!(request.starts_with("GET /debug/pprof/profile?seconds=2 "));
    }

    #[test]
    fn decodes_chunked_body() {
        let (addr, _server) = endpoint(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n\
              7\r\nsamples\r\n0\r\n\r\n",
        );
        let got = run_fetch(addr, Duration::from_secs(1)).unwrap();
        assert_eq!(got, b"samples".to_vec());
    }

    #[test]
    fn reads_close_delimited_body() {
        let (addr, _server) = endpoint(b"HTTP/1.0 200 OK\r\n\r\n\x1f\x8b\x00\r\n\r\nrest");
        let got = run_fetch(addr, Duration::from_secs(1)).unwrap();
        assert_eq!(got, b"\x1f\x8b\x00\r\n\r\nrest".to_vec());
    }

    #[test]
    fn error_status_is_capture_error() {
        let (addr, _server) = endpoint(
            b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 4\r\nConnection: close\r\n\r\nboom",
        );
        let err = run_fetch(addr, Duration::from_secs(1)).unwrap_err();
        match *err.kind() {
            ErrorKind::CaptureEndpoint(a) => assert_eq!(a, addr),
            ref other => panic!("unexpected error {:?}", other),
        }
        assert!(accept(StatusCode::Ok, b"x".to_vec()).is_ok());
        assert!(accept(StatusCode::NotFound, Vec::new()).is_err());
    }

    #[test]
    fn connection_refused_is_capture_error() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let err = run_fetch(addr, Duration::from_secs(1)).unwrap_err();
        match *err.kind() {
            ErrorKind::CaptureEndpoint(a) => assert_eq!(a, addr),
            ref other => panic!("unexpected error {:?}", other),
        }
    }
}
