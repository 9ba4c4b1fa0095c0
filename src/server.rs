//! TCP server for the text transformation protocol.
//!
//! Accepts connections, feeds received bytes through the frame decoder,
//! and answers each decoded request with a length-prefixed reply before
//! the next frame is parsed.

use crate::config::Config;
use crate::decoder::{Decoded, FrameDecoder};
use crate::frame::{self, BAD_ACTION_MESSAGE};
use crate::transform;
use bytes::BytesMut;
use socket2::{Domain, Socket, Type};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace};

/// Maximum number of concurrent connections
const MAX_CONNECTIONS: usize = 10000;

/// Listen backlog for the accept queue
const LISTEN_BACKLOG: i32 = 1024;

/// Server instance
pub struct Server {
    config: Config,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        Server {
            config,
            connection_limit: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        }
    }

    /// Start the server and begin accepting connections
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()?
            .next()
            .ok_or("listen address did not resolve")?;
        let listener = bind_listener(addr)?;
        info!(address = %listener.local_addr()?, "Server listening");

        loop {
            // Wait for a connection slot
            let permit = self.connection_limit.clone().acquire_owned().await?;

            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream).await {
                            debug!(error = %e, "Connection error");
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Bind the listening socket with SO_REUSEADDR set.
fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(socket.into())
}

/// Handle a single client connection.
///
/// Reads are sized by the decoder's adaptive hint. A zero-byte read means
/// the client disconnected; per-connection state lives in the decoder and
/// is dropped with it. An invalid UTF-8 payload is fatal for the
/// connection: no reply is sent for that frame.
async fn handle_connection(
    mut stream: TcpStream,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut decoder = FrameDecoder::new();

    loop {
        let mut chunk = BytesMut::with_capacity(decoder.recv_hint());
        let n = stream.read_buf(&mut chunk).await?;
        if n == 0 {
            trace!("Client disconnected");
            return Ok(());
        }
        trace!(bytes = n, "Received chunk");
        decoder.extend(&chunk);

        loop {
            match decoder.next_frame() {
                Decoded::Frame { opcode, payload } => {
                    let text = std::str::from_utf8(&payload)?;
                    let reply = transform::apply(opcode, text);
                    trace!(?opcode, reply_len = reply.len(), "Processed request");
                    stream.write_all(&frame::encode_response(&reply)).await?;
                }
                Decoded::Rejected => {
                    stream
                        .write_all(&frame::encode_response(BAD_ACTION_MESSAGE))
                        .await?;
                }
                Decoded::NeedData => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_header;
    use tokio_test::assert_ok;

    async fn spawn_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let _ = handle_connection(stream).await;
                });
            }
        });

        addr
    }

    async fn send_request(stream: &mut TcpStream, opcode_bits: u8, payload: &[u8]) {
        stream
            .write_all(&encode_header(opcode_bits, payload.len()))
            .await
            .unwrap();
        stream.write_all(payload).await.unwrap();
    }

    async fn read_reply(stream: &mut TcpStream) -> String {
        let mut len_bytes = [0u8; 4];
        stream.read_exact(&mut len_bytes).await.unwrap();
        let len = u32::from_be_bytes(len_bytes) as usize;

        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await.unwrap();
        String::from_utf8(payload).unwrap()
    }

    #[tokio::test]
    async fn test_round_trip() {
        let addr = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        send_request(&mut stream, 1, b"hello").await;
        assert_eq!(read_reply(&mut stream).await, "HELLO");

        send_request(&mut stream, 2, b"HELLO").await;
        assert_eq!(read_reply(&mut stream).await, "hello");

        send_request(&mut stream, 4, b"abc").await;
        assert_eq!(read_reply(&mut stream).await, "cba");
    }

    #[tokio::test]
    async fn test_request_split_across_writes() {
        let addr = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let mut bytes = encode_header(1, 5).to_vec();
        bytes.extend_from_slice(b"split");
        for &byte in &bytes {
            stream.write_all(&[byte]).await.unwrap();
            stream.flush().await.unwrap();
        }

        assert_eq!(read_reply(&mut stream).await, "SPLIT");
    }

    #[tokio::test]
    async fn test_two_frames_in_one_write() {
        let addr = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let mut bytes = encode_header(1, 2).to_vec();
        bytes.extend_from_slice(b"ab");
        bytes.extend_from_slice(&encode_header(4, 2));
        bytes.extend_from_slice(b"cd");
        stream.write_all(&bytes).await.unwrap();

        assert_eq!(read_reply(&mut stream).await, "AB");
        assert_eq!(read_reply(&mut stream).await, "dc");
    }

    #[tokio::test]
    async fn test_bad_opcode_gets_diagnostic_and_stream_stays_aligned() {
        let addr = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        send_request(&mut stream, 3, b"junk").await;
        assert_eq!(read_reply(&mut stream).await, BAD_ACTION_MESSAGE);

        send_request(&mut stream, 1, b"next").await;
        assert_eq!(read_reply(&mut stream).await, "NEXT");
    }

    #[tokio::test]
    async fn test_zero_length_payload() {
        let addr = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(&encode_header(1, 0)).await.unwrap();
        assert_eq!(read_reply(&mut stream).await, "");

        stream.write_all(&encode_header(16, 0)).await.unwrap();
        assert_eq!(read_reply(&mut stream).await, "");
    }

    #[tokio::test]
    async fn test_shuffle_reply_preserves_length() {
        let addr = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        send_request(&mut stream, 8, b"shuffle me").await;
        let reply = read_reply(&mut stream).await;
        assert_eq!(reply.len(), "shuffle me".len());
    }

    #[tokio::test]
    async fn test_invalid_utf8_closes_connection() {
        let addr = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        send_request(&mut stream, 1, &[0xFF, 0xFE]).await;

        // No reply: the server tears the connection down.
        let mut buf = [0u8; 4];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_disconnect_does_not_affect_next_connection() {
        let addr = spawn_server().await;

        {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            // Leave a partial header behind, then disconnect.
            stream.write_all(&[0x08, 0x00]).await.unwrap();
        }

        let mut stream = TcpStream::connect(addr).await.unwrap();
        send_request(&mut stream, 1, b"fresh").await;
        assert_eq!(read_reply(&mut stream).await, "FRESH");
    }

    #[tokio::test]
    async fn test_bind_listener() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let listener = tokio_test::assert_ok!(bind_listener(addr));
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
