use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

use crate::{
    Error,
    error::Result,
};

pub(crate) fn build_connect_request(proxy: &Url, host: &str, port: u16) -> String {
    let mut request = format!(
        "CONNECT {}:{} HTTP/1.1\r\nHost: {}:{}\r\n",
        host, port, host, port
    );

    if !proxy.username().is_empty() {
        let credentials = format!("{}:{}", proxy.username(), proxy.password().unwrap_or(""));
        request.push_str(&format!(
            "Proxy-Authorization: Basic {}\r\n",
            BASE64.encode(credentials)
        ));
    }

    request.push_str("Connection: keep-alive\r\n\r\n");
    request
}

pub(crate) fn check_connect_response(response: &[u8]) -> Result<()> {
    let text = String::from_utf8_lossy(response);
    let status = text.lines().next().unwrap_or("");

    let mut parts = status.split_whitespace();
    let version = parts.next().unwrap_or("");
    let code = parts.next().unwrap_or("");

    if !version.starts_with("HTTP/") || code != "200" {
        return Err(Error::Network(format!("Proxy CONNECT failed: {}", status)));
    }
    Ok(())
}

// Open a TCP tunnel to host:port through an HTTP proxy, honoring Basic
// credentials embedded in the proxy URL.
pub(crate) async fn tunnel(proxy: &Url, host: &str, port: u16, deadline: Duration) -> Result<TcpStream> {
    let proxy_host = proxy.host_str()
        .ok_or_else(|| Error::Argument(format!("Proxy URL {} has no host", proxy)))?;
    let proxy_port = proxy.port_or_known_default().unwrap_or(80);

    debug!("Tunnelling to {}:{} through proxy {}:{}", host, port, proxy_host, proxy_port);

    let result = timeout(deadline, async {
        let mut stream = TcpStream::connect((proxy_host, proxy_port)).await?;
        stream.write_all(build_connect_request(proxy, host, port).as_bytes()).await?;

        let mut response = Vec::new();
        let mut byte = [0u8; 1];
        while !response.ends_with(b"\r\n\r\n") {
            if response.len() > 8192 {
                return Err(Error::Network(format!(
                    "Proxy {} sent an oversized CONNECT response", proxy_host
                )));
            }
            let n = stream.read(&mut byte).await?;
            if n == 0 {
                return Err(Error::Network(format!(
                    "Proxy {} closed the connection during CONNECT", proxy_host
                )));
            }
            response.push(byte[0]);
        }

        check_connect_response(&response)?;
        Ok(stream)
    }).await;

    match result {
        Ok(inner) => inner,
        Err(_) => Err(Error::Timeout(format!(
            "Proxy {} did not answer CONNECT within {:?}", proxy_host, deadline
        ))),
    }
}
