//! Byte reader / network transport (§2.1, §6 Transport): opens a plain or
//! TLS TCP connection and speaks just enough HTTP/1.0 to drive Git's Smart
//! HTTP endpoints. No async runtime — the whole client is single-threaded
//! and blocking (§5).

use std::io::{BufReader, Read, Write};
use std::net::TcpStream;

use native_tls::TlsConnector;

use crate::crypto::{decrypt_basic_auth, DeviceKey};
use crate::db::ConfigDb;
use crate::error::{Error, Result};

/// A parsed `https://host[:port]/path` (or `http://`) remote URL, split
/// into the pieces `_request` in the original needs: `proto, host, path`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteUrl {
    pub https: bool,
    pub host: String,
    pub port: u16,
    /// Path with no leading slash, e.g. `"owner/repo.git"`.
    pub path: String,
    /// The URL exactly as configured, used as the credential lookup key
    /// (§3 Config Entries: `"Basic HTTP auth for <url>"`) so a stored
    /// credential keeps matching regardless of how the default port gets
    /// normalized internally.
    pub raw: String,
}

impl RemoteUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let (proto, rest) = url.split_once("://").ok_or_else(|| Error::Remote {
            status: 0,
            message: format!("not a URL: {url:?}"),
        })?;
        let https = match proto {
            "https" => true,
            "http" => false,
            other => {
                return Err(Error::Remote {
                    status: 0,
                    message: format!("unsupported URL scheme {other:?}"),
                })
            }
        };
        let (host_port, path) = rest.split_once('/').unwrap_or((rest, ""));
        let (host, port) = match host_port.split_once(':') {
            Some((h, p)) => (
                h.to_string(),
                p.parse::<u16>().map_err(|_| Error::Remote {
                    status: 0,
                    message: format!("invalid port in {url:?}"),
                })?,
            ),
            None => (host_port.to_string(), if https { 443 } else { 80 }),
        };
        Ok(RemoteUrl {
            https,
            host,
            port,
            path: path.to_string(),
            raw: url.to_string(),
        })
    }
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<native_tls::TlsStream<TcpStream>>),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read(buf),
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(s) => s.write(buf),
            Stream::Tls(s) => s.write(buf),
        }
    }
    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Plain(s) => s.flush(),
            Stream::Tls(s) => s.flush(),
        }
    }
}

/// A completed HTTP/1.0 response: the parsed status line and a reader
/// positioned right after the header block, ready for pkt-line decoding.
pub struct HttpResponse {
    pub status: u16,
    body: BufReader<Stream>,
}

impl Read for HttpResponse {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.body.read(buf)
    }
}

fn connect(url: &RemoteUrl) -> Result<Stream> {
    let tcp = TcpStream::connect((url.host.as_str(), url.port)).map_err(|e| Error::Network {
        host: url.host.clone(),
        source: e,
    })?;
    if url.https {
        let connector = TlsConnector::new().map_err(|e| Error::Remote {
            status: 0,
            message: format!("tls setup failed: {e}"),
        })?;
        let tls = connector.connect(&url.host, tcp).map_err(|e| Error::Remote {
            status: 0,
            message: format!("tls handshake failed: {e}"),
        })?;
        Ok(Stream::Tls(Box::new(tls)))
    } else {
        Ok(Stream::Plain(tcp))
    }
}

/// Looks up and decrypts the stored Basic-auth credential for this
/// remote, if any (§6 Transport, §4.8).
fn authorization_header(
    config: &ConfigDb,
    device_key: &impl DeviceKey,
    url: &RemoteUrl,
) -> Result<Option<String>> {
    match config.encrypted_auth(&url.raw) {
        Some(ciphertext) => Ok(Some(decrypt_basic_auth(&ciphertext, device_key)?)),
        None => Ok(None),
    }
}

/// `GET /<path>/info/refs?service=git-upload-pack` (§4.5.1).
pub fn get_info_refs(
    url: &RemoteUrl,
    config: &ConfigDb,
    device_key: &impl DeviceKey,
) -> Result<HttpResponse> {
    let request = format!(
        "GET /{}/info/refs?service=git-upload-pack HTTP/1.0\r\n",
        url.path.trim_end_matches('/')
    );
    let mut headers = vec![
        format!("Host: {}", url.host),
        "User-Agent: ygit/0.1".to_string(),
        "Accept: */*".to_string(),
    ];
    if let Some(auth) = authorization_header(config, device_key, url)? {
        headers.push(format!("Authorization: {auth}"));
    }
    send_request(url, &request, &headers, None)
}

/// `POST /<path>/git-upload-pack` with a protocol v2 command body
/// (§4.5.2-4.5.3).
pub fn post_upload_pack(
    url: &RemoteUrl,
    config: &ConfigDb,
    device_key: &impl DeviceKey,
    body: &[u8],
) -> Result<HttpResponse> {
    let request = format!(
        "POST /{}/git-upload-pack HTTP/1.0\r\n",
        url.path.trim_end_matches('/')
    );
    let mut headers = vec![
        format!("Host: {}", url.host),
        "User-Agent: ygit/0.1".to_string(),
        "Content-Type: application/x-git-upload-pack-request".to_string(),
        "Accept: application/x-git-upload-pack-result".to_string(),
        "Git-Protocol: version=2".to_string(),
        format!("Content-Length: {}", body.len()),
    ];
    if let Some(auth) = authorization_header(config, device_key, url)? {
        headers.push(format!("Authorization: {auth}"));
    }
    send_request(url, &request, &headers, Some(body))
}

fn send_request(
    url: &RemoteUrl,
    request_line: &str,
    headers: &[String],
    body: Option<&[u8]>,
) -> Result<HttpResponse> {
    let mut stream = connect(url)?;
    let mut out = request_line.to_string();
    for header in headers {
        out.push_str(header);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    stream.write_all(out.as_bytes()).map_err(|e| Error::Network {
        host: url.host.clone(),
        source: e,
    })?;
    if let Some(body) = body {
        stream.write_all(body).map_err(|e| Error::Network {
            host: url.host.clone(),
            source: e,
        })?;
    }
    let mut reader = BufReader::new(stream);
    let status = read_status_line(&mut reader)?;
    read_headers_to_blank_line(&mut reader)?;
    if status == 401 {
        return Err(Error::AuthenticationRequired {
            url: url.raw.clone(),
            status,
        });
    }
    if status != 200 {
        return Err(Error::Remote {
            status,
            message: format!("non-200 response from {}", url.raw),
        });
    }
    Ok(HttpResponse { status, body: reader })
}

fn read_line(r: &mut impl std::io::BufRead) -> Result<String> {
    let mut line = String::new();
    let n = r.read_line(&mut line)?;
    if n == 0 {
        return Err(Error::Remote {
            status: 0,
            message: "connection closed before HTTP response completed".into(),
        });
    }
    Ok(line)
}

fn read_status_line(r: &mut impl std::io::BufRead) -> Result<u16> {
    let line = read_line(r)?;
    let mut parts = line.split_whitespace();
    let _http_version = parts.next();
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| Error::Remote {
            status: 0,
            message: format!("malformed HTTP status line: {line:?}"),
        })?;
    Ok(status)
}

fn read_headers_to_blank_line(r: &mut impl std::io::BufRead) -> Result<()> {
    loop {
        let line = read_line(r)?;
        if line == "\r\n" || line == "\n" {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_https_url_with_default_port() {
        let url = RemoteUrl::parse("https://github.com/user/repo.git").unwrap();
        assert!(url.https);
        assert_eq!(url.host, "github.com");
        assert_eq!(url.port, 443);
        assert_eq!(url.path, "user/repo.git");
    }

    #[test]
    fn parses_http_url_with_explicit_port() {
        let url = RemoteUrl::parse("http://localhost:8080/repo").unwrap();
        assert!(!url.https);
        assert_eq!(url.port, 8080);
        assert_eq!(url.path, "repo");
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(RemoteUrl::parse("git://example.com/repo").is_err());
    }
}
