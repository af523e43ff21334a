//! Local HTTP listener for Evolution API webhooks.
//!
//! Requests are handled one at a time, so events reach the stream in the
//! order Evolution posted them.

use anyhow::{anyhow, bail};
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt as _, AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _, BufReader},
    net::TcpListener,
    sync::mpsc,
};

use super::{Event, UserInfo, evolution::EvolutionApi};

const MAX_BODY: usize = 1024 * 1024;
const OK: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nOK";

#[derive(Debug, PartialEq)]
pub(super) enum Webhook {
    Qr(String),
    /// Account info when the payload carries it.
    Open(Option<UserInfo>),
    Close(Option<u16>),
}

pub(super) async fn serve(listener: TcpListener, api: EvolutionApi, tx: mpsc::UnboundedSender<Event>) {
    loop {
        let (mut stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("[evolution] webhook accept error: {e}");
                continue;
            }
        };

        let body = match read_request(&mut stream).await {
            Ok((_, body)) => body,
            Err(e) => {
                tracing::debug!("[evolution] bad webhook request from {peer}: {e}");
                continue;
            }
        };
        let _ = stream.write_all(OK).await;
        drop(stream);

        let payload: Value = match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("[evolution] webhook body is not JSON: {e}");
                continue;
            }
        };

        let event = match parse(&payload, api.instance()) {
            Some(Webhook::Qr(code)) => Event::Qr(code),
            Some(Webhook::Open(Some(user))) => Event::Open(user),
            Some(Webhook::Open(None)) => match api.fetch_owner().await {
                Ok(user) => Event::Open(user),
                Err(e) => {
                    tracing::warn!("[evolution] connected, but account info is unavailable: {e:#}");
                    continue;
                }
            },
            Some(Webhook::Close(status_code)) => Event::Close { status_code },
            None => continue,
        };

        if tx.send(event).is_err() {
            break;
        }
    }
}

/// Reads one HTTP/1.1 request, returning its request line and body.
pub(super) async fn read_request<S>(stream: &mut S) -> anyhow::Result<(String, Vec<u8>)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await? == 0 {
        bail!("connection closed before the request line");
    }

    let mut content_length = 0usize;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            bail!("connection closed inside headers");
        }
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':')
            && name.trim().eq_ignore_ascii_case("content-length")
        {
            content_length = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("invalid content-length {value:?}"))?;
        }
    }

    if content_length > MAX_BODY {
        bail!("body of {content_length} bytes is too large");
    }
    let mut body = vec![0; content_length];
    reader.read_exact(&mut body).await?;

    Ok((request_line.trim_end().to_string(), body))
}

/// Extracts the event we care about from a webhook payload addressed to
/// `instance`.
pub(super) fn parse(payload: &Value, instance: &str) -> Option<Webhook> {
    // Global webhooks name events `CONNECTION_UPDATE`, instance ones `connection.update`.
    let event = payload["event"].as_str()?.to_lowercase().replace('_', ".");
    if let Some(name) = payload["instance"].as_str()
        && name != instance
    {
        return None;
    }

    let data = &payload["data"];
    match event.as_str() {
        "qrcode.updated" => data["qrcode"]["code"]
            .as_str()
            .map(|code| Webhook::Qr(code.to_string())),
        "connection.update" => match data["state"].as_str()? {
            "open" => Some(Webhook::Open(data["wuid"].as_str().map(|id| UserInfo {
                id: id.to_string(),
                name: data["profileName"]
                    .as_str()
                    .filter(|name| !name.is_empty())
                    .map(str::to_string),
            }))),
            "close" => Some(Webhook::Close(
                data["statusReason"]
                    .as_u64()
                    .and_then(|code| u16::try_from(code).ok()),
            )),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf;
    use serde_json::json;
    use tokio::io::AsyncWriteExt as _;

    #[test]
    fn test_parse_connection_updates() {
        let close = json!({
            "event": "connection.update",
            "instance": "aeon",
            "data": {"instance": "aeon", "state": "close", "statusReason": 428}
        });
        assert_eq!(parse(&close, "aeon"), Some(Webhook::Close(Some(428))));

        let open = json!({
            "event": "CONNECTION_UPDATE",
            "instance": "aeon",
            "data": {"state": "open", "wuid": "15551234567@s.whatsapp.net", "profileName": "Aeon"}
        });
        assert_eq!(
            parse(&open, "aeon"),
            Some(Webhook::Open(Some(UserInfo {
                id: "15551234567@s.whatsapp.net".into(),
                name: Some("Aeon".into()),
            })))
        );

        let bare_open = json!({"event": "connection.update", "data": {"state": "open"}});
        assert_eq!(parse(&bare_open, "aeon"), Some(Webhook::Open(None)));

        let connecting = json!({"event": "connection.update", "data": {"state": "connecting"}});
        assert_eq!(parse(&connecting, "aeon"), None);
    }

    #[test]
    fn test_parse_qr_and_foreign_instance() {
        let qr = json!({
            "event": "qrcode.updated",
            "instance": "aeon",
            "data": {"qrcode": {"instance": "aeon", "code": "2@abc,def", "base64": "data:image/png;base64,AA"}}
        });
        assert_eq!(parse(&qr, "aeon"), Some(Webhook::Qr("2@abc,def".into())));
        assert_eq!(parse(&qr, "other"), None);

        assert_eq!(parse(&json!({"event": "messages.upsert"}), "aeon"), None);
        assert_eq!(parse(&json!({"data": {}}), "aeon"), None);
    }

    #[tokio::test]
    async fn test_read_request() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let body = r#"{"event":"qrcode.updated"}"#;
        client
            .write_all(
                format!(
                    "POST /webhook HTTP/1.1\r\nHost: x\r\ncontent-length: {}\r\n\r\n{body}",
                    body.len()
                )
                .as_bytes(),
            )
            .await
            .unwrap();

        let (line, read) = read_request(&mut server).await.unwrap();
        assert_eq!(line, "POST /webhook HTTP/1.1");
        assert_eq!(read, body.as_bytes());
    }

    #[tokio::test]
    async fn test_serve_forwards_events_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/webhook", listener.local_addr().unwrap());
        let api = EvolutionApi::new(&conf::Evolution {
            api_key: "secret".into(),
            ..Default::default()
        })
        .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(serve(listener, api, tx));

        let client = reqwest::Client::new();
        for payload in [
            json!({"event": "qrcode.updated", "instance": "aeon", "data": {"qrcode": {"code": "2@first"}}}),
            json!({"event": "connection.update", "instance": "someone-else", "data": {"state": "close", "statusReason": 401}}),
            json!({"event": "connection.update", "instance": "aeon", "data": {"state": "close", "statusReason": 515}}),
        ] {
            let resp = client.post(&url).json(&payload).send().await.unwrap();
            assert!(resp.status().is_success());
        }

        assert_eq!(rx.recv().await, Some(Event::Qr("2@first".into())));
        assert_eq!(
            rx.recv().await,
            Some(Event::Close {
                status_code: Some(515)
            })
        );
        task.abort();
    }
}
