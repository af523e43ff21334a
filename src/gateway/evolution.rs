//! Gateway backed by a self-hosted [Evolution API](https://doc.evolution-api.com)
//! server (v1.8). Evolution owns the WhatsApp socket and its credential
//! store; we drive it over REST and receive connection events through a
//! local webhook.

use std::time::Duration;

use anyhow::{Context as _, anyhow, bail};
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle};

use super::{Connection, ConnectOptions, Event, EventStream, Gateway, UserInfo, webhook};
use crate::conf;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const WEBHOOK_EVENTS: [&str; 2] = ["QRCODE_UPDATED", "CONNECTION_UPDATE"];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectResponse {
    #[serde(default)]
    pairing_code: Option<String>,
    /// Raw QR payload.
    #[serde(default)]
    code: Option<String>,
}

/// Thin REST client for one Evolution instance.
#[derive(Clone)]
pub struct EvolutionApi {
    client: Client,
    base_url: String,
    api_key: String,
    instance: String,
}

impl EvolutionApi {
    pub fn new(conf: &conf::Evolution) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: conf.api_url.trim_end_matches('/').to_string(),
            api_key: conf.api_key.clone(),
            instance: conf.instance.clone(),
        })
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{path}", self.base_url))
            .header("apikey", &self.api_key)
    }

    fn instance_request(&self, method: Method, path: &str) -> RequestBuilder {
        self.request(method, &format!("{path}/{}", self.instance))
    }

    async fn call_raw(&self, req: RequestBuilder, what: &str) -> anyhow::Result<(StatusCode, String)> {
        let resp = req
            .send()
            .await
            .with_context(|| format!("{what}: Evolution API unreachable"))?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        tracing::debug!("[evolution] {what} [{status}]: {}", truncate(&text, 300));
        Ok((status, text))
    }

    async fn call(&self, req: RequestBuilder, what: &str) -> anyhow::Result<Value> {
        let (status, text) = self.call_raw(req, what).await?;
        if !status.is_success() {
            bail!("{what} failed ({status}): {}", truncate(&text, 300));
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
    }

    /// Creates the instance, reusing it when the name is already taken.
    pub async fn create_instance(&self, qrcode: bool) -> anyhow::Result<()> {
        let req = self.request(Method::POST, "instance/create").json(&json!({
            "instanceName": self.instance,
            "qrcode": qrcode,
        }));
        let (status, text) = self.call_raw(req, "create instance").await?;
        if status.is_success() {
            tracing::info!("[evolution] Created instance {}", self.instance);
            return Ok(());
        }
        let lower = text.to_lowercase();
        if lower.contains("already in use") || lower.contains("already exists") {
            tracing::debug!("[evolution] Reusing instance {}", self.instance);
            return Ok(());
        }
        bail!("create instance failed ({status}): {}", truncate(&text, 300))
    }

    pub async fn set_webhook(&self, url: &str) -> anyhow::Result<()> {
        let req = self.instance_request(Method::POST, "webhook/set").json(&json!({
            "url": url,
            "enabled": true,
            "webhook_by_events": false,
            "webhook_base64": false,
            "events": WEBHOOK_EVENTS,
        }));
        self.call(req, "set webhook").await.map(drop)
    }

    /// `open`, `connecting` or `close`.
    pub async fn connection_state(&self) -> anyhow::Result<String> {
        let body = self
            .call(
                self.instance_request(Method::GET, "instance/connectionState"),
                "connection state",
            )
            .await?;
        body["instance"]["state"]
            .as_str()
            .or_else(|| body["state"].as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("connection state missing from response"))
    }

    /// Starts a login. With `number`, Evolution answers with a pairing code.
    async fn connect(&self, number: Option<&str>) -> anyhow::Result<ConnectResponse> {
        let mut req = self.instance_request(Method::GET, "instance/connect");
        if let Some(number) = number {
            req = req.query(&[("number", number)]);
        }
        let body = self.call(req, "connect").await?;
        Ok(serde_json::from_value(body).unwrap_or_default())
    }

    pub async fn fetch_owner(&self) -> anyhow::Result<UserInfo> {
        let req = self
            .request(Method::GET, "instance/fetchInstances")
            .query(&[("instanceName", self.instance.as_str())]);
        let body = self.call(req, "fetch instance").await?;
        parse_owner(&body).ok_or_else(|| anyhow!("instance {} has no owner yet", self.instance))
    }

    pub async fn send_text(&self, number: &str, text: &str) -> anyhow::Result<()> {
        let req = self.instance_request(Method::POST, "message/sendText").json(&json!({
            "number": number,
            "options": { "delay": 0 },
            "textMessage": { "text": text },
        }));
        self.call(req, "send text").await.map(drop)
    }

    pub async fn update_profile_picture(&self, jpeg: &[u8]) -> anyhow::Result<()> {
        let picture = base64::engine::general_purpose::STANDARD.encode(jpeg);
        let req = self
            .instance_request(Method::PUT, "chat/updateProfilePicture")
            .json(&json!({ "picture": picture }));
        self.call(req, "update profile picture").await.map(drop)
    }

    pub async fn logout(&self) -> anyhow::Result<()> {
        self.call(self.instance_request(Method::DELETE, "instance/logout"), "logout")
            .await
            .map(drop)
    }
}

/// Reads the account from a `fetchInstances` answer. v1 nests it under
/// `instance.owner`, v2 flattens it to `ownerJid`.
fn parse_owner(body: &Value) -> Option<UserInfo> {
    let entry = match body {
        Value::Array(items) => items.first()?,
        other => other,
    };
    let inner = if entry["instance"].is_object() {
        &entry["instance"]
    } else {
        entry
    };
    let id = inner["owner"]
        .as_str()
        .or_else(|| inner["ownerJid"].as_str())
        .filter(|id| !id.is_empty())?;
    let name = inner["profileName"]
        .as_str()
        .filter(|name| !name.is_empty())
        .map(str::to_string);
    Some(UserInfo {
        id: id.to_string(),
        name,
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

pub struct EvolutionGateway {
    api: EvolutionApi,
    webhook_port: u16,
    webhook_url: String,
}

impl EvolutionGateway {
    pub fn new(conf: &conf::Evolution) -> anyhow::Result<Self> {
        Ok(Self {
            api: EvolutionApi::new(conf)?,
            webhook_port: conf.webhook_port,
            webhook_url: conf.webhook_url.clone(),
        })
    }
}

pub struct EvolutionConnection {
    api: EvolutionApi,
    registered: bool,
    webhook: JoinHandle<()>,
}

impl Drop for EvolutionConnection {
    fn drop(&mut self) {
        self.webhook.abort();
    }
}

#[async_trait]
impl Gateway for EvolutionGateway {
    type Conn = EvolutionConnection;

    async fn connect(&self, opts: ConnectOptions) -> anyhow::Result<(Self::Conn, EventStream)> {
        let listener = TcpListener::bind(("0.0.0.0", self.webhook_port))
            .await
            .with_context(|| format!("failed to bind webhook port {}", self.webhook_port))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut conn = EvolutionConnection {
            api: self.api.clone(),
            registered: false,
            webhook: tokio::spawn(webhook::serve(listener, self.api.clone(), tx.clone())),
        };

        self.api.create_instance(!opts.pairing).await?;
        self.api.set_webhook(&self.webhook_url).await?;

        let state = self.api.connection_state().await?;
        tracing::debug!("[evolution] instance {} is {state}", self.api.instance());
        conn.registered = state == "open";

        if conn.registered {
            let _ = tx.send(Event::Open(self.api.fetch_owner().await?));
        } else if !opts.pairing
            && let Some(code) = self.api.connect(None).await?.code
        {
            let _ = tx.send(Event::Qr(code));
        }

        Ok((conn, rx))
    }
}

#[async_trait]
impl Connection for EvolutionConnection {
    fn registered(&self) -> bool {
        self.registered
    }

    async fn request_pairing_code(&self, phone: &str) -> anyhow::Result<String> {
        self.api
            .connect(Some(phone))
            .await?
            .pairing_code
            .ok_or_else(|| anyhow!("Evolution returned no pairing code"))
    }

    async fn send_text(&self, jid: &str, text: &str) -> anyhow::Result<()> {
        let number = jid.split(['@', ':']).next().unwrap_or(jid);
        self.api.send_text(number, text).await
    }

    async fn set_profile_picture(&self, jpeg: Vec<u8>) -> anyhow::Result<()> {
        self.api.update_profile_picture(&jpeg).await
    }

    async fn logout(&self) -> anyhow::Result<()> {
        self.api.logout().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use tokio::io::AsyncWriteExt as _;

    type Seen = Arc<Mutex<Vec<(String, Value)>>>;

    /// Answers each request with the first route whose key prefixes
    /// `METHOD /path`. Unrouted requests get 404.
    async fn fake_evolution(routes: Vec<(&'static str, u16, Value)>) -> (String, Seen) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let seen = Seen::default();
        let log = seen.clone();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                let (line, body) = webhook::read_request(&mut stream).await.unwrap();
                let target = line.rsplit_once(' ').map_or(line.as_str(), |(t, _)| t).to_string();
                log.lock()
                    .unwrap()
                    .push((target.clone(), serde_json::from_slice(&body).unwrap_or(Value::Null)));
                let (status, reply) = routes
                    .iter()
                    .find(|(key, _, _)| target.starts_with(key))
                    .map_or((404, json!({})), |(_, s, v)| (*s, v.clone()));
                let reply = reply.to_string();
                let resp = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
                    reply.len()
                );
                stream.write_all(resp.as_bytes()).await.unwrap();
            }
        });
        (base, seen)
    }

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn evolution_conf(api_url: String, webhook_port: u16) -> conf::Evolution {
        conf::Evolution {
            api_url,
            api_key: "secret".into(),
            instance: "aeon".into(),
            webhook_port,
            webhook_url: "http://localhost/webhook".into(),
        }
    }

    #[test]
    fn test_parse_owner_shapes() {
        let v1 = json!([{"instance": {"instanceName": "aeon", "owner": "15551234567@s.whatsapp.net", "profileName": "Aeon", "status": "open"}}]);
        assert_eq!(
            parse_owner(&v1),
            Some(UserInfo {
                id: "15551234567@s.whatsapp.net".into(),
                name: Some("Aeon".into()),
            })
        );

        let v2 = json!([{"name": "aeon", "ownerJid": "15551234567@s.whatsapp.net", "profileName": ""}]);
        assert_eq!(
            parse_owner(&v2),
            Some(UserInfo {
                id: "15551234567@s.whatsapp.net".into(),
                name: None,
            })
        );

        assert_eq!(parse_owner(&json!([])), None);
        assert_eq!(parse_owner(&json!([{"instance": {"status": "close"}}])), None);
    }

    #[tokio::test]
    async fn test_qr_connect_reuses_instance_and_forwards_webhooks() {
        let (base, seen) = fake_evolution(vec![
            (
                "POST /instance/create",
                403,
                json!({"status": 403, "response": {"message": ["This name \"aeon\" is already in use."]}}),
            ),
            ("POST /webhook/set/aeon", 201, json!({"webhook": {"enabled": true}})),
            ("GET /instance/connectionState/aeon", 200, json!({"instance": {"instanceName": "aeon", "state": "close"}})),
            ("GET /instance/connect/aeon", 200, json!({"code": "2@qr", "base64": "data:image/png;base64,AA", "count": 1})),
        ])
        .await;
        let port = free_port().await;
        let gateway = EvolutionGateway::new(&evolution_conf(base, port)).unwrap();

        let (conn, mut events) = gateway.connect(ConnectOptions { pairing: false }).await.unwrap();
        assert!(!conn.registered());
        assert_eq!(events.recv().await, Some(Event::Qr("2@qr".into())));

        reqwest::Client::new()
            .post(format!("http://127.0.0.1:{port}/webhook"))
            .json(&json!({"event": "connection.update", "instance": "aeon", "data": {"state": "close", "statusReason": 401}}))
            .send()
            .await
            .unwrap();
        assert_eq!(
            events.recv().await,
            Some(Event::Close {
                status_code: Some(401)
            })
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].1["instanceName"], "aeon");
        assert_eq!(seen[0].1["qrcode"], true);
        assert_eq!(seen[1].1["events"], json!(WEBHOOK_EVENTS));
    }

    #[tokio::test]
    async fn test_registered_instance_opens_and_talks() {
        let (base, seen) = fake_evolution(vec![
            ("POST /instance/create", 201, json!({"instance": {"instanceName": "aeon"}})),
            ("POST /webhook/set/aeon", 201, json!({})),
            ("GET /instance/connectionState/aeon", 200, json!({"state": "open"})),
            (
                "GET /instance/fetchInstances",
                200,
                json!([{"instance": {"owner": "15551234567@s.whatsapp.net", "profileName": "Aeon"}}]),
            ),
            ("POST /message/sendText/aeon", 201, json!({"key": {"id": "1"}})),
            ("PUT /chat/updateProfilePicture/aeon", 200, json!({"update": "success"})),
            ("DELETE /instance/logout/aeon", 200, json!({"status": "SUCCESS"})),
        ])
        .await;
        let gateway = EvolutionGateway::new(&evolution_conf(base, free_port().await)).unwrap();

        let (conn, mut events) = gateway.connect(ConnectOptions { pairing: true }).await.unwrap();
        assert!(conn.registered());
        let Some(Event::Open(user)) = events.recv().await else {
            panic!("expected open");
        };
        assert_eq!(user.name.as_deref(), Some("Aeon"));

        conn.send_text(&user.self_jid(), "hi").await.unwrap();
        conn.set_profile_picture(vec![0xff, 0xd8]).await.unwrap();
        conn.logout().await.unwrap();

        let seen = seen.lock().unwrap();
        let send = seen.iter().find(|(t, _)| t.starts_with("POST /message")).unwrap();
        assert_eq!(send.1["number"], "15551234567");
        assert_eq!(send.1["textMessage"]["text"], "hi");
        let picture = seen.iter().find(|(t, _)| t.starts_with("PUT ")).unwrap();
        assert_eq!(picture.1["picture"], "/9g=");
        assert!(seen.iter().any(|(t, _)| t == "DELETE /instance/logout/aeon"));
    }

    #[tokio::test]
    async fn test_pairing_code_request() {
        let (base, seen) = fake_evolution(vec![(
            "GET /instance/connect/aeon",
            200,
            json!({"pairingCode": "ABCD1234", "code": "2@qr", "count": 1}),
        )])
        .await;
        let api = EvolutionApi::new(&evolution_conf(base, 0)).unwrap();
        let conn = EvolutionConnection {
            api,
            registered: false,
            webhook: tokio::spawn(async {}),
        };

        assert_eq!(conn.request_pairing_code("15551234567").await.unwrap(), "ABCD1234");
        assert_eq!(seen.lock().unwrap()[0].0, "GET /instance/connect/aeon?number=15551234567");
    }

    #[tokio::test]
    async fn test_failed_request_returns_promptly() {
        let api = EvolutionApi::new(&evolution_conf("http://127.0.0.1:9".into(), 0)).unwrap();
        let start = std::time::Instant::now();
        assert!(api.send_text("15551234567", "hi").await.is_err());
        assert!(api.create_instance(true).await.is_err());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("ㅤㅤㅤ", 2), "ㅤㅤ");
        assert_eq!(truncate("ok", 10), "ok");
    }
}
