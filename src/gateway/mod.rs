//! Seam to the chat-protocol gateway.
//!
//! The protocol itself (session crypto, credential storage, framing,
//! reconnects) lives behind [`Gateway`] and [`Connection`].
//! [`evolution::EvolutionGateway`] drives an Evolution API server; tests
//! drive the bot with an in-memory one.

pub mod evolution;
pub mod version;
mod webhook;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use version::VersionInfo;

/// Server part of a user address.
pub const USER_SERVER: &str = "s.whatsapp.net";

/// Ordered stream of connection events.
pub type EventStream = mpsc::UnboundedReceiver<Event>;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A new QR payload to scan.
    Qr(String),
    Open(UserInfo),
    Close { status_code: Option<u16> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    /// Account address, e.g. `15551234567:12@s.whatsapp.net`.
    pub id: String,
    pub name: Option<String>,
}

impl UserInfo {
    /// Phone number part of the address, without device or server.
    pub fn number(&self) -> &str {
        let end = self.id.find([':', '@']).unwrap_or(self.id.len());
        &self.id[..end]
    }

    /// Address of the account itself, for self-messages.
    pub fn self_jid(&self) -> String {
        format!("{}@{}", self.number(), USER_SERVER)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectOptions {
    /// Link with a pairing code instead of a QR code.
    pub pairing: bool,
}

#[async_trait]
pub trait Connection: Send + Sync {
    /// Whether the restored session was already linked when connecting.
    fn registered(&self) -> bool;

    /// Requests a pairing code for `phone` (digits only, with country code).
    async fn request_pairing_code(&self, phone: &str) -> anyhow::Result<String>;

    async fn send_text(&self, jid: &str, text: &str) -> anyhow::Result<()>;

    /// Uploads a JPEG as the account's profile picture.
    async fn set_profile_picture(&self, jpeg: Vec<u8>) -> anyhow::Result<()>;

    async fn logout(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Gateway: Send + Sync {
    type Conn: Connection;

    async fn connect(&self, opts: ConnectOptions) -> anyhow::Result<(Self::Conn, EventStream)>;
}
