mod client;
mod close;
mod console;
mod profile;

use std::{io::Write, pin::pin, time::Duration};

use client::OnboardClient;
use close::CloseAction;
use futures_util::future::{Either, select};
use tokio::{
    io::AsyncBufRead,
    time::{Instant, sleep, sleep_until},
};

pub use console::Console;
use console::PairingIdentity;

use crate::{
    conf::{AuthMethod, Conf},
    gateway::{ConnectOptions, Connection, Event, Gateway, UserInfo, VersionInfo, version},
    outcome::{Fatal, Outcome},
    session,
};

/// Wait between connecting and asking for a pairing code.
pub const PAIRING_CODE_DELAY: Duration = Duration::from_millis(3000);
/// Wait before bootstrapping again after a transient close.
pub const RETRY_DELAY: Duration = Duration::from_millis(5000);

/// State carried across bootstrap attempts for the lifetime of the process.
#[derive(Debug, Default)]
pub struct BootstrapContext {
    identity: Option<PairingIdentity>,
}

enum Attempt {
    Done(Outcome),
    Retry,
}

pub struct OnboardBot<G, R, W> {
    conf: Conf,
    gateway: G,
    console: Console<R, W>,
}

impl<G, R, W> OnboardBot<G, R, W>
where
    G: Gateway,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    pub fn new(conf: Conf, gateway: G, console: Console<R, W>) -> Self {
        Self {
            conf,
            gateway,
            console,
        }
    }

    /// Bootstraps until onboarding completes or something fatal happens.
    /// Ctrl-C ends the run at any point, prompts included.
    pub async fn run(self) -> Outcome {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("cannot listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Like [`run`](Self::run), but stops as [`Fatal::Interrupted`] once
    /// `shutdown` resolves.
    pub async fn run_until(mut self, shutdown: impl Future) -> Outcome {
        let mut ctx = BootstrapContext::default();
        let mut delay = None;
        let mut shutdown = pin!(shutdown);

        loop {
            let attempt = {
                let attempt = pin!(async {
                    if let Some(delay) = delay {
                        sleep(delay).await;
                    }
                    self.attempt(&mut ctx).await
                });

                match select(shutdown.as_mut(), attempt).await {
                    Either::Left(_) => return Fatal::Interrupted.into(),
                    Either::Right((attempt, _)) => attempt,
                }
            };

            match attempt {
                Ok(Attempt::Done(outcome)) => return outcome,
                Ok(Attempt::Retry) => {
                    tracing::info!(
                        "Connection closed, retrying in {}...",
                        humantime::format_duration(RETRY_DELAY)
                    );
                    delay = Some(RETRY_DELAY);
                }
                Err(e) => {
                    tracing::error!("Something went wrong: {e:#}");
                    return Fatal::Startup(e).into();
                }
            }
        }
    }

    async fn attempt(&mut self, ctx: &mut BootstrapContext) -> anyhow::Result<Attempt> {
        let pairing = self.conf.auth_method == AuthMethod::Pairing;

        if pairing && ctx.identity.is_none() {
            match self.console.pairing_identity().await {
                Ok(identity) => {
                    tracing::info!("Pairing {}", identity.e164());
                    ctx.identity = Some(identity);
                }
                Err(fatal) => return Ok(Attempt::Done(fatal.into())),
            }
        }

        let VersionInfo { version, is_latest } = version::fetch_latest(&self.conf.version_url).await;
        tracing::info!("Using WhatsApp v{version}, isLatest: {is_latest}");

        let (conn, mut events) = self.gateway.connect(ConnectOptions { pairing }).await?;

        let mut pairing_at =
            (pairing && !conn.registered()).then(|| Instant::now() + PAIRING_CODE_DELAY);

        loop {
            let event = tokio::select! {
                _ = sleep_until(pairing_at.unwrap_or_else(Instant::now)), if pairing_at.is_some() => {
                    pairing_at = None;
                    self.request_pairing_code(&conn, ctx).await;
                    continue;
                }
                event = events.recv() => event,
            };

            // A vanished event stream is a close without a status code.
            let event = event.unwrap_or(Event::Close { status_code: None });

            match event {
                Event::Qr(qr) => {
                    if self.conf.auth_method == AuthMethod::Qr {
                        self.console.show_qr(&qr);
                    }
                }
                Event::Open(user) => {
                    return Ok(Attempt::Done(self.on_open(&conn, user).await));
                }
                Event::Close { status_code } => {
                    return Ok(self.on_close(status_code, ctx).await);
                }
            }
        }
    }

    async fn request_pairing_code<C: Connection>(&mut self, conn: &C, ctx: &BootstrapContext) {
        let Some(identity) = &ctx.identity else {
            return;
        };

        match conn.request_pairing_code(&identity.digits()).await {
            Ok(code) => self.console.show(&format!(
                "Your pairing code: {}",
                console::format_pairing_code(&code)
            )),
            Err(e) => tracing::error!("Failed to request pairing code: {e:#}"),
        }
    }

    async fn on_open<C: Connection>(&self, conn: &C, user: UserInfo) -> Outcome {
        let client = OnboardClient::new(conn, user, &self.conf.bot_name);
        if let Err(fatal) = client.onboard(&self.conf.profile_dir()).await {
            tracing::error!("{fatal}");
            return fatal.into();
        }

        client.logout().await;
        session::wipe(&self.conf.session_dir()).await;
        tracing::info!("Done! Exiting now...");
        Outcome::Completed
    }

    async fn on_close(&self, status_code: Option<u16>, ctx: &mut BootstrapContext) -> Attempt {
        let action = close::classify(status_code);
        let code = status_code.unwrap_or(0);

        match action {
            CloseAction::Retry => {
                tracing::warn!("connection closed: {} ({code})", close::reason_name(code));
                return Attempt::Retry;
            }
            CloseAction::LoggedOut => tracing::error!("Device logged out. Cleaning session..."),
            CloseAction::ConcurrentSession => {
                tracing::error!("New session opened elsewhere. Close it first!")
            }
            CloseAction::BadSession => {
                tracing::error!("Session corrupted, delete and re-authenticate!")
            }
            CloseAction::Unknown(code) => tracing::error!("Unknown error: {code}"),
        }

        if action.wipes_session() {
            session::wipe(&self.conf.session_dir()).await;
        }
        if action.clears_identity() {
            ctx.identity = None;
        }

        match action.fatal() {
            Some(fatal) => Attempt::Done(fatal.into()),
            None => Attempt::Retry,
        }
    }
}
