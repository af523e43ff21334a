use std::path::Path;

use crate::gateway::{Connection, UserInfo};
use crate::outcome::Fatal;

use super::profile;

pub const GREETING: &str = "Thanks for using this bot!\nHave a great day!\nㅤㅤㅤㅤㅤㅤㅤㅤㅤ~ Aeon";

/// An open, authenticated connection plus the account behind it.
pub struct OnboardClient<'a, C> {
    conn: &'a C,
    user: UserInfo,
    bot_name: &'a str,
}

impl<'a, C: Connection> OnboardClient<'a, C> {
    pub fn new(conn: &'a C, user: UserInfo, bot_name: &'a str) -> Self {
        Self {
            conn,
            user,
            bot_name,
        }
    }

    pub fn display_name(&self) -> &str {
        self.user
            .name
            .as_deref()
            .filter(|name| !name.is_empty())
            .or(Some(self.bot_name).filter(|name| !name.is_empty()))
            .unwrap_or("Bot")
    }

    /// Greets the account and sets its profile picture. Only a missing
    /// profile folder, or one without images, is fatal.
    pub async fn onboard(&self, profile_dir: &Path) -> Result<(), Fatal> {
        tracing::info!("==========================");
        tracing::info!("• User Info");
        tracing::info!("- Name: {}", self.display_name());
        tracing::info!("- Number: {}", self.user.number());
        tracing::info!("- Status: Connected");
        tracing::info!("==========================");

        if let Err(e) = self.conn.send_text(&self.user.self_jid(), GREETING).await {
            tracing::error!("Failed to send self-message: {e:#}");
        }

        self.set_profile_picture(profile_dir).await
    }

    async fn set_profile_picture(&self, profile_dir: &Path) -> Result<(), Fatal> {
        let Some(path) = profile::find_image(profile_dir)? else {
            return Ok(());
        };
        tracing::info!("Profile picture selected: {path:?}");

        let jpeg = match tokio::task::spawn_blocking(move || profile::prepare(&path)).await {
            Ok(Ok(jpeg)) => jpeg,
            Ok(Err(e)) => {
                tracing::error!("Error setting profile picture: {e:#}");
                return Ok(());
            }
            Err(e) => {
                tracing::error!("Error setting profile picture: {e}");
                return Ok(());
            }
        };

        match self.conn.set_profile_picture(jpeg).await {
            Ok(()) => tracing::info!("Profile picture set successfully!"),
            Err(e) => tracing::error!("Error setting profile picture: {e:#}"),
        }
        Ok(())
    }

    pub async fn logout(&self) {
        match self.conn.logout().await {
            Ok(()) => tracing::info!("Logged out successfully!"),
            Err(e) => tracing::error!("Failed to log out: {e:#}"),
        }
    }
}
