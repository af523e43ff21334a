//! Interactive prompts and user-facing output.

use std::io::{self, Write};

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, BufReader, Stdin};

use crate::outcome::Fatal;

pub const MAX_ATTEMPTS: usize = 3;

static NON_DIGIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\D").unwrap());

/// Phone number entered for pairing. Immutable once validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingIdentity {
    country_code: String,
    phone: String,
}

impl PairingIdentity {
    pub fn e164(&self) -> String {
        format!("+{}", self.digits())
    }

    /// Country code and number as plain digits, as the gateway expects.
    pub fn digits(&self) -> String {
        format!("{}{}", self.country_code, self.phone)
    }
}

pub fn digits_only(input: &str) -> String {
    NON_DIGIT.replace_all(input.trim(), "").into_owned()
}

pub fn valid_country_code(digits: &str) -> bool {
    (1..=4).contains(&digits.len())
}

pub fn valid_phone(digits: &str) -> bool {
    (6..=15).contains(&digits.len())
}

/// Regroups a pairing code into hyphen-separated chunks of four.
pub fn format_pairing_code(code: &str) -> String {
    code.chars()
        .collect::<Vec<_>>()
        .chunks(4)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

pub struct Console<R, W> {
    input: R,
    output: W,
}

impl Console<BufReader<Stdin>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), io::stdout())
    }
}

impl<R: AsyncBufRead + Unpin, W: Write> Console<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Prints `prompt` and reads one line. A closed input reads as empty.
    pub async fn read(&mut self, prompt: &str) -> anyhow::Result<String> {
        self.output.write_all(prompt.as_bytes())?;
        self.output.flush()?;

        let mut line = String::new();
        self.input.read_line(&mut line).await?;
        Ok(line)
    }

    pub fn show(&mut self, line: &str) {
        if let Err(e) = writeln!(self.output, "{line}").and_then(|_| self.output.flush()) {
            tracing::warn!("failed to write to console: {e}");
        }
    }

    pub fn show_qr(&mut self, qr: &str) {
        self.show(&format!("Scan this QR code in WhatsApp: {qr}"));
        match render_qr(qr) {
            Ok(rendered) => self.show(&rendered),
            Err(e) => tracing::debug!("cannot render QR code: {e}"),
        }
    }

    /// Asks for country code and phone number, up to [`MAX_ATTEMPTS`] rounds.
    /// A bad answer to either question restarts the round.
    pub async fn pairing_identity(&mut self) -> Result<PairingIdentity, Fatal> {
        let mut failed = "country code";

        for attempt in 1..=MAX_ATTEMPTS {
            let country_code =
                digits_only(&self.read("Enter your country code (e.g., 91 for India): ").await?);
            if !valid_country_code(&country_code) {
                tracing::debug!("rejected country code on attempt {attempt}");
                self.show("Invalid country code! Try again.");
                failed = "country code";
                continue;
            }

            let phone = digits_only(&self.read("Enter your phone number (without country code): ").await?);
            if !valid_phone(&phone) {
                tracing::debug!("rejected phone number on attempt {attempt}");
                self.show("Invalid phone number! Try again.");
                failed = "phone number";
                continue;
            }

            return Ok(PairingIdentity {
                country_code,
                phone,
            });
        }

        self.show(&format!("Tried {MAX_ATTEMPTS} times, exiting!"));
        Err(Fatal::PairingInput(failed))
    }
}

/// Renders a QR payload with Unicode half blocks, two module rows per line.
fn render_qr(data: &str) -> Result<String, qrcode::types::QrError> {
    use qrcode::{Color, EcLevel, QrCode};

    let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::L)?;
    let width = code.width();
    let colors = code.into_colors();
    let is_dark = |row: usize, col: usize| row < width && colors[row * width + col] == Color::Dark;

    let mut out = String::new();
    for row in (0..width).step_by(2) {
        for col in 0..width {
            out.push(match (is_dark(row, col), is_dark(row + 1, col)) {
                (true, true) => '█',
                (true, false) => '▀',
                (false, true) => '▄',
                (false, false) => ' ',
            });
        }
        out.push('\n');
    }
    Ok(out)
}
