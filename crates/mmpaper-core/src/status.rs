//! Short full-screen messages shown while an update runs.

use heapless::{String, Vec};

pub const MAX_LINES: usize = 3;
pub const LINE_MAX_BYTES: usize = 40;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusStyle {
    /// Boot screen: large title, version, footer.
    Splash,
    /// Centered message lines.
    Notice,
}

/// A message drawn on a cleared screen with a full refresh.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusMessage {
    pub style: StatusStyle,
    lines: Vec<String<LINE_MAX_BYTES>, MAX_LINES>,
    /// How long the message should stay readable before the cycle moves on.
    pub hold_ms: u32,
}

impl StatusMessage {
    /// Builds a notice; lines beyond [`MAX_LINES`] are dropped and long
    /// lines are cut at a character boundary.
    pub fn notice(lines: &[&str], hold_ms: u32) -> Self {
        Self::build(StatusStyle::Notice, lines, hold_ms)
    }

    pub fn splash(version: &str) -> Self {
        let mut tag: String<LINE_MAX_BYTES> = String::new();
        let _ = tag.push('v');
        push_truncated(&mut tag, version);
        Self::build(
            StatusStyle::Splash,
            &["MMpaper", tag.as_str(), "Auto-updating e-ink app"],
            0,
        )
    }

    pub fn checking() -> Self {
        Self::notice(&["Checking for updates..."], 0)
    }

    pub fn no_network() -> Self {
        Self::notice(&["No WiFi - Starting app"], 1_000)
    }

    pub fn update_found() -> Self {
        Self::notice(&["Update found!", "Downloading..."], 0)
    }

    pub fn download_failed() -> Self {
        Self::notice(&["Download failed!", "Starting old version..."], 2_000)
    }

    pub fn installing() -> Self {
        Self::notice(&["Installing..."], 0)
    }

    pub fn update_successful() -> Self {
        Self::notice(
            &["Update successful!", "Restarting...", "Launcher will load new version"],
            3_000,
        )
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    fn build(style: StatusStyle, lines: &[&str], hold_ms: u32) -> Self {
        let mut out = Vec::new();
        for line in lines.iter().take(MAX_LINES) {
            let mut owned = String::new();
            push_truncated(&mut owned, line);
            let _ = out.push(owned);
        }
        Self {
            style,
            lines: out,
            hold_ms,
        }
    }
}

fn push_truncated<const N: usize>(out: &mut String<N>, text: &str) {
    for ch in text.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
}
