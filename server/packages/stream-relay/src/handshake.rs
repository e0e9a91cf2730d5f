use std::sync::LazyLock;

use regex::Regex;

static SANDBOX_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Sandbox created: ([a-f0-9-]+)").unwrap());

static PREVIEW_URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Preview URL: (https://\S+)").unwrap());

/// Identifiers recovered from the helper's human-readable log lines.
///
/// One instance lives for exactly one generation request. The first match
/// of each pattern wins; later matches are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxHandshakeState {
    sandbox_id: Option<String>,
    preview_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandshakeUpdate {
    pub sandbox_id: bool,
    pub preview_url: bool,
}

impl SandboxHandshakeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans one progress line and records any identifier not seen before.
    pub fn observe(&mut self, line: &str) -> HandshakeUpdate {
        let mut update = HandshakeUpdate::default();

        if self.sandbox_id.is_none() {
            if let Some(captures) = SANDBOX_ID_REGEX.captures(line) {
                self.sandbox_id = Some(captures[1].to_string());
                update.sandbox_id = true;
            }
        }

        if self.preview_url.is_none() {
            if let Some(captures) = PREVIEW_URL_REGEX.captures(line) {
                self.preview_url = Some(captures[1].to_string());
                update.preview_url = true;
            }
        }

        update
    }

    pub fn sandbox_id(&self) -> Option<&str> {
        self.sandbox_id.as_deref()
    }

    pub fn preview_url(&self) -> Option<&str> {
        self.preview_url.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.preview_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_sandbox_id_embedded_in_text() {
        let mut state = SandboxHandshakeState::new();
        let update =
            state.observe("✓ Sandbox created: 7a517a82-942c-486b-8a62-6357773eb3ea (public)");
        assert!(update.sandbox_id);
        assert_eq!(
            state.sandbox_id(),
            Some("7a517a82-942c-486b-8a62-6357773eb3ea")
        );
        assert_eq!(state.preview_url(), None);
    }

    #[test]
    fn preview_url_stops_at_whitespace() {
        let mut state = SandboxHandshakeState::new();
        state.observe("Preview URL: https://3000-abc.example.com ready");
        assert_eq!(state.preview_url(), Some("https://3000-abc.example.com"));
        assert!(state.is_complete());
    }

    #[test]
    fn rejects_non_https_preview_urls() {
        let mut state = SandboxHandshakeState::new();
        state.observe("Preview URL: http://insecure.example.com");
        state.observe("Preview URL:https://missing-space.example.com");
        assert_eq!(state.preview_url(), None);
    }

    #[test]
    fn first_match_wins() {
        let mut state = SandboxHandshakeState::new();
        state.observe("Sandbox created: aaaa-1111");
        state.observe("Preview URL: https://first.example.com");
        let update = state.observe("Sandbox created: bbbb-2222 Preview URL: https://second.example.com");
        assert_eq!(update, HandshakeUpdate::default());
        assert_eq!(state.sandbox_id(), Some("aaaa-1111"));
        assert_eq!(state.preview_url(), Some("https://first.example.com"));
    }

    #[test]
    fn uppercase_ids_are_not_hex_tokens() {
        let mut state = SandboxHandshakeState::new();
        state.observe("Sandbox created: ZZZ");
        assert_eq!(state.sandbox_id(), None);
    }
}
