//! Propagates text/JSON output mode through a small context value, read
//! once at startup from `GOG_JSON`/`GOG_PLAIN`.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Text,
    Json,
}

impl OutputMode {
    /// Resolve from the environment: `GOG_JSON` wins over `GOG_PLAIN`;
    /// neither set means `Text`.
    pub fn from_env() -> Self {
        Self::resolve(
            std::env::var("GOG_JSON").ok().as_deref(),
            std::env::var("GOG_PLAIN").ok().as_deref(),
        )
    }

    pub fn resolve(json_flag: Option<&str>, plain_flag: Option<&str>) -> Self {
        if is_truthy(json_flag) {
            OutputMode::Json
        } else if is_truthy(plain_flag) {
            OutputMode::Text
        } else {
            OutputMode::Text
        }
    }

    pub fn is_json(self) -> bool {
        matches!(self, OutputMode::Json)
    }
}

fn is_truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "y" | "on")
    )
}

/// Context threaded through a command invocation; grows if more
/// request-scoped state is needed later (e.g. a selected `--account`).
#[derive(Debug, Clone, Copy)]
pub struct OutputContext {
    pub mode: OutputMode,
}

impl OutputContext {
    pub fn from_env() -> Self {
        OutputContext {
            mode: OutputMode::from_env(),
        }
    }
}
