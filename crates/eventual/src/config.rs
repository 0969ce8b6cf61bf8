pub const VAT_NAME_ENV: &str = "EVENTUAL_VAT_NAME";
pub const MAX_BUFFERED_ENV: &str = "EVENTUAL_MAX_BUFFERED";

const DEFAULT_VAT_NAME: &str = "vat";

/// Settings for one vat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VatConfig {
    /// Label attached to every log line the vat emits.
    pub name: String,
    /// Cap on sends a single postponing handler holds while its promise is
    /// unresolved. `None` buffers without bound.
    ///
    /// Only handled promises that are still unresolved are capped. Promises
    /// derived with `then` or `catch` have no unfulfilled handler: sends to
    /// them wait on settlement like any other reaction and are not counted.
    pub max_buffered_sends: Option<usize>,
}

impl Default for VatConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_VAT_NAME.to_owned(),
            max_buffered_sends: None,
        }
    }
}

impl VatConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| {
            lookup(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let mut config = Self::default();
        if let Some(name) = read(VAT_NAME_ENV) {
            config.name = name;
        }
        if let Some(raw) = read(MAX_BUFFERED_ENV) {
            match raw.parse::<usize>() {
                Ok(limit) => config.max_buffered_sends = Some(limit),
                Err(err) => {
                    tracing::warn!(%raw, %err, "ignoring malformed {MAX_BUFFERED_ENV}");
                }
            }
        }
        config
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_buffered_sends(mut self, limit: usize) -> Self {
        self.max_buffered_sends = Some(limit);
        self
    }
}
