//! Configuration manager for activa.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::notifier::ChannelId;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_REPORT_INTERVAL_HOURS: u64 = 3;
const DEFAULT_GUIDE: &str = "Guide not available yet. Check back later or contact the operator.";
const DEFAULT_RULES: &str = "Rules not available yet. Check back later or contact the operator.";

fn default_apps() -> Vec<String> {
    ["paytmmoney", "angelone", "lemonn", "mstock", "upstox"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_screenshot_apps() -> Vec<String> {
    ["mstock", "angelone"].into_iter().map(String::from).collect()
}

fn default_report_interval() -> u64 {
    DEFAULT_REPORT_INTERVAL_HOURS
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

/// Process-wide immutable configuration, loaded once at startup and injected
/// into components. The app catalog, the screenshot-allowed subset, and the
/// operator identity are never re-read at runtime.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name, used in greetings.
    pub name: String,
    /// The single privileged identity allowed to review and administrate.
    pub operator: Option<ChannelId>,
    /// Channel where review surfaces are posted. Falls back to the operator
    /// identity when absent.
    pub review_channel: Option<ChannelId>,
    /// Directory holding the persisted record collections.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Ordered catalog of lowercase app identifiers offered for activation.
    #[serde(default = "default_apps")]
    pub apps: Vec<String>,
    /// Subset of `apps` whose proof may be a screenshot instead of a video.
    #[serde(default = "default_screenshot_apps")]
    pub screenshot_apps: Vec<String>,
    /// Optional files whose contents replace the built-in guide/rules text.
    pub(crate) guide_file: Option<PathBuf>,
    pub(crate) rules_file: Option<PathBuf>,
    /// How often CSV reports are pushed to the operator.
    #[serde(default = "default_report_interval")]
    pub report_interval_hours: u64,
    #[serde(default)]
    pub(crate) version: String,
    #[serde(skip)]
    pub(crate) path: PathBuf,
    #[serde(skip)]
    pub(crate) guide: String,
    #[serde(skip)]
    pub(crate) rules: String,
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location. A missing or unreadable file yields a default configuration
    /// so the process can still start.
    pub fn read(self) -> Arc<Self> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(file_path) {
            Ok(file) => {
                let mut config: Configuration = match serde_yaml::from_reader(file) {
                    Ok(config) => config,
                    Err(err) => {
                        return Arc::new(self.error(err));
                    },
                };

                config.version = VERSION.to_owned();
                config.load_texts();

                Arc::new(config)
            },
            Err(err) => Arc::new(self.error(err)),
        }
    }

    /// Whether `identity` is the configured operator.
    pub fn is_operator(&self, identity: ChannelId) -> bool {
        self.operator == Some(identity)
    }

    /// Where review surfaces go. The operator identity doubles as the review
    /// channel when none is configured.
    pub fn review_target(&self) -> Option<ChannelId> {
        self.review_channel.or(self.operator)
    }

    /// Whether `app` accepts a screenshot as proof; all other apps require a
    /// video recording.
    pub fn allows_screenshot(&self, app: &str) -> bool {
        self.screenshot_apps.iter().any(|a| a == app)
    }

    pub fn guide(&self) -> &str {
        &self.guide
    }

    pub fn rules(&self) -> &str {
        &self.rules
    }

    /// Read the guide/rules text files once; a missing file keeps the
    /// built-in placeholder.
    fn load_texts(&mut self) {
        self.guide = self
            .guide_file
            .as_ref()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .unwrap_or_else(|| DEFAULT_GUIDE.to_owned());
        self.rules = self
            .rules_file
            .as_ref()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .unwrap_or_else(|| DEFAULT_RULES.to_owned());
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found, using defaults");
        let mut config = Self {
            version: VERSION.to_owned(),
            data_dir: default_data_dir(),
            apps: default_apps(),
            screenshot_apps: default_screenshot_apps(),
            report_interval_hours: DEFAULT_REPORT_INTERVAL_HOURS,
            ..Default::default()
        };
        config.load_texts();
        config
    }
}
