use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a single run of an instrumented process.
///
/// A fresh `AppRun` is minted once per process unless `id` is inherited from
/// an environment variable so that a child process launched by an already
/// instrumented parent reports under the same run (see the SDK's
/// `OUTRIG_APP_RUN_ID` override).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRun {
    pub id: Uuid,
    pub app_name: String,
    pub module_name: String,
    pub pid: u32,
    pub started_at_unix_ms: i64,
    #[serde(default)]
    pub argv: Vec<String>,
}

impl AppRun {
    pub fn new(app_name: impl Into<String>, module_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            app_name: app_name.into(),
            module_name: module_name.into(),
            pid: std::process::id(),
            started_at_unix_ms: 0,
            argv: std::env::args().collect(),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_started_at(mut self, unix_ms: i64) -> Self {
        self.started_at_unix_ms = unix_ms;
        self
    }
}
