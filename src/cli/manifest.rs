use std::path::PathBuf;

use serde::Serialize;

pub const HOST_NAME: &str = "com.timespent.host";

/// The host binary lives next to the cli binary.
pub fn to_host_path(mut path: PathBuf) -> PathBuf {
    path.set_file_name("timespent-host");
    #[cfg(windows)]
    {
        path.set_extension("exe");
    }
    path
}

/// Native messaging host manifest. The browser reads it to find out how to launch the host and
/// which extensions may talk to it.
#[derive(Debug, Serialize)]
pub struct HostManifest {
    pub name: &'static str,
    pub description: &'static str,
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub allowed_origins: Vec<String>,
}

impl HostManifest {
    pub fn new(host_path: PathBuf, extension_ids: &[String]) -> Self {
        Self {
            name: HOST_NAME,
            description: env!("CARGO_PKG_DESCRIPTION"),
            path: host_path,
            kind: "stdio",
            allowed_origins: extension_ids
                .iter()
                .map(|id| format!("chrome-extension://{id}/"))
                .collect(),
        }
    }
}
