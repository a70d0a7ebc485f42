//! Test doubles for the update pipeline.

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::Mutex;

use async_trait::async_trait;

use super::launcher::{LaunchRequest, ProcessLauncher};
use super::transport::{FetchResponse, Transport};

/// Serves canned responses and records every requested resource.
#[derive(Default)]
pub struct StaticTransport {
    responses: Mutex<HashMap<String, FetchResponse>>,
    pending: Mutex<Vec<String>>,
    requests: Mutex<Vec<String>>,
}

impl StaticTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, resource: &str, bytes: Vec<u8>) {
        self.respond(resource, FetchResponse::ok(bytes));
    }

    pub fn respond(&self, resource: &str, response: FetchResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(resource.to_string(), response);
    }

    /// Makes fetches of `resource` never complete.
    pub fn hang(&self, resource: &str) {
        self.pending.lock().unwrap().push(resource.to_string());
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for StaticTransport {
    async fn fetch(&self, resource: &str) -> FetchResponse {
        self.requests.lock().unwrap().push(resource.to_string());

        let hangs = self.pending.lock().unwrap().iter().any(|r| r == resource);
        if hangs {
            futures::future::pending::<()>().await;
        }

        self.responses
            .lock()
            .unwrap()
            .get(resource)
            .cloned()
            .unwrap_or_else(|| FetchResponse {
                status: super::transport::FetchStatus::Success,
                response_code: 404,
                bytes: None,
                detail: None,
            })
    }
}

/// Transport whose fetches never complete.
pub struct PendingTransport;

#[async_trait]
impl Transport for PendingTransport {
    async fn fetch(&self, _resource: &str) -> FetchResponse {
        futures::future::pending().await
    }
}

/// Records launch requests instead of starting processes.
#[derive(Default)]
pub struct RecordingLauncher {
    fail: bool,
    launched: Mutex<Vec<LaunchRequest>>,
}

impl RecordingLauncher {
    pub fn failing() -> Self {
        Self {
            fail: true,
            launched: Mutex::new(Vec::new()),
        }
    }

    pub fn launched(&self) -> Vec<LaunchRequest> {
        self.launched.lock().unwrap().clone()
    }
}

impl ProcessLauncher for RecordingLauncher {
    fn launch(&self, request: &LaunchRequest) -> std::io::Result<()> {
        if self.fail {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "launch refused",
            ));
        }
        self.launched.lock().unwrap().push(request.clone());
        Ok(())
    }
}

/// Builds an in-memory zip. `None` contents add a directory entry.
pub fn build_zip(entries: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for (name, contents) in entries {
        match contents {
            Some(data) => {
                zip.start_file(*name, options).unwrap();
                zip.write_all(data).unwrap();
            }
            None => zip.add_directory(*name, options).unwrap(),
        }
    }

    zip.finish().unwrap().into_inner()
}

/// Knobs for [`manifest_xml`].
#[derive(Debug, Clone, Default)]
pub struct ManifestSpec {
    pub version: Option<String>,
    pub runtime: Option<u32>,
    pub linux_app: Option<String>,
    pub linux_full: Option<String>,
    /// `(copy, checksum, id)` of the Linux instruction.
    pub linux_instruction: Option<(String, Option<String>, Option<u32>)>,
    pub windows_full: Option<String>,
    pub windows_instruction: Option<(String, Option<String>, Option<u32>)>,
}

pub fn manifest_xml(spec: &ManifestSpec) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<release>\n");

    if let Some(version) = &spec.version {
        xml.push_str(&format!("  <version>{}</version>\n", version));
    }
    xml.push_str("  <date>2024-05-01</date>\n");
    if let Some(runtime) = spec.runtime {
        xml.push_str(&format!("  <runtime>{}</runtime>\n", runtime));
    }
    let checksums = [
        ("Linux", "APP", &spec.linux_app),
        ("Linux", "FULL", &spec.linux_full),
        ("Windows", "FULL", &spec.windows_full),
    ];
    for (os, package, sum) in checksums {
        if let Some(sum) = sum {
            xml.push_str(&format!(
                "  <checksum os=\"{}\" package=\"{}\">{}</checksum>\n",
                os, package, sum
            ));
        }
    }

    let instructions = [
        ("Linux", &spec.linux_instruction),
        ("Windows", &spec.windows_instruction),
    ];
    for (os, instruction) in instructions {
        let Some((copy, checksum, id)) = instruction else {
            continue;
        };
        xml.push_str(&format!("  <instruction os=\"{}\">\n", os));
        xml.push_str(&format!("    <copy>{}</copy>\n", copy));
        if let Some(checksum) = checksum {
            xml.push_str(&format!("    <checksum>{}</checksum>\n", checksum));
        }
        if let Some(id) = id {
            xml.push_str(&format!("    <id>{}</id>\n", id));
        }
        xml.push_str("  </instruction>\n");
    }

    xml.push_str("</release>\n");
    xml
}
