//! Release manifest parsing.
//!
//! The release endpoint serves a small XML document describing the latest
//! release:
//!
//! ```text
//! <release>
//!   <version>2.1.0</version>
//!   <date>2024-05-01</date>
//!   <runtime>17</runtime>
//!   <checksum os="Linux" package="APP">…sha256…</checksum>
//!   <instruction os="Linux">
//!     <copy>Remote</copy>
//!     <checksum>…sha256…</checksum>
//!     <id>3</id>
//!   </instruction>
//! </release>
//! ```
//!
//! Only malformed XML is an error. Missing or unparsable values leave the
//! corresponding field empty.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;
use tracing::{debug, warn};

use super::platform::{OperatingSystem, PackageType};
use super::version::Version;

/// Errors raised when the manifest is not well-formed XML.
#[derive(Debug, Error)]
pub enum ManifestParseError {
    #[error("XML syntax error at byte {position}: {message}")]
    Syntax { position: u64, message: String },

    #[error("Manifest has no root element")]
    Empty,

    #[error("Unclosed element <{0}>")]
    Unclosed(String),
}

// ============================================================================
// Instructions
// ============================================================================

/// How the platform install script is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionKind {
    /// Use the script bundled with the running build.
    CopyLocal,
    /// Fetch the script from the release server.
    CopyRemote,
}

impl InstructionKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "local" => Some(Self::CopyLocal),
            "remote" => Some(Self::CopyRemote),
            _ => None,
        }
    }
}

/// Per-OS install instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub os: OperatingSystem,
    /// `None` when the `<copy>` value is missing or unrecognized.
    pub kind: Option<InstructionKind>,
    /// SHA-256 of the remote script, present for remote instructions.
    pub checksum: Option<String>,
    /// Script revision id. `None` if missing or unparsable.
    pub id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ChecksumEntry {
    os: String,
    package: String,
    value: String,
}

// ============================================================================
// Manifest
// ============================================================================

/// Immutable description of the latest release.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateManifest {
    version: Option<Version>,
    release_date: Option<String>,
    runtime_id: Option<u32>,
    checksums: Vec<ChecksumEntry>,
    instructions: Vec<Instruction>,
}

impl UpdateManifest {
    /// Parses the full text of a manifest document.
    pub fn parse(text: &str) -> Result<Self, ManifestParseError> {
        ManifestBuilder::default().run(text)
    }

    /// Released version, if the document carries a parsable `<version>`.
    pub fn version(&self) -> Option<Version> {
        self.version
    }

    pub fn release_date(&self) -> Option<&str> {
        self.release_date.as_deref()
    }

    /// Runtime compatibility id. `None` stands in for an absent or bad value.
    pub fn runtime_id(&self) -> Option<u32> {
        self.runtime_id
    }

    /// Install instruction for an operating system.
    pub fn instruction_for(&self, os: &OperatingSystem) -> Option<&Instruction> {
        self.instructions.iter().find(|i| &i.os == os)
    }

    /// Package checksum for an (OS, package type) pair.
    ///
    /// Both attributes are matched case-insensitively.
    pub fn checksum_for(&self, os: &OperatingSystem, package: PackageType) -> Option<&str> {
        let os_name = os.manifest_name();
        self.checksums
            .iter()
            .find(|c| {
                c.os.eq_ignore_ascii_case(os_name)
                    && c.package.eq_ignore_ascii_case(package.manifest_name())
            })
            .map(|c| c.value.as_str())
    }

    /// Returns true if this release is newer than `running`.
    pub fn is_newer_than(&self, running: &Version) -> bool {
        self.version.is_some_and(|v| running.is_older_than(&v))
    }
}

// ============================================================================
// Builder
// ============================================================================

#[derive(Default)]
struct PendingInstruction {
    os: Option<String>,
    copy: Option<String>,
    checksum: Option<String>,
    id: Option<String>,
}

#[derive(Default)]
struct ManifestBuilder {
    manifest: UpdateManifest,
    stack: Vec<String>,
    checksum_attrs: Option<(String, String)>,
    instruction: Option<PendingInstruction>,
    saw_root: bool,
}

impl ManifestBuilder {
    fn run(mut self, text: &str) -> Result<UpdateManifest, ManifestParseError> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        loop {
            let event = reader
                .read_event()
                .map_err(|e| ManifestParseError::Syntax {
                    position: reader.error_position() as u64,
                    message: e.to_string(),
                })?;

            match event {
                Event::Start(start) => {
                    let name = element_name(&start);
                    self.open(&name, &start)?;
                    self.stack.push(name);
                }
                Event::Empty(start) => {
                    let name = element_name(&start);
                    self.open(&name, &start)?;
                    self.close(&name);
                }
                Event::End(end) => {
                    let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                    self.stack.pop();
                    self.close(&name);
                }
                Event::Text(t) => {
                    let value = t.unescape().map_err(|e| ManifestParseError::Syntax {
                        position: reader.buffer_position() as u64,
                        message: e.to_string(),
                    })?;
                    self.text(value.trim());
                }
                Event::CData(c) => {
                    let value = String::from_utf8_lossy(&c).into_owned();
                    self.text(value.trim());
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = self.stack.pop() {
            return Err(ManifestParseError::Unclosed(open));
        }
        if !self.saw_root {
            return Err(ManifestParseError::Empty);
        }

        debug!(
            version = ?self.manifest.version,
            checksums = self.manifest.checksums.len(),
            instructions = self.manifest.instructions.len(),
            "Parsed release manifest"
        );
        Ok(self.manifest)
    }

    fn open(&mut self, name: &str, start: &BytesStart<'_>) -> Result<(), ManifestParseError> {
        self.saw_root = true;
        let inside_instruction = self.instruction.is_some();

        match name {
            "instruction" if !inside_instruction => {
                self.instruction = Some(PendingInstruction {
                    os: attribute(start, "os")?,
                    ..Default::default()
                });
            }
            "checksum" if !inside_instruction => {
                let os = attribute(start, "os")?.unwrap_or_default();
                let package = attribute(start, "package")?.unwrap_or_default();
                self.checksum_attrs = Some((os, package));
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, name: &str) {
        match name {
            "instruction" if self.stack.iter().all(|n| n != "instruction") => {
                if let Some(pending) = self.instruction.take() {
                    self.finish_instruction(pending);
                }
            }
            "checksum" => {
                self.checksum_attrs = None;
            }
            _ => {}
        }
    }

    fn text(&mut self, value: &str) {
        if value.is_empty() {
            return;
        }
        let Some(current) = self.stack.last().map(String::as_str) else {
            return;
        };

        if let Some(pending) = self.instruction.as_mut() {
            match current {
                "copy" => pending.copy = Some(value.to_string()),
                "checksum" => pending.checksum = Some(value.to_string()),
                "id" => pending.id = Some(value.to_string()),
                _ => {}
            }
            return;
        }

        match current {
            "version" => match Version::parse(value) {
                Ok(v) => self.manifest.version = Some(v),
                Err(e) => warn!(error = %e, "Ignoring unparsable manifest version"),
            },
            "date" => self.manifest.release_date = Some(value.to_string()),
            "runtime" => self.manifest.runtime_id = value.parse().ok(),
            "checksum" => {
                if let Some((os, package)) = self.checksum_attrs.clone() {
                    self.manifest.checksums.push(ChecksumEntry {
                        os,
                        package,
                        value: value.to_string(),
                    });
                }
            }
            _ => {}
        }
    }

    fn finish_instruction(&mut self, pending: PendingInstruction) {
        let Some(os_name) = pending.os else {
            warn!("Ignoring manifest instruction without an os attribute");
            return;
        };
        // Instruction os values use the canonical manifest spelling.
        let os = match os_name.as_str() {
            "Linux" => OperatingSystem::Linux,
            "Windows" => OperatingSystem::Windows,
            other => OperatingSystem::Unsupported(other.to_string()),
        };

        self.manifest.instructions.push(Instruction {
            os,
            kind: pending.copy.as_deref().and_then(InstructionKind::parse),
            checksum: pending.checksum,
            id: pending.id.and_then(|id| id.trim().parse().ok()),
        });
    }
}

fn element_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}

fn attribute(start: &BytesStart<'_>, key: &str) -> Result<Option<String>, ManifestParseError> {
    for attr in start.attributes() {
        let attr = attr.map_err(|e| ManifestParseError::Syntax {
            position: 0,
            message: e.to_string(),
        })?;
        if attr.key.as_ref() == key.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(|e| ManifestParseError::Syntax {
                    position: 0,
                    message: e.to_string(),
                })?;
            return Ok(Some(value.trim().to_string()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<release>
  <version>2.1.0</version>
  <date>2024-05-01</date>
  <runtime>17</runtime>
  <checksum os="Linux" package="APP">AAAA</checksum>
  <checksum os="linux" package="full">BBBB</checksum>
  <checksum os="Windows" package="APP">CCCC</checksum>
  <checksum os="Windows" package="FULL">DDDD</checksum>
  <instruction os="Linux">
    <copy>Remote</copy>
    <checksum>EEEE</checksum>
    <id>3</id>
  </instruction>
  <instruction os="Windows">
    <copy>Local</copy>
    <id>1</id>
  </instruction>
</release>"#;

    #[test]
    fn test_parse_full_document() {
        let manifest = UpdateManifest::parse(SAMPLE).unwrap();

        assert_eq!(manifest.version(), Some(Version::new(2, 1, 0)));
        assert_eq!(manifest.release_date(), Some("2024-05-01"));
        assert_eq!(manifest.runtime_id(), Some(17));
    }

    #[test]
    fn test_checksum_lookup_is_case_insensitive() {
        let manifest = UpdateManifest::parse(SAMPLE).unwrap();

        assert_eq!(
            manifest.checksum_for(&OperatingSystem::Linux, PackageType::App),
            Some("AAAA")
        );
        assert_eq!(
            manifest.checksum_for(&OperatingSystem::Linux, PackageType::Full),
            Some("BBBB")
        );
        assert_eq!(
            manifest.checksum_for(&OperatingSystem::Windows, PackageType::Full),
            Some("DDDD")
        );
        assert_eq!(
            manifest.checksum_for(
                &OperatingSystem::Unsupported("SunOS".into()),
                PackageType::App
            ),
            None
        );
    }

    #[test]
    fn test_instruction_lookup() {
        let manifest = UpdateManifest::parse(SAMPLE).unwrap();

        let linux = manifest.instruction_for(&OperatingSystem::Linux).unwrap();
        assert_eq!(linux.kind, Some(InstructionKind::CopyRemote));
        assert_eq!(linux.checksum.as_deref(), Some("EEEE"));
        assert_eq!(linux.id, Some(3));

        let windows = manifest.instruction_for(&OperatingSystem::Windows).unwrap();
        assert_eq!(windows.kind, Some(InstructionKind::CopyLocal));
        assert_eq!(windows.checksum, None);
        assert_eq!(windows.id, Some(1));
    }

    #[test]
    fn test_instruction_checksum_not_treated_as_package_checksum() {
        let manifest = UpdateManifest::parse(SAMPLE).unwrap();
        assert_eq!(manifest.checksums.len(), 4);
        assert!(manifest.checksums.iter().all(|c| c.value != "EEEE"));
    }

    #[test]
    fn test_missing_tags_yield_empty_fields() {
        let manifest = UpdateManifest::parse("<release></release>").unwrap();
        assert_eq!(manifest.version(), None);
        assert_eq!(manifest.release_date(), None);
        assert_eq!(manifest.runtime_id(), None);
        assert!(manifest.instruction_for(&OperatingSystem::Linux).is_none());
        assert!(manifest
            .checksum_for(&OperatingSystem::Linux, PackageType::App)
            .is_none());
    }

    #[test]
    fn test_unparsable_values_yield_sentinels() {
        let doc = r#"<release>
            <version>next</version>
            <runtime>seventeen</runtime>
            <instruction os="Linux"><copy>Teleport</copy><id>x</id></instruction>
        </release>"#;
        let manifest = UpdateManifest::parse(doc).unwrap();

        assert_eq!(manifest.version(), None);
        assert_eq!(manifest.runtime_id(), None);
        let instruction = manifest.instruction_for(&OperatingSystem::Linux).unwrap();
        assert_eq!(instruction.kind, None);
        assert_eq!(instruction.id, None);
    }

    #[test]
    fn test_self_closing_elements() {
        let doc = r#"<release><version>1.0.0</version><date/><instruction os="Windows"/></release>"#;
        let manifest = UpdateManifest::parse(doc).unwrap();
        assert_eq!(manifest.release_date(), None);
        let instruction = manifest.instruction_for(&OperatingSystem::Windows).unwrap();
        assert_eq!(instruction.kind, None);
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(
            UpdateManifest::parse("<release><version>1.0.0</release>"),
            Err(ManifestParseError::Syntax { .. })
        ));
        assert!(UpdateManifest::parse("<release><version>1.0.0</version>").is_err());
        assert!(matches!(
            UpdateManifest::parse("just some text"),
            Err(ManifestParseError::Empty)
        ));
        assert!(UpdateManifest::parse("").is_err());
    }

    #[test]
    fn test_is_newer_than() {
        let manifest = UpdateManifest::parse(SAMPLE).unwrap();
        assert!(manifest.is_newer_than(&Version::new(2, 0, 4)));
        assert!(!manifest.is_newer_than(&Version::new(2, 1, 0)));

        let no_version = UpdateManifest::parse("<release/>").unwrap();
        assert!(!no_version.is_newer_than(&Version::new(0, 0, 1)));
    }
}
