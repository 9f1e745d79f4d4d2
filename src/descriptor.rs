//! Marker patching of serialized file descriptors in generated code.
//!
//! Two vendored copies of the same schema serialize to identical descriptor
//! bytes, and a descriptor pool rejects the second registration of identical
//! bytes under a different file. The patcher finds the
//! `DESCRIPTOR = _descriptor_pool.Default().AddSerializedFile(b'...')` call in
//! a generated module and adds one uninterpreted file option that nothing else
//! can produce.
//!
//! Real descriptors carry custom options (`(gogoproto.nullable)`,
//! `(amino.name)`, ...) that `prost_types` decodes as unknown fields and drops.
//! The original bytes are therefore never re-encoded: the marker goes into an
//! extra `options` record appended after them, which a protobuf parser merges
//! into the file options already present.
//!
//! The mutation is computed and verified here before the file is touched. In
//! [`PatchMode::Runtime`] the call is then replaced with code that performs the
//! same parse, mutate, serialize and register sequence at import time; in
//! [`PatchMode::Inline`] the patched bytes are embedded directly.

use crate::atomic;
use crate::error::{Error, Result};
use crate::literal;
use crate::report::{FileReport, FileStatus, StageReport};
use crate::scanner::{self, FileKind, Filter};
use colored::Colorize;
use prost::Message;
use prost_types::uninterpreted_option::NamePart;
use prost_types::{FileDescriptorProto, FileOptions, UninterpretedOption};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const DEFAULT_MARKER_NAMESPACE: &str = "dydx_v4_";

static REGISTRATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)(DESCRIPTOR\s*=\s*_descriptor_pool\.Default\(\)\.AddSerializedFile\()(b'(?:\\.|[^'\\])*'|b"(?:\\.|[^"\\])*")(\))"#,
    )
    .unwrap()
});

/// Variable the runtime patch registers; its presence means the file is done.
const PATCHED_VAR: &str = "_patched_serialized";

/// How the patched registration is written back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PatchMode {
    /// Decode, mark, re-encode and register when the module is imported.
    #[default]
    Runtime,
    /// Embed the already-marked bytes.
    Inline,
}

/// The sentinel option added to every patched descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    name_part: String,
    value: Vec<u8>,
}

impl Default for Marker {
    fn default() -> Self {
        Self::from_namespace(DEFAULT_MARKER_NAMESPACE)
    }
}

impl Marker {
    /// Builds `<ns>proto_field = "<ns>proto"`. The namespace must be an identifier fragment.
    pub fn new(namespace: &str) -> std::result::Result<Self, String> {
        let valid = |c: char| c.is_ascii_alphanumeric() || c == '_';
        if namespace.is_empty() || !namespace.chars().all(valid) {
            return Err(format!(
                "marker namespace '{}' must be non-empty and contain only [A-Za-z0-9_]",
                namespace
            ));
        }
        Ok(Self::from_namespace(namespace))
    }

    fn from_namespace(namespace: &str) -> Self {
        Self {
            name_part: format!("{}proto_field", namespace),
            value: format!("{}proto", namespace).into_bytes(),
        }
    }

    pub fn name_part(&self) -> &str {
        &self.name_part
    }

    fn option(&self) -> UninterpretedOption {
        UninterpretedOption {
            name: vec![NamePart {
                name_part: self.name_part.clone(),
                is_extension: false,
            }],
            string_value: Some(self.value.clone()),
            ..Default::default()
        }
    }

    fn matches(&self, option: &UninterpretedOption) -> bool {
        option.name.len() == 1
            && option.name[0].name_part == self.name_part
            && !option.name[0].is_extension
            && option.string_value.as_deref() == Some(self.value.as_slice())
    }

    /// Whether `descriptor` already carries this marker.
    pub fn is_present(&self, descriptor: &FileDescriptorProto) -> bool {
        descriptor
            .options
            .as_ref()
            .is_some_and(|o| o.uninterpreted_option.iter().any(|u| self.matches(u)))
    }

    /// Appends the marker to the descriptor's file options.
    pub fn apply(&self, descriptor: &mut FileDescriptorProto) {
        descriptor
            .options
            .get_or_insert_with(FileOptions::default)
            .uninterpreted_option
            .push(self.option());
    }

    /// Python statements that add the marker to `fd_var` at import time.
    fn python_statements(&self, fd_var: &str) -> Vec<String> {
        vec![
            format!("_marker_option = {}.options.uninterpreted_option.add()", fd_var),
            "_marker_name = _marker_option.name.add()".to_string(),
            format!("_marker_name.name_part = \"{}\"", self.name_part),
            "_marker_name.is_extension = False".to_string(),
            format!("_marker_option.string_value = {}", literal::encode(&self.value)),
        ]
    }
}

/// Field number of `FileDescriptorProto.options`.
const FILE_OPTIONS_FIELD: u32 = 8;

/// Decodes descriptor bytes. Custom options are not retained in the result.
pub fn decode_descriptor(bytes: &[u8], path: &Path) -> Result<FileDescriptorProto> {
    FileDescriptorProto::decode(bytes).map_err(|e| Error::MalformedDescriptor {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Returns `bytes` with the marker appended, or `None` if already marked.
///
/// Every original byte is kept. The result is decoded again and compared
/// against the original plus the marker, so a returned payload is known to
/// differ only by that option.
pub fn patch_bytes(bytes: &[u8], marker: &Marker, path: &Path) -> Result<Option<Vec<u8>>> {
    let original = decode_descriptor(bytes, path)?;
    if marker.is_present(&original) {
        return Ok(None);
    }

    let record = FileOptions {
        uninterpreted_option: vec![marker.option()],
        ..Default::default()
    };
    let mut patched = bytes.to_vec();
    prost::encoding::message::encode(FILE_OPTIONS_FIELD, &record, &mut patched);

    let mut expected = original;
    marker.apply(&mut expected);
    let roundtrip = FileDescriptorProto::decode(patched.as_slice()).map_err(|e| {
        Error::MalformedDescriptor {
            path: path.to_path_buf(),
            reason: format!("patched descriptor does not decode: {}", e),
        }
    })?;
    if roundtrip != expected {
        return Err(Error::MalformedDescriptor {
            path: path.to_path_buf(),
            reason: "patched descriptor does not round-trip".to_string(),
        });
    }
    Ok(Some(patched))
}

/// Outcome of patching one generated module's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePatch {
    pub content: String,
    pub status: FileStatus,
}

/// Patches every registration call in `content`.
pub fn patch_source(
    content: &str,
    path: &Path,
    marker: &Marker,
    mode: PatchMode,
) -> Result<SourcePatch> {
    let mut result = String::with_capacity(content.len() + 1024);
    let mut last = 0;
    let mut found = 0;
    let mut patched = 0;

    for caps in REGISTRATION_RE.captures_iter(content) {
        found += 1;
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        let call = &caps[1];
        let lit = &caps[2];

        let bytes = literal::decode(lit).map_err(|reason| Error::MalformedDescriptor {
            path: path.to_path_buf(),
            reason,
        })?;
        let Some(new_bytes) = patch_bytes(&bytes, marker, path)? else {
            continue;
        };

        let replacement = match mode {
            PatchMode::Inline => format!("{}{}{}", call, literal::encode(&new_bytes), &caps[3]),
            PatchMode::Runtime => runtime_block(lit, marker, line_indent(content, whole.start)),
        };
        result.push_str(&content[last..whole.start]);
        result.push_str(&replacement);
        last = whole.end;
        patched += 1;
    }
    result.push_str(&content[last..]);

    let status = if patched > 0 {
        FileStatus::Changed { changes: patched }
    } else if found > 0 || content.contains(&format!("AddSerializedFile({})", PATCHED_VAR)) {
        FileStatus::AlreadyPatched
    } else {
        FileStatus::NoMatch
    };
    let content = if patched > 0 { result } else { content.to_string() };
    Ok(SourcePatch { content, status })
}

fn line_indent(content: &str, offset: usize) -> &str {
    let line_start = content[..offset].rfind('\n').map_or(0, |i| i + 1);
    let line = &content[line_start..offset];
    &line[..line.len() - line.trim_start().len()]
}

fn runtime_block(original_literal: &str, marker: &Marker, indent: &str) -> String {
    let mut lines = vec![
        "from google.protobuf.descriptor_pb2 import FileDescriptorProto as _FileDescriptorProto"
            .to_string(),
        format!("_original_serialized = {}", original_literal),
        "_fd_proto = _FileDescriptorProto()".to_string(),
        "_fd_proto.ParseFromString(_original_serialized)".to_string(),
    ];
    lines.extend(marker.python_statements("_fd_proto"));
    lines.push(format!("{} = _fd_proto.SerializeToString()", PATCHED_VAR));
    lines.push(format!(
        "DESCRIPTOR = _descriptor_pool.Default().AddSerializedFile({})",
        PATCHED_VAR
    ));
    // The first line inherits the indentation already in front of the match.
    lines.join(&format!("\n{}", indent))
}

/// Patches one generated module in place.
pub fn patch_file(
    path: &Path,
    marker: &Marker,
    mode: PatchMode,
    dry_run: bool,
) -> Result<FileStatus> {
    let content = atomic::read_to_string(path)?;
    let patch = patch_source(&content, path, marker, mode)?;
    match patch.status {
        FileStatus::Changed { .. } if !dry_run => atomic::write(path, &patch.content)?,
        FileStatus::NoMatch => {
            tracing::info!(file = %path.display(), "no descriptor registration found");
        }
        _ => {}
    }
    Ok(patch.status)
}

/// Patches every generated module under `roots`, skipping files that fail.
pub fn patch_tree(
    roots: &[PathBuf],
    filter: &Filter,
    marker: &Marker,
    mode: PatchMode,
    dry_run: bool,
) -> Result<StageReport> {
    let files = scanner::collect_files(roots, FileKind::Generated, filter)?;
    let mut report = StageReport::new("patch-descriptor");
    for file in files {
        let status = patch_file(&file, marker, mode, dry_run).unwrap_or_else(|e| {
            tracing::warn!(file = %file.display(), error = %e, "descriptor patch failed");
            FileStatus::Failed { error: e.to_string() }
        });
        report.push(FileReport::new(&file, status));
    }
    Ok(report)
}

/// What `inspect` reports about an embedded descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct DescriptorSummary {
    pub file: PathBuf,
    pub size: usize,
    pub head_hex: String,
    pub name: String,
    pub package: String,
    pub messages: usize,
    pub enums: usize,
    pub services: usize,
    pub extensions: usize,
    pub marker_present: bool,
}

impl DescriptorSummary {
    pub fn print(&self) {
        println!("{} {}", "file:".bold(), self.file.display());
        println!("  descriptor size: {} bytes", self.size);
        println!("  first 50 bytes:  {}", self.head_hex.dimmed());
        println!("  name:            {}", self.name);
        println!("  package:         {}", self.package);
        println!(
            "  contents:        {} message(s), {} enum(s), {} service(s), {} extension(s)",
            self.messages, self.enums, self.services, self.extensions
        );
        println!(
            "  marker:          {}",
            if self.marker_present {
                "present".green()
            } else {
                "absent".yellow()
            }
        );
    }
}

/// Decodes the first descriptor registered by a generated module.
///
/// A file without a static registration (including one already patched in
/// runtime mode, whose original bytes are kept in `_original_serialized`)
/// is inspected through that variable instead.
pub fn inspect(path: &Path, marker: &Marker) -> Result<Option<DescriptorSummary>> {
    static ORIGINAL_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?s)_original_serialized\s*=\s*(b'(?:\\.|[^'\\])*'|b"(?:\\.|[^"\\])*")"#)
            .unwrap()
    });

    let content = atomic::read_to_string(path)?;
    let (lit, runtime_patched) = match REGISTRATION_RE.captures(&content) {
        Some(caps) => (caps[2].to_string(), false),
        None => match ORIGINAL_RE.captures(&content) {
            Some(caps) => (caps[1].to_string(), true),
            None => return Ok(None),
        },
    };

    let bytes = literal::decode(&lit).map_err(|reason| Error::MalformedDescriptor {
        path: path.to_path_buf(),
        reason,
    })?;
    let descriptor = decode_descriptor(&bytes, path)?;

    let head_hex = bytes.iter().take(50).map(|b| format!("{:02x}", b)).collect();
    Ok(Some(DescriptorSummary {
        file: path.to_path_buf(),
        size: bytes.len(),
        head_hex,
        name: descriptor.name().to_string(),
        package: descriptor.package().to_string(),
        messages: descriptor.message_type.len(),
        enums: descriptor.enum_type.len(),
        services: descriptor.service.len(),
        extensions: descriptor.extension.len(),
        marker_present: runtime_patched || marker.is_present(&descriptor),
    }))
}
