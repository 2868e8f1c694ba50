use crate::db::DB_FILE_NAME;
use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/school.sqlite3";
pub const BUNDLE_FORMAT: &str = "schoold-workspace-v1";
pub const RAW_SQLITE_FORMAT: &str = "raw-sqlite3";

const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// Bundle problems the caller can act on, as opposed to plain I/O failures.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("unsupported bundle format: {0}")]
    UnsupportedFormat(String),

    #[error("bundle is missing {0}")]
    MissingEntry(&'static str),

    #[error("database checksum mismatch (expected {expected}, got {actual})")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("file is neither a workspace bundle nor a SQLite database")]
    UnknownFile,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
    pub db_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub db_sha256: String,
}

/// Copies `reader` into `writer`, returning the byte count and hex SHA-256.
fn copy_hashed(reader: &mut impl Read, writer: &mut impl Write) -> std::io::Result<(u64, String)> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok((total, format!("{:x}", hasher.finalize())))
}

fn file_sha256(path: &Path) -> anyhow::Result<String> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open {}", path.to_string_lossy()))?;
    let (_, digest) = copy_hashed(&mut f, &mut std::io::sink())
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    Ok(digest)
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE_NAME);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    // The checksum goes into the manifest, which is written first.
    let db_sha256 = file_sha256(&db_path)?;

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "dbEntry": DB_ENTRY,
        "dbSha256": db_sha256,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    let mut db_file = File::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    let (db_bytes, written_sha256) =
        copy_hashed(&mut db_file, &mut zip).context("failed to write database entry")?;
    if written_sha256 != db_sha256 {
        return Err(anyhow!("database changed while exporting; retry the export"));
    }

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT.to_string(),
        entry_count: 2,
        db_sha256,
        db_bytes,
    })
}

pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;
    let dst = workspace_path.join(DB_FILE_NAME);
    let tmp_dst = workspace_path.join(format!("{}.importing", DB_FILE_NAME));
    if tmp_dst.exists() {
        let _ = std::fs::remove_file(&tmp_dst);
    }

    let (format, db_sha256) = match sniff(in_path)? {
        Sniffed::Zip => {
            let digest = extract_bundle_db(in_path, &tmp_dst)?;
            (BUNDLE_FORMAT, digest)
        }
        Sniffed::Sqlite => {
            let mut src = File::open(in_path)
                .with_context(|| format!("failed to open {}", in_path.to_string_lossy()))?;
            let mut out = File::create(&tmp_dst).with_context(|| {
                format!(
                    "failed to create temp database {}",
                    tmp_dst.to_string_lossy()
                )
            })?;
            let (_, digest) =
                copy_hashed(&mut src, &mut out).context("failed to copy database file")?;
            (RAW_SQLITE_FORMAT, digest)
        }
        Sniffed::Other => return Err(BundleError::UnknownFile.into()),
    };

    if dst.exists() {
        std::fs::remove_file(&dst).with_context(|| {
            format!(
                "failed to remove existing database {}",
                dst.to_string_lossy()
            )
        })?;
    }
    std::fs::rename(&tmp_dst, &dst).with_context(|| {
        format!(
            "failed to move extracted database to {}",
            dst.to_string_lossy()
        )
    })?;

    Ok(ImportSummary {
        bundle_format_detected: format.to_string(),
        db_sha256,
    })
}

/// Extracts the database entry to `tmp_dst`, verifying the manifest
/// checksum. The temp file is removed on any failure.
fn extract_bundle_db(in_path: &Path, tmp_dst: &Path) -> anyhow::Result<String> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .map_err(|_| BundleError::MissingEntry(MANIFEST_ENTRY))?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT {
        return Err(BundleError::UnsupportedFormat(format.to_string()).into());
    }
    let expected = manifest
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .ok_or(BundleError::MissingEntry("manifest dbSha256"))?
        .to_ascii_lowercase();

    let mut db_out = File::create(tmp_dst).with_context(|| {
        format!(
            "failed to create temp database {}",
            tmp_dst.to_string_lossy()
        )
    })?;
    let copied = {
        let mut db_entry = archive
            .by_name(DB_ENTRY)
            .map_err(|_| BundleError::MissingEntry(DB_ENTRY))?;
        copy_hashed(&mut db_entry, &mut db_out)
    };
    let outcome = copied
        .and_then(|(_, actual)| db_out.flush().map(|_| actual))
        .context("failed to extract database entry")
        .and_then(|actual| {
            if actual == expected {
                Ok(actual)
            } else {
                Err(BundleError::ChecksumMismatch { expected, actual }.into())
            }
        });
    if outcome.is_err() {
        drop(db_out);
        let _ = std::fs::remove_file(tmp_dst);
    }
    outcome
}

enum Sniffed {
    Zip,
    Sqlite,
    Other,
}

fn sniff(path: &Path) -> anyhow::Result<Sniffed> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 16];
    let mut read = 0;
    while read < sig.len() {
        let n = f
            .read(&mut sig[read..])
            .context("failed to read file signature")?;
        if n == 0 {
            break;
        }
        read += n;
    }
    if read >= 4 && sig[..4] == ZIP_MAGIC {
        return Ok(Sniffed::Zip);
    }
    if read == sig.len() && &sig == SQLITE_MAGIC {
        return Ok(Sniffed::Sqlite);
    }
    Ok(Sniffed::Other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use std::path::PathBuf;

    fn temp_dir(prefix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    fn seeded_workspace() -> PathBuf {
        let ws = temp_dir("schoold-backup-src");
        let conn = db::open_db(&ws).expect("open db");
        conn.execute(
            "INSERT INTO students(admission_no, name, class_section, active, created_at, updated_at)
             VALUES('A-1', 'Asha', '7A', 1, 'x', 'x')",
            [],
        )
        .expect("seed student");
        drop(conn);
        ws
    }

    #[test]
    fn export_then_import_restores_database() {
        let src = seeded_workspace();
        let bundle = temp_dir("schoold-bundle").join("ws.zip");
        let export = export_workspace_bundle(&src, &bundle).expect("export");
        assert_eq!(export.bundle_format, BUNDLE_FORMAT);
        assert_eq!(export.db_sha256.len(), 64);

        let dst = temp_dir("schoold-backup-dst");
        let import = import_workspace_bundle(&bundle, &dst).expect("import");
        assert_eq!(import.bundle_format_detected, BUNDLE_FORMAT);
        assert_eq!(import.db_sha256, export.db_sha256);

        let conn = db::open_db(&dst).expect("reopen");
        let name: String = conn
            .query_row("SELECT name FROM students WHERE admission_no = 'A-1'", [], |r| {
                r.get(0)
            })
            .expect("student restored");
        assert_eq!(name, "Asha");
    }

    #[test]
    fn tampered_checksum_is_rejected_and_workspace_untouched() {
        let src = seeded_workspace();
        let bundle = temp_dir("schoold-bundle").join("bad.zip");
        {
            let f = File::create(&bundle).expect("create zip");
            let mut zip = ZipWriter::new(f);
            let opts = FileOptions::default();
            zip.start_file(MANIFEST_ENTRY, opts).expect("manifest");
            zip.write_all(
                json!({ "format": BUNDLE_FORMAT, "dbSha256": "00".repeat(32) })
                    .to_string()
                    .as_bytes(),
            )
            .expect("write manifest");
            zip.start_file(DB_ENTRY, opts).expect("db entry");
            let bytes = std::fs::read(src.join(DB_FILE_NAME)).expect("read db");
            zip.write_all(&bytes).expect("write db");
            zip.finish().expect("finish");
        }

        let dst = temp_dir("schoold-backup-dst");
        let e = import_workspace_bundle(&bundle, &dst).expect_err("must fail");
        assert!(matches!(
            e.downcast_ref::<BundleError>(),
            Some(BundleError::ChecksumMismatch { .. })
        ));
        assert!(!dst.join(DB_FILE_NAME).exists());
        assert!(!dst.join(format!("{}.importing", DB_FILE_NAME)).exists());
    }

    #[test]
    fn raw_sqlite_file_is_accepted() {
        let src = seeded_workspace();
        let dst = temp_dir("schoold-backup-dst");
        let import = import_workspace_bundle(&src.join(DB_FILE_NAME), &dst).expect("import");
        assert_eq!(import.bundle_format_detected, RAW_SQLITE_FORMAT);
    }

    #[test]
    fn unrelated_file_is_rejected() {
        let dir = temp_dir("schoold-backup-junk");
        let junk = dir.join("notes.txt");
        std::fs::write(&junk, "hello").expect("write");
        let e = import_workspace_bundle(&junk, &dir.join("ws")).expect_err("must fail");
        assert!(matches!(
            e.downcast_ref::<BundleError>(),
            Some(BundleError::UnknownFile)
        ));
    }
}
