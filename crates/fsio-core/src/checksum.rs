use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::context::Context;
use crate::error::FsError;
use crate::io::{copy_inspect, read_prefix};
use crate::mime::{self, SNIFF_LEN};
use crate::spooled::SpooledFile;

const OFFICE_MEMBER_PREFIXES: &[&str] = &["xl/worksheets/", "word/media/", "ppt/slides/", "Pictures/"];

const OFFICE_MEMBER_NAMES: &[&str] = &[
    "xl/sharedStrings.xml",
    "xl/workbook.xml",
    "word/document.xml",
    "ppt/presentation.xml",
    "content.xml",
    "styles.xml",
    "mimetype",
    "[Content_Types].xml",
];

/// `"<mod_time>-<size>"` with the time in RFC 3339 UTC at second precision.
pub fn cheap_checksum(mod_time: DateTime<Utc>, size: u64) -> String {
    format!("{}-{}", mod_time.to_rfc3339_opts(SecondsFormat::Secs, true), size)
}

/// True for archive members that carry document content rather than
/// container bookkeeping such as timestamps or thumbnails.
pub fn is_content_member(name: &str) -> bool {
    OFFICE_MEMBER_NAMES.contains(&name) || OFFICE_MEMBER_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Lowercase hex SHA-256 of a stream.
///
/// Office containers are hashed over their content members only, in sorted
/// order, so that re-exports of the same document hash identically. The
/// content type is sniffed unless the caller passes a more specific `mime_hint`.
pub async fn content_checksum<R>(
    ctx: &Context,
    reader: &mut R,
    mime_hint: Option<&str>,
) -> Result<String, FsError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let prefix = read_prefix(reader, SNIFF_LEN).await?;
    let content_type = match mime_hint {
        Some(m) if m != mime::OCTET_STREAM => m,
        _ => mime::sniff(&prefix),
    };
    let mut chained = prefix.as_slice().chain(reader);

    if mime::is_office(content_type) {
        debug!(content_type, "hashing office container members");
        let spooled = SpooledFile::from_reader(ctx, &mut chained).await?;
        return office_checksum(ctx, spooled).await;
    }

    let mut hasher = Sha256::new();
    copy_inspect(ctx, &mut chained, &mut tokio::io::sink(), |chunk| {
        hasher.update(chunk)
    })
    .await?;
    Ok(hex::encode(hasher.finalize()))
}

async fn office_checksum(ctx: &Context, spooled: SpooledFile) -> Result<String, FsError> {
    let (file, path) = spooled.into_std().await;
    drop(file);
    let ctx = ctx.clone();
    tokio::task::spawn_blocking(move || hash_members(&ctx, &path))
        .await
        .map_err(|e| FsError::Io(format!("checksum task failed: {e}")))?
}

fn hash_members(ctx: &Context, path: &Path) -> Result<String, FsError> {
    use std::io::Read;

    let mut hasher = Sha256::new();
    let mut archive = match zip::ZipArchive::new(std::fs::File::open(path)?) {
        Ok(archive) => archive,
        Err(e) => {
            debug!(error = %e, "not a zip container, hashing raw bytes");
            let mut raw = std::fs::File::open(path)?;
            std::io::copy(&mut raw, &mut hasher)?;
            return Ok(hex::encode(hasher.finalize()));
        }
    };

    let mut names: Vec<String> = archive
        .file_names()
        .filter(|name| is_content_member(name))
        .map(str::to_string)
        .collect();
    names.sort();

    for name in &names {
        ctx.check()?;
        let mut member = archive
            .by_name(name)
            .map_err(|e| FsError::Io(format!("{name}: {e}")))?;
        let mut buf = Vec::new();
        member.read_to_end(&mut buf)?;
        hasher.update(&buf);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

    fn docx(body: &str, core_props: &str, compression: zip::CompressionMethod) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default().compression_method(compression);
            zip.start_file("[Content_Types].xml", options).unwrap();
            zip.write_all(b"<Types/>").unwrap();
            zip.start_file("docProps/core.xml", options).unwrap();
            zip.write_all(core_props.as_bytes()).unwrap();
            zip.start_file("word/document.xml", options).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_cheap_checksum_format() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        assert_eq!(cheap_checksum(t, 42), "2024-03-01T12:30:05Z-42");
    }

    #[test]
    fn test_member_filter() {
        assert!(is_content_member("word/document.xml"));
        assert!(is_content_member("xl/worksheets/sheet1.xml"));
        assert!(is_content_member("mimetype"));
        assert!(!is_content_member("docProps/core.xml"));
        assert!(!is_content_member("word/document.xml.rels"));
    }

    #[tokio::test]
    async fn test_plain_checksum_is_sha256() {
        let ctx = Context::new();
        let sum = content_checksum(&ctx, &mut &b"abc"[..], None).await.unwrap();
        assert_eq!(
            sum,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_plain_checksum_covers_bytes_past_sniff_prefix() {
        let ctx = Context::new();
        let body: Vec<u8> = (0..SNIFF_LEN * 3 + 17).map(|i| (i % 251) as u8).collect();
        let sum = content_checksum(&ctx, &mut body.as_slice(), Some("text/plain"))
            .await
            .unwrap();
        assert_eq!(sum, hex::encode(Sha256::digest(&body)));
    }

    #[tokio::test]
    async fn test_office_checksum_ignores_container_metadata() {
        let ctx = Context::new();
        let a = docx("<body>hi</body>", "<created>2020</created>", zip::CompressionMethod::Stored);
        let b = docx("<body>hi</body>", "<created>2024</created>", zip::CompressionMethod::Deflated);
        let c = docx("<body>bye</body>", "<created>2020</created>", zip::CompressionMethod::Stored);
        assert_ne!(a, b);

        let sum_a = content_checksum(&ctx, &mut a.as_slice(), Some(DOCX)).await.unwrap();
        let sum_b = content_checksum(&ctx, &mut b.as_slice(), Some(DOCX)).await.unwrap();
        let sum_c = content_checksum(&ctx, &mut c.as_slice(), Some(DOCX)).await.unwrap();
        assert_eq!(sum_a, sum_b);
        assert_ne!(sum_a, sum_c);
    }

    #[tokio::test]
    async fn test_office_mime_on_non_zip_hashes_raw_bytes() {
        let ctx = Context::new();
        let sum = content_checksum(&ctx, &mut &b"abc"[..], Some("application/msword"))
            .await
            .unwrap();
        assert_eq!(
            sum,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
