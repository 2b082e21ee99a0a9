/// Bytes inspected when sniffing a content type.
pub const SNIFF_LEN: usize = 8192;

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const GZIP: &str = "application/gzip";
pub const GOOGLE_FOLDER: &str = "application/vnd.google-apps.folder";
pub const GOOGLE_SHORTCUT: &str = "application/vnd.google-apps.shortcut";

const GOOGLE_NATIVE_PREFIX: &str = "application/vnd.google-apps.";

/// Content types whose server-reported hash does not track document content.
pub const OFFICE_TYPES: &[&str] = &[
    "application/vnd.google-apps.document",
    "application/vnd.google-apps.spreadsheet",
    "application/vnd.google-apps.presentation",
    "application/vnd.google-apps.drawing",
    "application/vnd.google-apps.form",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/msword",
    "application/vnd.ms-excel",
    "application/vnd.ms-powerpoint",
    "application/vnd.oasis.opendocument.text",
    "application/vnd.oasis.opendocument.spreadsheet",
    "application/vnd.oasis.opendocument.presentation",
    "application/vnd.oasis.opendocument.graphics",
    "application/vnd.oasis.opendocument.formula",
];

/// Best-effort content type from the first bytes of a file.
pub fn sniff(prefix: &[u8]) -> &'static str {
    infer::get(prefix)
        .map(|kind| kind.mime_type())
        .unwrap_or(OCTET_STREAM)
}

pub fn is_office(mime: &str) -> bool {
    let mime = mime.split(';').next().unwrap_or(mime).trim();
    OFFICE_TYPES.contains(&mime)
}

/// Google Docs, Sheets and friends, which have no binary content of their own.
pub fn is_google_native(mime: &str) -> bool {
    mime.starts_with(GOOGLE_NATIVE_PREFIX) && mime != GOOGLE_FOLDER && mime != GOOGLE_SHORTCUT
}

pub fn is_gzip(prefix: &[u8]) -> bool {
    sniff(prefix) == GZIP
}
