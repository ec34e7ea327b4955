//! Destination filename and folder generation.
//!
//! Sanitization maps filesystem-illegal characters to their full-width
//! look-alikes instead of dropping them, so titles stay readable after
//! saving. `/` is the path separator: input is split into segments, each
//! segment is cleaned independently, and empty directory segments (duplicate
//! separators) are collapsed. Generated names are percent-encoded per
//! segment before they reach the download API.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::types::{ArtworkId, FilenameFormat};

/// Everything `encodeURIComponent` leaves alone besides alphanumerics.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Cleans one path-free segment: full-width substitutions, control strip,
/// space collapse, trim, hidden-file guard.
fn sanitize_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut last_was_space = false;

    for ch in segment.chars() {
        let replaced = match ch {
            '<' => '＜',
            '>' => '＞',
            ':' => '：',
            '"' => '＂',
            '|' => '｜',
            '?' => '？',
            '*' => '＊',
            '\\' => '￥',
            '\u{0000}'..='\u{001F}' | '\u{007F}' => continue,
            other => other,
        };
        if replaced == ' ' {
            if last_was_space {
                continue;
            }
            last_was_space = true;
        } else {
            last_was_space = false;
        }
        out.push(replaced);
    }

    let trimmed = out.trim();
    match trimmed.strip_prefix('.') {
        Some(rest) => format!("_{rest}"),
        None => trimmed.to_string(),
    }
}

/// Sanitizes a name that may contain `/` directory separators.
///
/// Idempotent: applying it twice yields the same string.
pub fn sanitize(name: &str) -> String {
    let mut segments: Vec<String> = name.split('/').map(sanitize_segment).collect();
    // Last segment is the filename; the rest are directories. Empty
    // directory segments are duplicate separators and get dropped.
    let filename = segments.pop().unwrap_or_default();
    let directories: Vec<String> = segments.into_iter().filter(|s| !s.is_empty()).collect();

    if directories.is_empty() {
        filename
    } else {
        format!("{}/{}", directories.join("/"), filename)
    }
}

/// Percent-encodes one segment with `encodeURIComponent` semantics.
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, COMPONENT).to_string()
}

/// Lowercased extension taken from the source URL, query and fragment
/// stripped. Falls back to the last dot-separated piece verbatim.
pub fn file_extension_from_url(url: &str) -> String {
    let tail = url.rsplit('.').next().unwrap_or_default();
    let tail = tail.split('?').next().unwrap_or_default();
    let tail = tail.split('#').next().unwrap_or_default();
    tail.to_ascii_lowercase()
}

/// Replaces or appends the filename extension so it matches the source URL.
pub fn ensure_file_extension(filename: &str, url: &str) -> String {
    let extension = file_extension_from_url(url);
    let stem = match filename.rfind('.') {
        Some(pos)
            if filename[pos + 1..]
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                && !filename[pos + 1..].is_empty() =>
        {
            &filename[..pos]
        }
        _ => filename,
    };
    format!("{stem}.{extension}")
}

/// Formats destination names according to the configured scheme.
#[derive(Debug, Clone)]
pub struct FilenameGenerator {
    format: FilenameFormat,
}

impl FilenameGenerator {
    pub fn new(format: FilenameFormat) -> Self {
        Self { format: format.effective() }
    }

    pub fn set_format(&mut self, format: FilenameFormat) {
        self.format = format.effective();
    }

    pub fn format(&self) -> FilenameFormat {
        self.format
    }

    /// Filename (without extension) for one page. The page number in the
    /// name is one-based.
    pub fn generate(
        &self,
        title: &str,
        user_name: &str,
        id: &ArtworkId,
        page_index: usize,
    ) -> String {
        let title = encode_segment(&sanitize(title));
        let user = encode_segment(&sanitize(user_name));
        let n = page_index + 1;

        match self.format {
            FilenameFormat::TitlePage | FilenameFormat::Unrecognized => format!("{title}_{n}"),
            FilenameFormat::IdPage => format!("{id}_{n}"),
            FilenameFormat::AuthorTitlePage => format!("{user}/{title}_{n}"),
            FilenameFormat::AuthorIdPage => format!("{user}/{id}_{n}"),
        }
    }

    /// Folder prefix used by bulk download; same scheme minus the page part.
    pub fn generate_folder(&self, title: &str, user_name: &str, id: &ArtworkId) -> String {
        let title = encode_segment(&sanitize(title));
        let user = encode_segment(&sanitize(user_name));

        match self.format {
            FilenameFormat::TitlePage | FilenameFormat::Unrecognized => title,
            FilenameFormat::IdPage => id.to_string(),
            FilenameFormat::AuthorTitlePage => format!("{user}/{title}"),
            FilenameFormat::AuthorIdPage => format!("{user}/{id}"),
        }
    }
}
