//! Fixed HTML and static payloads served by the listing router.

use std::fmt::Write;

use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::build::BuildError;
use crate::commits::CommitIndex;

pub const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /\n";

/// 1x1 transparent GIF.
pub const FAVICON: &[u8] = &[
  0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff,
  0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02,
  0x02, 0x44, 0x01, 0x00, 0x3b,
];

pub const FAVICON_CONTENT_TYPE: &str = "image/gif";

/// The commit listing, newest first as the index was given.
pub fn listing(repo: &str, index: &CommitIndex) -> String {
  let mut page = format!(
    "<!DOCTYPE html>\n<title>{}</title>\n<p>{} commits:</p>\n<ul>\n",
    encode_text(repo),
    index.len()
  );

  for commit in index.all() {
    let _ = writeln!(
      page,
      "<li><a href=\"/commit/{}\"><code>{}</code> {}</a></li>",
      encode_double_quoted_attribute(&commit.id),
      encode_text(&commit.id),
      encode_text(&commit.title)
    );
  }

  page.push_str("</ul>");
  page
}

/// Error page for a commit whose build failed.
pub fn build_failed(commit: &str, error: &BuildError) -> String {
  format!(
    "<!DOCTYPE html>\n<title>Build failed: {commit}</title>\n<p>Building <code>{commit}</code> failed:</p>\n<pre>{detail}</pre>",
    commit = encode_text(commit),
    detail = encode_text(&error.to_string())
  )
}

pub fn not_found() -> String {
  "<!DOCTYPE html>\n<title>Not Found</title>\n<p>404 page not found</p>".to_string()
}
