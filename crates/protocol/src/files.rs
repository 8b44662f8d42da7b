//! `<FILE path="…">` blocks used to send numbered files to the model and
//! read micropatch bodies back.

/// One `<FILE>` block from a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlock {
    pub path: String,
    pub body: String,
}

#[must_use]
pub fn format_file_block(path: &str, name: &str, numbered: &str) -> String {
    format!("<FILE path=\"{path}\" name=\"{name}\">\n{numbered}\n</FILE>")
}

const OPEN: &str = "<FILE";
const CLOSE: &str = "</FILE>";
const PATH_ATTR: &str = "path=\"";

/// Read the `path` attribute from the inside of an opening tag
fn path_attribute(tag: &str) -> Option<&str> {
    let start = tag.find(PATH_ATTR)? + PATH_ATTR.len();
    let len = tag[start..].find('"')?;
    (len > 0).then(|| &tag[start..start + len])
}

/// Extract every well-formed block, in reply order. Bodies are trimmed.
///
/// A block needs an opening tag with a non-empty `path` attribute and a
/// matching `</FILE>`; anything else is skipped.
#[must_use]
pub fn parse_file_blocks(text: &str) -> Vec<FileBlock> {
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find(OPEN) {
        rest = &rest[open + OPEN.len()..];
        let Some(tag_end) = rest.find('>') else {
            break;
        };
        let tag = &rest[..tag_end];
        let Some(path) = path_attribute(tag) else {
            continue;
        };
        let body_start = tag_end + 1;
        let Some(close) = rest[body_start..].find(CLOSE) else {
            break;
        };
        let body = &rest[body_start..body_start + close];
        blocks.push(FileBlock {
            path: path.to_string(),
            body: body.trim().to_string(),
        });
        rest = &rest[body_start + close + CLOSE.len()..];
    }
    blocks
}
