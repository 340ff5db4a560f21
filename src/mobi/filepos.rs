//! Filepos handling for MOBI HTML.
//!
//! MOBI files navigate with `filepos=NNNNN` attributes naming absolute
//! byte positions in the decompressed text stream. Reading works in three
//! passes:
//! 1. collect all filepos target positions from link attributes;
//! 2. insert `<a id="fileposN" name="fileposN"></a>` anchors at the exact
//!    byte positions (nudged past a tag when the offset lands inside one);
//! 3. convert every `filepos=NNNNN` attribute to `href="#fileposN"`.

use std::collections::BTreeSet;

use memchr::memmem;

/// Collect all filepos target values from `filepos=` attributes, quoted or
/// bare.
pub fn collect_filepos_targets(html: &[u8]) -> BTreeSet<usize> {
    let mut targets = BTreeSet::new();

    for pos in memmem::find_iter(html, b"filepos=") {
        if let Some((value, _)) = parse_filepos_value(&html[pos + 8..]) {
            targets.insert(value);
        }
    }

    targets
}

/// Parse the value portion after `filepos=`: optional quote, digits,
/// optional closing quote. Returns (value, bytes consumed).
fn parse_filepos_value(rest: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    let quoted = rest.first().is_some_and(|&b| b == b'"' || b == b'\'');
    if quoted {
        i += 1;
    }

    let digits_start = i;
    while i < rest.len() && rest[i].is_ascii_digit() {
        i += 1;
    }
    if i == digits_start {
        return None;
    }

    let value: usize = std::str::from_utf8(&rest[digits_start..i])
        .ok()?
        .parse()
        .ok()?;

    if quoted && rest.get(i).is_some_and(|&b| b == b'"' || b == b'\'') {
        i += 1;
    }

    Some((value, i))
}

/// Insert empty named anchors at every target position.
///
/// Positions are in original-stream coordinates; insertion happens in
/// ascending order so earlier inserts don't shift later targets. A target
/// inside a tag is advanced to just past the closing `>` so the anchor
/// never splits markup. The anchor id keeps the original N either way.
pub fn insert_anchors(html: &[u8], targets: &BTreeSet<usize>) -> Vec<u8> {
    let mut out = Vec::with_capacity(html.len() + targets.len() * 40);
    let mut last = 0;

    for &target in targets {
        if target == 0 || target > html.len() {
            continue;
        }
        let at = adjust_out_of_tag(html, target);
        if at < last {
            continue;
        }
        out.extend_from_slice(&html[last..at]);
        let anchor = format!("<a id=\"filepos{target}\" name=\"filepos{target}\"></a>");
        out.extend_from_slice(anchor.as_bytes());
        last = at;
    }
    out.extend_from_slice(&html[last..]);

    out
}

/// If `pos` falls between a `<` and its `>`, move it past the `>`.
fn adjust_out_of_tag(html: &[u8], pos: usize) -> usize {
    let before = &html[..pos.min(html.len())];
    let last_lt = before.iter().rposition(|&b| b == b'<');
    let last_gt = before.iter().rposition(|&b| b == b'>');

    let inside_tag = match (last_lt, last_gt) {
        (Some(lt), Some(gt)) => lt > gt,
        (Some(_), None) => true,
        _ => false,
    };

    if inside_tag {
        match html[pos..].iter().position(|&b| b == b'>') {
            Some(gt) => pos + gt + 1,
            None => html.len(),
        }
    } else {
        pos
    }
}

/// Rewrite every `filepos=NNNNN` attribute to `href="#fileposN"`.
pub fn rewrite_filepos_links(html: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(html.len());
    let mut pos = 0;
    let finder = memmem::Finder::new(b"filepos=");

    while let Some(found) = finder.find(&html[pos..]) {
        let at = pos + found;
        out.extend_from_slice(&html[pos..at]);

        match parse_filepos_value(&html[at + 8..]) {
            Some((value, consumed)) => {
                out.extend_from_slice(format!("href=\"#filepos{value}\"").as_bytes());
                pos = at + 8 + consumed;
            }
            None => {
                out.extend_from_slice(b"filepos=");
                pos = at + 8;
            }
        }
    }
    out.extend_from_slice(&html[pos..]);

    out
}

/// Rewrite `recindex="K"` (and the `hirecindex`/`lorecindex` variants) to
/// `src="images/{K:05}.jpg"`.
///
/// `image_count` bounds the 1-based indices that actually resolved to an
/// image record; out-of-range references are left untouched.
pub fn rewrite_image_refs(html: &[u8], image_count: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(html.len());
    let mut pos = 0;
    let finder = memmem::Finder::new(b"recindex=");

    while let Some(found) = finder.find(&html[pos..]) {
        let at = pos + found;

        // Back up over a "hi"/"lo" prefix so the whole attribute is
        // replaced.
        let attr_start = if at >= 2 && (html[at - 2..at].eq(b"hi") || html[at - 2..at].eq(b"lo")) {
            at - 2
        } else {
            at
        };

        match parse_filepos_value(&html[at + 9..]) {
            Some((index, consumed)) if index >= 1 && index <= image_count => {
                out.extend_from_slice(&html[pos..attr_start]);
                out.extend_from_slice(format!("src=\"images/{index:05}.jpg\"").as_bytes());
                pos = at + 9 + consumed;
            }
            _ => {
                out.extend_from_slice(&html[pos..at + 9]);
                pos = at + 9;
            }
        }
    }
    out.extend_from_slice(&html[pos..]);

    out
}

/// Full read-side anchor rewriting: collect, insert, convert.
pub fn transform_html(html: &[u8]) -> Vec<u8> {
    let targets = collect_filepos_targets(html);
    let with_anchors = insert_anchors(html, &targets);
    rewrite_filepos_links(&with_anchors)
}
