//! Branch name sanitation for epic worktrees (§4.C).

const RESERVED: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const MAX_BRANCH_BYTES: usize = 200;

/// ASCII-lowercase, collapse whitespace/punctuation runs into single `-`,
/// strip anything else non-alphanumeric.
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_dash = false;
    for ch in name.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_alphanumeric() {
            slug.push(lower);
            last_was_dash = false;
        } else if !last_was_dash {
            slug.push('-');
            last_was_dash = true;
        }
    }
    slug.trim_matches('-').to_string()
}

/// `epic/{id}-{slug(name)}`, truncated so the full branch name is at most
/// 200 bytes, with reserved Windows device names suffixed `-epic`.
pub fn branch_name(epic_id: &str, epic_name: &str) -> String {
    let slug = slugify(epic_name);
    let slug = if RESERVED.contains(&slug.to_uppercase().as_str()) {
        format!("{slug}-epic")
    } else {
        slug
    };

    let mut branch = format!("epic/{epic_id}-{slug}");
    if branch.len() > MAX_BRANCH_BYTES {
        branch = truncate_to_char_boundary(&branch, MAX_BRANCH_BYTES);
    }
    branch
}

fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> String {
    let mut end = max_bytes.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
