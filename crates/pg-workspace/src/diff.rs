//! Line-aligned comparison for human review.
//!
//! Line `i` of the old text is compared with line `i` of the new text. Insertions in
//! the middle of a file therefore show every following line as changed. The output is
//! meant for reading, not for feeding back into a patch tool.

pub const NULL_DEVICE: &str = "/dev/null";

pub fn split_lines(text: &str) -> Vec<&str> {
    text.lines().collect()
}

pub fn aligned_diff(old_label: &str, new_label: &str, old: &str, new: &str) -> String {
    let old_lines = split_lines(old);
    let new_lines = split_lines(new);

    let mut out = String::new();
    out.push_str(&format!("--- {old_label}\n+++ {new_label}\n"));
    out.push_str(&format!(
        "@@ -{} +{} @@\n",
        range(old_lines.len()),
        range(new_lines.len())
    ));

    for index in 0..old_lines.len().max(new_lines.len()) {
        match (old_lines.get(index), new_lines.get(index)) {
            (Some(before), Some(after)) if before == after => {
                out.push(' ');
                out.push_str(before);
                out.push('\n');
            }
            (before, after) => {
                if let Some(before) = before {
                    out.push('-');
                    out.push_str(before);
                    out.push('\n');
                }
                if let Some(after) = after {
                    out.push('+');
                    out.push_str(after);
                    out.push('\n');
                }
            }
        }
    }
    out
}

pub fn creation_diff(path: &str, content: &str) -> String {
    aligned_diff(NULL_DEVICE, path, "", content)
}

pub fn deletion_diff(path: &str, content: &str) -> String {
    aligned_diff(path, NULL_DEVICE, content, "")
}

fn range(len: usize) -> String {
    if len == 0 {
        "0,0".to_string()
    } else {
        format!("1,{len}")
    }
}
