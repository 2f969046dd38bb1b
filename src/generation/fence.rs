const FENCE: &str = "```";

/// Strip the opening fence line (with its optional language tag) and the
/// closing fence from a model response.
///
/// Applied until nothing changes, so the result never starts or ends with a
/// fence and stripping it again is a no-op.
pub fn strip_code_fences(text: &str) -> String {
    let mut current = text.trim();
    loop {
        let next = strip_once(current);
        if next.len() == current.len() {
            return current.to_string();
        }
        current = next;
    }
}

fn strip_once(text: &str) -> &str {
    let mut code = text.trim();
    if let Some(rest) = code.strip_prefix(FENCE) {
        code = match rest.find('\n') {
            Some(pos) => &rest[pos + 1..],
            None => rest,
        };
    }
    if let Some(rest) = code.strip_suffix(FENCE) {
        code = rest;
    }
    code.trim()
}
