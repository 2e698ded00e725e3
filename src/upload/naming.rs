use uuid::Uuid;

const UPLOADS_PREFIX: &str = "uploads";

/// Maps a client supplied name to a token that is safe to use in a storage
/// path. Anything other than letters, digits, `-`, `_` and `.` becomes `_`,
/// runs of `_` collapse to one and leading/trailing `_` are dropped. The
/// result may be empty.
pub fn sanitize_filename(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());
    for c in name.chars() {
        let c = if c.is_alphanumeric() || c == '-' || c == '.' {
            c
        } else {
            '_'
        };
        if c == '_' && sanitized.ends_with('_') {
            continue;
        }
        sanitized.push(c);
    }
    sanitized.trim_matches('_').to_string()
}

/// `uploads/<random token>_<sanitized name>`; unique even when two clients
/// upload the same name at once.
pub fn storage_path(original_filename: &str) -> String {
    format!(
        "{}/{}_{}",
        UPLOADS_PREFIX,
        Uuid::new_v4().simple(),
        sanitize_filename(original_filename)
    )
}

/// Last segment of a storage path.
pub fn generated_filename(storage_path: &str) -> &str {
    storage_path
        .rsplit_once('/')
        .map(|(_, name)| name)
        .unwrap_or(storage_path)
}
