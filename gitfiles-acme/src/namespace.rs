use std::path::PathBuf;

/// The directory holding the acme and plumber sockets.
pub fn namespace() -> Result<PathBuf, String> {
    namespace_from(
        std::env::var("NAMESPACE").ok(),
        std::env::var("USER").ok(),
        std::env::var("DISPLAY").ok(),
    )
}

/// `$NAMESPACE` when set, otherwise `/tmp/ns.$USER.$DISPLAY` with a
/// trailing `.0` screen dropped from the display.
pub fn namespace_from(
    namespace: Option<String>,
    user: Option<String>,
    display: Option<String>,
) -> Result<PathBuf, String> {
    if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
        return Ok(PathBuf::from(ns));
    }
    let user = user
        .filter(|u| !u.is_empty())
        .ok_or_else(|| "cannot find namespace: $USER is not set".to_string())?;
    let display = display
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| ":0.0".to_string());
    let display = display.strip_suffix(".0").unwrap_or(&display).replace('/', "_");
    Ok(PathBuf::from(format!("/tmp/ns.{}.{}", user, display)))
}
