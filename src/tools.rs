use std::path::PathBuf;

/// Search PATH and common install prefixes for an external tool.
pub fn find(name: &str) -> Option<PathBuf> {
    if let Some(p) = find_in_path(name) {
        return Some(p);
    }

    let fallback_dirs = ["/usr/local/bin", "/usr/bin", "/opt/homebrew/bin"];
    for dir in &fallback_dirs {
        let p = PathBuf::from(dir).join(name);
        if p.is_file() {
            return Some(p);
        }
    }

    if let Some(home) = dirs::home_dir() {
        let p = home.join(".local/bin").join(name);
        if p.is_file() {
            return Some(p);
        }
    }

    None
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    })
}
