use std::fmt;

/// A revision-qualified name: `root@treeish/path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    pub root: String,
    pub treeish: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("no '@' separator")]
    NoSeparator,
    #[error("empty root before '@'")]
    EmptyRoot,
    #[error("treeish is empty or starts with '/'")]
    EmptyOrAbsoluteTreeish,
}

impl Name {
    /// Parse `root@treeish[/path]`. The input is cleaned first, so
    /// `/a/b@rev/`, `/a/b@rev/.` and `/a/b@rev` all give path `"."`.
    pub fn parse(name: &str) -> Result<Name, NameError> {
        let cleaned = clean_name(name);
        let (root, rest) = cleaned.split_once('@').ok_or(NameError::NoSeparator)?;
        if root.is_empty() {
            return Err(NameError::EmptyRoot);
        }
        if rest.is_empty() || rest.starts_with('/') {
            return Err(NameError::EmptyOrAbsoluteTreeish);
        }

        let (treeish, path) = match rest.split_once('/') {
            None => (rest, "."),
            Some((treeish, "")) => (treeish, "."),
            Some((treeish, path)) => (treeish, path),
        };

        Ok(Name {
            root: root.to_string(),
            treeish: treeish.to_string(),
            path: path.to_string(),
        })
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path == "." {
            write!(f, "{}@{}", self.root, self.treeish)
        } else {
            write!(f, "{}@{}/{}", self.root, self.treeish, self.path)
        }
    }
}

/// Lexically canonicalize a slash-separated name the way Plan 9's
/// `cleanname` does: collapse repeated slashes, drop `.` elements, fold
/// `..` into its parent and strip any trailing slash. An empty result is `"."`.
pub fn clean_name(name: &str) -> String {
    let rooted = name.starts_with('/');
    let mut elems: Vec<&str> = Vec::new();

    for elem in name.split('/') {
        match elem {
            "" | "." => {}
            ".." => match elems.last() {
                Some(last) if *last != ".." => {
                    elems.pop();
                }
                // `/..` is `/`
                _ if rooted => {}
                _ => elems.push(".."),
            },
            _ => elems.push(elem),
        }
    }

    let joined = elems.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}
