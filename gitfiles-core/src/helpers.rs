use std::fmt;
use std::pin::Pin;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};

use crate::config::Config;
use crate::name::Name;

/// What a stat helper says a name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    File,
    Directory,
    /// Neither a file nor a directory, or the helper failed.
    Missing,
}

impl ObjectKind {
    /// Interpret the first line of stat output.
    pub fn from_stat(output: &str) -> Self {
        match output.lines().next().map(str::trim) {
            Some("file") => ObjectKind::File,
            Some("directory") => ObjectKind::Directory,
            _ => ObjectKind::Missing,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::File => "file",
            ObjectKind::Directory => "directory",
            ObjectKind::Missing => "",
        }
    }

    pub fn is_found(self) -> bool {
        self != ObjectKind::Missing
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a content helper, read as it is produced.
pub type ContentStream = Pin<Box<dyn AsyncRead + Send>>;

/// The external commands that know about repositories.
#[async_trait]
pub trait RepoHelpers: Send + Sync {
    /// Raw stat output for a name: `file`, `directory` or nothing.
    async fn stat(&self, name: &Name) -> Result<String, String>;

    async fn read_file(&self, name: &Name) -> Result<ContentStream, String>;

    /// A directory listing, formatted for the window `window_id`.
    async fn read_directory(&self, name: &Name, window_id: u32) -> Result<ContentStream, String>;
}

/// Runs the configured helper programs as child processes.
#[derive(Debug, Clone)]
pub struct CommandHelpers {
    stat_command: Vec<String>,
    get_command: Vec<String>,
    directory_flag: String,
    directory_formatter: Vec<String>,
}

impl CommandHelpers {
    pub fn new(config: &Config) -> Self {
        Self {
            stat_command: config.stat_command.clone(),
            get_command: config.get_command.clone(),
            directory_flag: config.directory_flag.clone(),
            directory_formatter: config.directory_formatter.clone(),
        }
    }

    fn spawn_get(&self, extra: Option<&str>, name: &Name) -> Result<Child, String> {
        let mut cmd = build_command(&self.get_command)?;
        if let Some(flag) = extra.filter(|f| !f.is_empty()) {
            cmd.arg(flag);
        }
        cmd.arg(&name.root)
            .arg(&name.treeish)
            .arg(&name.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped());
        cmd.spawn()
            .map_err(|e| format!("Failed to run '{}': {}", self.get_command.join(" "), e))
    }
}

fn build_command(argv: &[String]) -> Result<Command, String> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| "helper command is empty".to_string())?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

/// Wait for a helper in the background so it never lingers as a zombie.
fn reap(mut child: Child, label: String) {
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) if status.success() => {}
            Ok(status) => log::warn!("{} exited with {}", label, status),
            Err(e) => log::warn!("{} could not be waited for: {}", label, e),
        }
    });
}

#[async_trait]
impl RepoHelpers for CommandHelpers {
    async fn stat(&self, name: &Name) -> Result<String, String> {
        let mut cmd = build_command(&self.stat_command)?;
        let output = cmd
            .arg(&name.root)
            .arg(&name.treeish)
            .arg(&name.path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| format!("Failed to run '{}': {}", self.stat_command.join(" "), e))?;

        if !output.status.success() {
            return Err(format!(
                "'{}' exited with {}",
                self.stat_command.join(" "),
                output.status
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn read_file(&self, name: &Name) -> Result<ContentStream, String> {
        let mut child = self.spawn_get(None, name)?;
        let stdout = child.stdout.take().ok_or("Failed to get helper stdout")?;
        reap(child, format!("{} {}", self.get_command.join(" "), name));
        Ok(Box::pin(stdout))
    }

    async fn read_directory(&self, name: &Name, window_id: u32) -> Result<ContentStream, String> {
        let mut lister = self.spawn_get(Some(&self.directory_flag), name)?;
        let mut listing = lister.stdout.take().ok_or("Failed to get helper stdout")?;
        reap(
            lister,
            format!("{} {} {}", self.get_command.join(" "), self.directory_flag, name),
        );

        if self.directory_formatter.is_empty() {
            return Ok(Box::pin(listing));
        }

        let mut formatter = build_command(&self.directory_formatter)?
            .env("winid", window_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| {
                format!(
                    "Failed to run '{}': {}",
                    self.directory_formatter.join(" "),
                    e
                )
            })?;
        let mut stdin = formatter.stdin.take().ok_or("Failed to get formatter stdin")?;
        let stdout = formatter.stdout.take().ok_or("Failed to get formatter stdout")?;
        reap(formatter, self.directory_formatter.join(" "));

        tokio::spawn(async move {
            if let Err(e) = tokio::io::copy(&mut listing, &mut stdin).await {
                log::debug!("directory listing pipe closed early: {}", e);
            }
            // dropping stdin delivers EOF to the formatter
        });

        Ok(Box::pin(stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into(), "sh".into()]
    }

    fn helpers(stat: &str, get: &str, formatter: Option<&str>) -> CommandHelpers {
        let config = Config {
            stat_command: sh(stat),
            get_command: sh(get),
            directory_formatter: formatter.map(sh).unwrap_or_default(),
            ..Config::default()
        };
        CommandHelpers::new(&config)
    }

    fn name() -> Name {
        Name::parse("/repo@v1/dir/a.txt").unwrap()
    }

    async fn drain(mut stream: ContentStream) -> String {
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        out
    }

    #[test]
    fn object_kind_from_stat_output() {
        assert_eq!(ObjectKind::from_stat("file\n"), ObjectKind::File);
        assert_eq!(ObjectKind::from_stat("directory"), ObjectKind::Directory);
        assert_eq!(ObjectKind::from_stat(""), ObjectKind::Missing);
        assert_eq!(ObjectKind::from_stat("symlink\n"), ObjectKind::Missing);
        assert_eq!(ObjectKind::Missing.as_str(), "");
        assert!(!ObjectKind::Missing.is_found());
    }

    #[tokio::test]
    async fn stat_passes_the_triple() {
        let h = helpers("echo \"$1|$2|$3\"", "true", None);
        assert_eq!(h.stat(&name()).await.unwrap(), "/repo|v1|dir/a.txt\n");
    }

    #[tokio::test]
    async fn stat_failure_is_an_error() {
        let h = helpers("exit 3", "true", None);
        assert!(h.stat(&name()).await.is_err());
    }

    #[tokio::test]
    async fn empty_command_is_an_error() {
        let config = Config {
            stat_command: Vec::new(),
            ..Config::default()
        };
        let h = CommandHelpers::new(&config);
        assert!(h.stat(&name()).await.is_err());
    }

    #[tokio::test]
    async fn read_file_streams_stdout() {
        let h = helpers("true", "printf 'contents of %s' \"$3\"", None);
        let stream = h.read_file(&name()).await.unwrap();
        assert_eq!(drain(stream).await, "contents of dir/a.txt");
    }

    #[tokio::test]
    async fn read_directory_passes_flag_without_formatter() {
        let h = helpers("true", "echo \"$1 $4\"", None);
        let stream = h.read_directory(&name(), 7).await.unwrap();
        assert_eq!(drain(stream).await, "-d dir/a.txt\n");
    }

    #[tokio::test]
    async fn read_directory_pipes_through_formatter() {
        let h = helpers(
            "true",
            "printf 'a\\nb\\n'",
            Some("tr a-z A-Z; echo \"win $winid\""),
        );
        let stream = h.read_directory(&name(), 42).await.unwrap();
        assert_eq!(drain(stream).await, "A\nB\nwin 42\n");
    }
}
