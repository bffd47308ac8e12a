use std::{
    fs, io,
    path::Path,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::sound::{Placement, SoundFile, SoundStorage, FILETYPE};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum JobError {
    #[error("could not start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("{program} produced no output")]
    EmptyOutput { program: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// An external program with `{placeholder}` arguments.
///
/// Known placeholders are `{input}`, `{output}`, `{from}`, `{to}` and `{url}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| (*a).to_owned()).collect(),
        }
    }

    fn render_args(&self, vars: &[(&str, &str)]) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (key, value)| {
                    acc.replace(&format!("{{{key}}}"), value)
                })
            })
            .collect()
    }

    fn command(&self, vars: &[(&str, &str)]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.render_args(vars)).stdin(Stdio::null());
        cmd
    }
}

/// The external programs behind playback and sound editing.
#[derive(Debug, Clone, Builder)]
#[builder(default)]
pub struct Toolbox {
    player: ToolCommand,
    normalizer: ToolCommand,
    padder: ToolCommand,
    trimmer: ToolCommand,
    fader: ToolCommand,
    downloader: ToolCommand,
    /// Upper bound for every blocking invocation.
    timeout: Duration,
}

impl Default for Toolbox {
    fn default() -> Self {
        Self {
            player: ToolCommand::new("mpg123", &["{input}"]),
            normalizer: ToolCommand::new("mp3gain", &["-r", "{input}"]),
            padder: ToolCommand::new("sox", &["{input}", "{output}", "pad", "0.5", "0"]),
            trimmer: ToolCommand::new("sox", &["{input}", "{output}", "trim", "{from}", "={to}"]),
            fader: ToolCommand::new("sox", &["{input}", "{output}", "fade", "0", "-0", "2"]),
            downloader: ToolCommand::new(
                "youtube-dl",
                &[
                    "--extract-audio",
                    "--audio-format",
                    FILETYPE,
                    "{url}",
                    "-o",
                    "{output}.%(ext)s",
                ],
            ),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

fn non_empty(path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.is_file() && meta.len() > 0),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

impl Toolbox {
    /// Starts playback and returns immediately. Must be called inside a
    /// tokio runtime.
    pub fn play(&self, sound: &SoundFile) -> Result<(), JobError> {
        self.spawn_detached(&self.player, sound)
    }

    /// Starts loudness normalization in place and returns immediately.
    pub fn normalize(&self, sound: &SoundFile) -> Result<(), JobError> {
        self.spawn_detached(&self.normalizer, sound)
    }

    pub async fn pad(&self, sound: &SoundFile) -> Result<(), JobError> {
        self.edit(&self.padder, sound, &[]).await
    }

    pub async fn fade(&self, sound: &SoundFile) -> Result<(), JobError> {
        self.edit(&self.fader, sound, &[]).await
    }

    pub async fn trim(&self, sound: &SoundFile, from: &str, to: &str) -> Result<(), JobError> {
        self.edit(&self.trimmer, sound, &[("from", from), ("to", to)])
            .await
    }

    /// Fetches `url` as audio into the library at `placement`.
    ///
    /// The downloader writes into a hidden scratch directory inside the
    /// library so the final move is a rename on the same filesystem.
    #[tracing::instrument(skip(self, storage))]
    pub async fn download(
        &self,
        url: &str,
        storage: &SoundStorage,
        placement: &Placement,
    ) -> Result<SoundFile, JobError> {
        storage.ensure_dir()?;
        let scratch = tempfile::Builder::new()
            .prefix(".download")
            .tempdir_in(&storage.dir)?;
        let output = scratch.path().join(&placement.slug);
        let output_arg = output.to_string_lossy().into_owned();
        self.run(&self.downloader, &[("url", url), ("output", output_arg.as_str())])
            .await?;

        let produced = output.with_extension(FILETYPE);
        if !non_empty(&produced)? {
            return Err(JobError::EmptyOutput {
                program: self.downloader.program.clone(),
            });
        }
        Ok(storage.store_file(placement, &produced)?)
    }

    fn spawn_detached(&self, tool: &ToolCommand, sound: &SoundFile) -> Result<(), JobError> {
        let input = sound.path.to_string_lossy();
        let mut child = tool
            .command(&[("input", &*input)])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| JobError::Spawn {
                program: tool.program.clone(),
                source,
            })?;

        let program = tool.program.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => debug!("{program} finished"),
                Ok(status) => warn!("{program} exited with {status}"),
                Err(e) => warn!("Error while waiting for {program}: {e:?}"),
            }
        });
        Ok(())
    }

    /// Runs the editor into a temp file next to the sound and swaps it in
    /// only when the tool succeeded with a non-empty result.
    async fn edit(
        &self,
        tool: &ToolCommand,
        sound: &SoundFile,
        extra: &[(&str, &str)],
    ) -> Result<(), JobError> {
        let folder = sound.path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::Builder::new()
            .prefix(".__new__")
            .suffix(&format!(".{FILETYPE}"))
            .tempfile_in(folder)?;

        let input = sound.path.to_string_lossy().into_owned();
        let output = tmp.path().to_string_lossy().into_owned();
        let mut vars = vec![("input", input.as_str()), ("output", output.as_str())];
        vars.extend_from_slice(extra);
        self.run(tool, &vars).await?;

        if !non_empty(tmp.path())? {
            return Err(JobError::EmptyOutput {
                program: tool.program.clone(),
            });
        }
        tmp.persist(&sound.path).map_err(|e| e.error)?;
        info!("Rewrote {:?} with {}", sound.path, tool.program);
        Ok(())
    }

    async fn run(&self, tool: &ToolCommand, vars: &[(&str, &str)]) -> Result<(), JobError> {
        let mut cmd = tool.command(vars);
        cmd.kill_on_drop(true);
        debug!("Running {cmd:?}");

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(output) => output.map_err(|source| JobError::Spawn {
                program: tool.program.clone(),
                source,
            })?,
            Err(_) => {
                return Err(JobError::Timeout {
                    program: tool.program.clone(),
                    timeout: self.timeout,
                })
            }
        };
        if !output.status.success() {
            return Err(JobError::Failed {
                program: tool.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sh(script: &str, args: &[&str]) -> ToolCommand {
        let mut all = vec!["-c", script];
        all.extend_from_slice(args);
        ToolCommand::new("sh", &all)
    }

    fn library() -> (tempfile::TempDir, SoundStorage, SoundFile) {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = SoundStorage::new(temp_dir.path());
        let placement = Placement::from_raw("bruh").unwrap();
        let sound = storage.store(&placement, b"original").unwrap();
        (temp_dir, storage, sound)
    }

    fn leftovers(sound: &SoundFile) -> Vec<String> {
        fs::read_dir(sound.path.parent().unwrap())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with('.'))
            .collect()
    }

    #[test]
    fn test_render_args() {
        let tool = Toolbox::default().trimmer;
        assert_eq!(
            tool.render_args(&[
                ("input", "a.mp3"),
                ("output", "b.mp3"),
                ("from", "1.5"),
                ("to", "3")
            ]),
            vec!["a.mp3", "b.mp3", "trim", "1.5", "=3"]
        );
    }

    #[test]
    fn test_builder_keeps_defaults() {
        let toolbox = ToolboxBuilder::default()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        assert_eq!(toolbox.timeout, Duration::from_secs(5));
        assert_eq!(toolbox.player, ToolCommand::new("mpg123", &["{input}"]));
    }

    #[tokio::test]
    async fn test_edit_replaces_on_success() {
        let (_temp_dir, _storage, sound) = library();
        let toolbox = ToolboxBuilder::default()
            .trimmer(sh(
                r#"printf '%s-%s' "$2" "$3" > "$1""#,
                &["{input}", "{output}", "{from}", "{to}"],
            ))
            .padder(sh(r#"cat "$0" > "$1"; printf '+pad' >> "$1""#, &["{input}", "{output}"]))
            .build()
            .unwrap();

        toolbox.pad(&sound).await.unwrap();
        assert_eq!(fs::read_to_string(&sound.path).unwrap(), "original+pad");

        toolbox.trim(&sound, "1.5", "3").await.unwrap();
        assert_eq!(fs::read_to_string(&sound.path).unwrap(), "1.5-3");
        assert!(leftovers(&sound).is_empty());
    }

    #[tokio::test]
    async fn test_failed_edit_keeps_original() {
        let (_temp_dir, _storage, sound) = library();
        let toolbox = ToolboxBuilder::default()
            .fader(sh("echo broken >&2; exit 3", &[]))
            .padder(sh("true", &[]))
            .trimmer(ToolCommand::new("no-such-sound-editor", &["{input}"]))
            .build()
            .unwrap();

        match toolbox.fade(&sound).await {
            Err(JobError::Failed { stderr, .. }) => assert_eq!(stderr, "broken"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            toolbox.pad(&sound).await,
            Err(JobError::EmptyOutput { .. })
        ));
        assert!(matches!(
            toolbox.trim(&sound, "0", "1").await,
            Err(JobError::Spawn { .. })
        ));
        assert_eq!(fs::read_to_string(&sound.path).unwrap(), "original");
        assert!(leftovers(&sound).is_empty());
    }

    #[tokio::test]
    async fn test_hung_tool_times_out() {
        let (_temp_dir, _storage, sound) = library();
        let toolbox = ToolboxBuilder::default()
            .fader(sh("sleep 5", &[]))
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();

        assert!(matches!(
            toolbox.fade(&sound).await,
            Err(JobError::Timeout { .. })
        ));
        assert_eq!(fs::read_to_string(&sound.path).unwrap(), "original");
    }

    #[tokio::test]
    async fn test_download_into_folder() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = SoundStorage::new(temp_dir.path().join("sounds"));
        let toolbox = ToolboxBuilder::default()
            .downloader(sh(r#"printf '%s' "$0" > "$1.mp3""#, &["{url}", "{output}"]))
            .build()
            .unwrap();

        let placement = Placement::from_raw("memes:Never Gonna").unwrap();
        let sound = toolbox
            .download("https://example.com/x", &storage, &placement)
            .await
            .unwrap();
        assert_eq!(sound.folder, "memes");
        assert_eq!(sound.name, "never_gonna");
        assert_eq!(
            fs::read_to_string(&sound.path).unwrap(),
            "https://example.com/x"
        );
        assert_eq!(storage.folders(), vec!["memes"]);
        assert!(storage.get("never gonna").is_some());
    }

    #[tokio::test]
    async fn test_download_without_output() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = SoundStorage::new(temp_dir.path());
        let toolbox = ToolboxBuilder::default()
            .downloader(sh("true", &[]))
            .build()
            .unwrap();

        let placement = Placement::from_raw("clip").unwrap();
        assert!(matches!(
            toolbox.download("https://example.com/x", &storage, &placement).await,
            Err(JobError::EmptyOutput { .. })
        ));
        assert!(storage.files().is_empty());
        assert!(storage.folders().is_empty());
    }

    #[tokio::test]
    async fn test_play_missing_player() {
        let (_temp_dir, _storage, sound) = library();
        let toolbox = ToolboxBuilder::default()
            .player(ToolCommand::new("no-such-player", &["{input}"]))
            .normalizer(sh("exit 0", &[]))
            .build()
            .unwrap();
        assert!(matches!(
            toolbox.play(&sound),
            Err(JobError::Spawn { .. })
        ));
        toolbox.normalize(&sound).unwrap();
    }
}
