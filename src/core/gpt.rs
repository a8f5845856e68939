//! Invocation of the SNAP graph processing tool and other external programs.

use crate::config::Settings;
use crate::types::{ArdError, ArdResult};
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Run an external program with stdout and stderr written to `logfile`.
/// Returns the exit code.
pub fn run_command<S: AsRef<OsStr>>(program: &OsStr, args: &[S], logfile: &Path) -> ArdResult<i32> {
    if let Some(parent) = logfile.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log = File::create(logfile)?;
    let err = log.try_clone()?;

    log::debug!(
        "Running {} {}",
        program.to_string_lossy(),
        args.iter()
            .map(|a| a.as_ref().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    );
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(err))
        .status()
        .map_err(|e| {
            ArdError::Processing(format!(
                "Could not start {}: {}",
                program.to_string_lossy(),
                e
            ))
        })?;

    // killed by a signal
    Ok(status.code().unwrap_or(-1))
}

/// Location of the toolbox and the threads each invocation may use
#[derive(Debug, Clone, PartialEq)]
pub struct Gpt {
    pub path: PathBuf,
    pub max_workers: usize,
}

impl Gpt {
    pub fn new<P: Into<PathBuf>>(path: P, max_workers: usize) -> Self {
        Self {
            path: path.into(),
            max_workers: max_workers.max(1),
        }
    }

    pub fn from_settings(settings: &Settings, max_workers: usize) -> ArdResult<Self> {
        Ok(Self::new(settings.gpt_path()?, max_workers))
    }

    /// Command running a single toolbox operator
    pub fn operator(&self, name: &str) -> GptCommand {
        GptCommand::new(self, GptTarget::Operator(name.to_string()))
    }

    /// Command running a graph file
    pub fn graph<P: AsRef<Path>>(&self, graph: P) -> GptCommand {
        GptCommand::new(self, GptTarget::Graph(graph.as_ref().to_path_buf()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GptTarget {
    Operator(String),
    Graph(PathBuf),
}

/// Builder for one toolbox invocation
#[derive(Debug, Clone)]
pub struct GptCommand {
    gpt: PathBuf,
    target: GptTarget,
    workers: usize,
    cache: Option<String>,
    params: Vec<(String, String)>,
    output: Option<PathBuf>,
    sources: Vec<PathBuf>,
}

impl GptCommand {
    fn new(gpt: &Gpt, target: GptTarget) -> Self {
        Self {
            gpt: gpt.path.clone(),
            target,
            workers: gpt.max_workers,
            cache: None,
            params: Vec::new(),
            output: None,
            sources: Vec::new(),
        }
    }

    /// Tile cache size, e.g. `256M`
    pub fn cache(mut self, size: &str) -> Self {
        self.cache = Some(size.to_string());
        self
    }

    pub fn param<V: ToString>(mut self, key: &str, value: V) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    pub fn target<P: AsRef<Path>>(mut self, output: P) -> Self {
        self.output = Some(output.as_ref().to_path_buf());
        self
    }

    pub fn source<P: AsRef<Path>>(mut self, input: P) -> Self {
        self.sources.push(input.as_ref().to_path_buf());
        self
    }

    /// Name used in log messages and errors
    pub fn name(&self) -> String {
        match &self.target {
            GptTarget::Operator(name) => name.clone(),
            GptTarget::Graph(path) => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "graph".to_string()),
        }
    }

    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        match &self.target {
            GptTarget::Operator(name) => args.push(name.into()),
            GptTarget::Graph(path) => args.push(path.into()),
        }
        if let Some(cache) = &self.cache {
            args.push("-c".into());
            args.push(cache.into());
        }
        args.push("-x".into());
        args.push("-q".into());
        args.push((2 * self.workers).to_string().into());
        for (key, value) in &self.params {
            args.push(format!("-P{}={}", key, value).into());
        }
        if let Some(output) = &self.output {
            args.push("-t".into());
            args.push(output.into());
        }
        for source in &self.sources {
            args.push(source.into());
        }
        args
    }

    /// Run the tool; a non-zero exit is a [`ArdError::GptRuntime`]
    pub fn run(&self, logfile: &Path) -> ArdResult<()> {
        let code = run_command(self.gpt.as_os_str(), &self.args(), logfile)?;
        if code != 0 {
            return Err(ArdError::GptRuntime {
                operator: self.name(),
                code,
                logfile: logfile.to_path_buf(),
            });
        }
        log::debug!("{} finished", self.name());
        Ok(())
    }
}

/// Log file of a processing step, placed beside the step's outputs
pub fn step_logfile(out_dir: &Path, prefix: &str, step: &str) -> PathBuf {
    out_dir.join(format!("{}.{}.errLog", prefix, step))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_operator_args() {
        let gpt = Gpt::new("/opt/snap/bin/gpt", 4);
        let cmd = gpt
            .operator("Terrain-Flattening")
            .cache("256M")
            .param("demName", "SRTM 1Sec HGT")
            .param("additionalOverlap", 0.1)
            .target("/out/tf.dim")
            .source("/in/cal.dim");
        assert_eq!(
            strings(cmd.args()),
            vec![
                "Terrain-Flattening",
                "-c",
                "256M",
                "-x",
                "-q",
                "8",
                "-PdemName=SRTM 1Sec HGT",
                "-PadditionalOverlap=0.1",
                "-t",
                "/out/tf.dim",
                "/in/cal.dim"
            ]
        );
    }

    #[test]
    fn test_graph_name() {
        let gpt = Gpt::new("gpt", 0);
        let cmd = gpt.graph("/tmp/job/burst_import.xml");
        assert_eq!(cmd.name(), "burst_import");
        assert_eq!(strings(cmd.args())[3], "2");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_maps_exit_code() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("gpt");
        std::fs::write(&fake, "#!/bin/sh\necho \"$1 failed\" >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let logfile = dir.path().join("logs").join("x.Calibration.errLog");
        let err = Gpt::new(&fake, 1).operator("Calibration").run(&logfile).unwrap_err();
        match err {
            ArdError::GptRuntime { operator, code, .. } => {
                assert_eq!(operator, "Calibration");
                assert_eq!(code, 3);
            }
            other => panic!("unexpected error {:?}", other),
        }
        let log = std::fs::read_to_string(&logfile).unwrap();
        assert!(log.contains("Calibration failed"));
    }
}
