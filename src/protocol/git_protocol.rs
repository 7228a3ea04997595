use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use bytes::Bytes;
use flate2::write::GzDecoder;
use futures::StreamExt;
use hyper::body::Sender;
use hyper::Body;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::pktline;
use crate::core::{GitError, Result};

/// Read size for relaying child stdout
const CHUNK_SIZE: usize = 64 * 1024;

/// The two Smart HTTP services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitService {
    UploadPack,
    ReceivePack,
}

impl GitService {
    /// Parse the `service` query value or the final path segment
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "git-upload-pack" => Ok(GitService::UploadPack),
            "git-receive-pack" => Ok(GitService::ReceivePack),
            _ => Err(GitError::invalid("Invalid service")),
        }
    }

    /// Wire name, e.g. `git-upload-pack`
    pub fn name(&self) -> &'static str {
        match self {
            GitService::UploadPack => "git-upload-pack",
            GitService::ReceivePack => "git-receive-pack",
        }
    }

    /// `git` subcommand, e.g. `upload-pack`
    pub fn subcommand(&self) -> &'static str {
        match self {
            GitService::UploadPack => "upload-pack",
            GitService::ReceivePack => "receive-pack",
        }
    }

    pub fn advertisement_content_type(&self) -> String {
        format!("application/x-{}-advertisement", self.name())
    }

    pub fn result_content_type(&self) -> String {
        format!("application/x-{}-result", self.name())
    }
}

impl fmt::Display for GitService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Client payload for a service call
pub struct ServiceInput {
    pub body: Body,
    /// Request carried `Content-Encoding: gzip`
    pub gzip: bool,
}

/// Runs `git <service> --stateless-rpc` for one request
#[derive(Debug, Clone)]
pub struct GitBackend {
    git_binary: PathBuf,
    timeout: Duration,
}

impl GitBackend {
    pub fn new(git_binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            git_binary: git_binary.into(),
            timeout,
        }
    }

    /// Body of an info/refs response: the service announcement followed by
    /// the child's ref advertisement.
    pub fn advertise(&self, service: GitService, repo: &Path, git_protocol: Option<&str>) -> Result<Body> {
        let process = ServiceProcess::spawn(&self.git_binary, service, repo, true, git_protocol, None)?;
        let preamble = pktline::service_announcement(service.name())?;
        Ok(process.into_body(Some(preamble), self.timeout))
    }

    /// Body of a service response: `input` is streamed to the child and its
    /// output streamed back.
    pub fn serve(
        &self,
        service: GitService,
        repo: &Path,
        git_protocol: Option<&str>,
        input: ServiceInput,
    ) -> Result<Body> {
        let process = ServiceProcess::spawn(&self.git_binary, service, repo, false, git_protocol, Some(input))?;
        Ok(process.into_body(None, self.timeout))
    }
}

/// A running service child and the tasks feeding and draining it.
///
/// Dropping the handle aborts the pumps and kills the child.
struct ServiceProcess {
    child: Child,
    pumps: Vec<JoinHandle<()>>,
    label: String,
}

impl ServiceProcess {
    fn spawn(
        git_binary: &Path,
        service: GitService,
        repo: &Path,
        advertise: bool,
        git_protocol: Option<&str>,
        input: Option<ServiceInput>,
    ) -> Result<Self> {
        let mut command = Command::new(git_binary);
        command.arg(service.subcommand()).arg("--stateless-rpc");
        if advertise {
            command.arg("--advertise-refs");
        }
        command
            .arg(repo)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(protocol) = git_protocol {
            command.env("GIT_PROTOCOL", protocol);
        }

        let mut child = command.spawn().map_err(|e| {
            GitError::Process(format!(
                "Failed to spawn {} {}: {}",
                git_binary.display(),
                service.subcommand(),
                e
            ))
        })?;
        let label = format!("{} {}", service.subcommand(), repo.display());
        debug!(service = %label, advertise, "spawned git");

        let mut pumps = Vec::new();
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(drain_stderr(stderr, label.clone())));
        }
        if let (Some(input), Some(stdin)) = (input, child.stdin.take()) {
            let label = label.clone();
            pumps.push(tokio::spawn(async move {
                if let Err(e) = pump_input(input, stdin).await {
                    // The child may legitimately exit before reading everything
                    debug!(service = %label, error = %e, "stopped feeding git");
                }
            }));
        }

        Ok(Self { child, pumps, label })
    }

    /// Response body fed by a task that owns this process
    fn into_body(self, preamble: Option<Bytes>, timeout: Duration) -> Body {
        let (sender, body) = Body::channel();
        tokio::spawn(self.run(sender, preamble, timeout));
        body
    }

    async fn run(mut self, mut sender: Sender, preamble: Option<Bytes>, timeout: Duration) {
        let outcome = tokio::time::timeout(timeout, self.forward(&mut sender, preamble)).await;
        match outcome {
            Ok(Ok(status)) if status.success() => debug!(service = %self.label, "git finished"),
            Ok(Ok(status)) => {
                warn!(service = %self.label, %status, "git exited unsuccessfully");
                sender.abort();
            }
            Ok(Err(e)) => {
                warn!(service = %self.label, error = %e, "relay failed");
                self.kill().await;
                sender.abort();
            }
            Err(_) => {
                warn!(service = %self.label, ?timeout, "git timed out");
                self.kill().await;
                sender.abort();
            }
        }
    }

    /// Copy stdout to the response one chunk at a time, waiting for the client
    /// to take each chunk before reading the next.
    async fn forward(&mut self, sender: &mut Sender, preamble: Option<Bytes>) -> Result<ExitStatus> {
        if let Some(preamble) = preamble {
            sender.send_data(preamble).await?;
        }
        let mut stdout = self
            .child
            .stdout
            .take()
            .ok_or_else(|| GitError::Process("git stdout was not captured".to_string()))?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = stdout.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            sender.send_data(Bytes::copy_from_slice(&buf[..n])).await?;
        }
        Ok(self.child.wait().await?)
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(service = %self.label, error = %e, "kill failed");
        }
    }
}

impl Drop for ServiceProcess {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

async fn drain_stderr(stderr: ChildStderr, label: String) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => warn!(service = %label, "git: {}", line),
            Ok(None) => break,
            Err(e) => {
                debug!(service = %label, error = %e, "stderr closed");
                break;
            }
        }
    }
}

/// Stream the request body into the child's stdin, inflating gzip on the fly
async fn pump_input(input: ServiceInput, mut stdin: ChildStdin) -> Result<()> {
    let ServiceInput { mut body, gzip } = input;
    let mut decoder = gzip.then(|| GzDecoder::new(Vec::new()));
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        match decoder.as_mut() {
            Some(decoder) => {
                decoder.write_all(&chunk)?;
                let inflated = std::mem::take(decoder.get_mut());
                stdin.write_all(&inflated).await?;
            }
            None => stdin.write_all(&chunk).await?,
        }
    }
    if let Some(decoder) = decoder {
        let rest = decoder.finish()?;
        stdin.write_all(&rest).await?;
    }
    stdin.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_names() {
        assert_eq!(GitService::from_name("git-upload-pack").unwrap(), GitService::UploadPack);
        assert_eq!(GitService::from_name("git-receive-pack").unwrap(), GitService::ReceivePack);
        assert!(matches!(
            GitService::from_name("git-archive"),
            Err(GitError::InvalidArgument(ref msg)) if msg == "Invalid service"
        ));
        assert_eq!(
            GitService::UploadPack.advertisement_content_type(),
            "application/x-git-upload-pack-advertisement"
        );
        assert_eq!(
            GitService::ReceivePack.result_content_type(),
            "application/x-git-receive-pack-result"
        );
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        /// A stand-in for the git binary running `script`
        fn fake_git(dir: &Path, script: &str) -> PathBuf {
            let path = dir.join("fake-git");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn advertisement_is_prefixed_with_the_announcement() {
            let dir = tempfile::tempdir().unwrap();
            let backend = GitBackend::new(fake_git(dir.path(), "echo \"$@\""), Duration::from_secs(10));
            let body = backend
                .advertise(GitService::UploadPack, Path::new("/srv/r.git"), None)
                .unwrap();
            let bytes = hyper::body::to_bytes(body).await.unwrap();
            assert_eq!(
                &bytes[..],
                &b"001e# service=git-upload-pack\n0000upload-pack --stateless-rpc --advertise-refs /srv/r.git\n"[..]
            );
        }

        #[tokio::test]
        async fn request_bodies_reach_stdin_inflated() {
            let dir = tempfile::tempdir().unwrap();
            let backend = GitBackend::new(fake_git(dir.path(), "cat"), Duration::from_secs(10));

            let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(b"0032want 0123456789012345678901234567890123456789\n0000").unwrap();
            let compressed = encoder.finish().unwrap();

            let body = backend
                .serve(
                    GitService::UploadPack,
                    Path::new("/srv/r.git"),
                    None,
                    ServiceInput { body: Body::from(compressed), gzip: true },
                )
                .unwrap();
            let bytes = hyper::body::to_bytes(body).await.unwrap();
            assert_eq!(&bytes[..], &b"0032want 0123456789012345678901234567890123456789\n0000"[..]);
        }

        #[tokio::test]
        async fn hung_children_are_cut_off() {
            let dir = tempfile::tempdir().unwrap();
            let backend = GitBackend::new(fake_git(dir.path(), "sleep 30"), Duration::from_millis(200));
            let body = backend
                .advertise(GitService::ReceivePack, Path::new("/srv/r.git"), None)
                .unwrap();
            assert!(hyper::body::to_bytes(body).await.is_err());
        }

        #[tokio::test]
        async fn failed_spawn_is_a_process_error() {
            let backend = GitBackend::new("/nonexistent/git", Duration::from_secs(1));
            let err = backend
                .advertise(GitService::UploadPack, Path::new("/srv/r.git"), None)
                .unwrap_err();
            assert!(matches!(err, GitError::Process(_)));
        }
    }
}
