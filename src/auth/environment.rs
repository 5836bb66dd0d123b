//! Host detection: can a browser on this machine reach a loopback redirect?

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Variables set in SSH sessions, dev containers and cloud IDEs
const REMOTE_MARKERS: &[&str] = &[
    "SSH_CLIENT",
    "SSH_CONNECTION",
    "SSH_TTY",
    "REMOTE_CONTAINERS",
    "CODESPACES",
    "GITPOD_WORKSPACE_ID",
    "CLOUD_SHELL",
    "DEVCONTAINER",
];

const DISPLAY_MARKERS: &[&str] = &["DISPLAY", "WAYLAND_DISPLAY"];

const WSL_MARKERS: &[&str] = &["WSL_DISTRO_NAME", "WSL_INTEROP"];

const LINUX_LIKE: &[&str] = &["linux", "freebsd", "openbsd", "netbsd", "dragonfly"];

/// How the authorization response reaches the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowMode {
    /// Browser redirects to the loopback listener
    Local,
    /// Operator pastes the redirect URL back into the terminal
    Manual,
}

impl fmt::Display for FlowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Manual => f.write_str("manual"),
        }
    }
}

type KernelReader = Box<dyn Fn() -> Option<String> + Send + Sync>;

/// Snapshot of the signals used to pick a [`FlowMode`]
///
/// Build one from the running process with [`from_process`](Self::from_process),
/// or from explicit values in tests.
pub struct EnvironmentProbe {
    vars: HashMap<String, String>,
    platform: String,
    kernel_release: KernelReader,
    kernel: OnceLock<Option<String>>,
}

impl fmt::Debug for EnvironmentProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentProbe")
            .field("platform", &self.platform)
            .field("vars", &self.vars.len())
            .finish_non_exhaustive()
    }
}

impl EnvironmentProbe {
    /// Probe over explicit variables and platform name, with no kernel string
    pub fn new<K, V>(vars: impl IntoIterator<Item = (K, V)>, platform: impl Into<String>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            platform: platform.into(),
            kernel_release: Box::new(|| None),
            kernel: OnceLock::new(),
        }
    }

    /// Probe over the current process environment and kernel
    #[must_use]
    pub fn from_process() -> Self {
        Self::new(std::env::vars(), std::env::consts::OS).with_kernel_release(read_kernel_release)
    }

    /// Replace the kernel-version reader
    ///
    /// The reader runs at most once per probe.
    #[must_use]
    pub fn with_kernel_release<F>(mut self, reader: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        self.kernel_release = Box::new(reader);
        self.kernel = OnceLock::new();
        self
    }

    fn is_set(&self, key: &str) -> bool {
        self.vars.get(key).is_some_and(|v| !v.is_empty())
    }

    fn kernel(&self) -> Option<&str> {
        self.kernel
            .get_or_init(|| (self.kernel_release)().map(|k| k.to_lowercase()))
            .as_deref()
    }

    /// Remote shell, dev container or cloud IDE session
    #[must_use]
    pub fn is_containerish(&self) -> bool {
        REMOTE_MARKERS.iter().any(|key| self.is_set(key))
    }

    fn is_wsl(&self) -> bool {
        WSL_MARKERS.iter().any(|key| self.is_set(key))
            || self.kernel().is_some_and(|k| k.contains("microsoft"))
    }

    /// Linux-like host without a graphical session
    ///
    /// WSL is excluded: it reaches the Windows browser through its own bridge.
    #[must_use]
    pub fn is_headless_linux(&self) -> bool {
        LINUX_LIKE.contains(&self.platform.as_str())
            && !DISPLAY_MARKERS.iter().any(|key| self.is_set(key))
            && !self.is_wsl()
    }

    /// WSL 2 kernel, where the Windows browser cannot reach the loopback listener
    #[must_use]
    pub fn is_wsl2(&self) -> bool {
        self.kernel()
            .is_some_and(|k| k.contains("microsoft-standard") || k.contains("wsl2"))
    }

    /// Decide the flow mode; `Local` unless some signal says otherwise
    #[must_use]
    pub fn flow_mode(&self) -> FlowMode {
        if self.is_containerish() || self.is_headless_linux() || self.is_wsl2() {
            FlowMode::Manual
        } else {
            FlowMode::Local
        }
    }
}

fn read_kernel_release() -> Option<String> {
    ["/proc/sys/kernel/osrelease", "/proc/version"]
        .iter()
        .find_map(|path| std::fs::read_to_string(path).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn probe(vars: &[(&str, &str)], platform: &str) -> EnvironmentProbe {
        EnvironmentProbe::new(vars.iter().copied(), platform)
    }

    #[test]
    fn test_no_signals_is_local() {
        assert_eq!(probe(&[], "macos").flow_mode(), FlowMode::Local);
        assert_eq!(probe(&[], "windows").flow_mode(), FlowMode::Local);
    }

    #[test]
    fn test_ssh_forces_manual_even_with_display() {
        let p = probe(&[("SSH_CLIENT", "10.0.0.2 51514 22"), ("DISPLAY", ":0")], "linux");
        assert!(p.is_containerish());
        assert_eq!(p.flow_mode(), FlowMode::Manual);

        let mac = probe(&[("SSH_CLIENT", "10.0.0.2 51514 22")], "macos");
        assert_eq!(mac.flow_mode(), FlowMode::Manual);
    }

    #[test]
    fn test_linux_with_display_is_local() {
        assert_eq!(probe(&[("DISPLAY", ":0")], "linux").flow_mode(), FlowMode::Local);
        assert_eq!(
            probe(&[("WAYLAND_DISPLAY", "wayland-0")], "linux").flow_mode(),
            FlowMode::Local
        );
    }

    #[test]
    fn test_bare_linux_is_manual() {
        let p = probe(&[], "linux")
            .with_kernel_release(|| Some("6.8.0-45-generic".to_string()));
        assert!(p.is_headless_linux());
        assert_eq!(p.flow_mode(), FlowMode::Manual);
    }

    #[test]
    fn test_empty_marker_is_ignored() {
        let p = probe(&[("SSH_CLIENT", ""), ("DISPLAY", ":1")], "linux");
        assert_eq!(p.flow_mode(), FlowMode::Local);
    }

    #[test]
    fn test_wsl1_is_not_headless() {
        let p = probe(&[], "linux")
            .with_kernel_release(|| Some("4.4.0-19041-Microsoft".to_string()));
        assert!(!p.is_headless_linux());
        assert!(!p.is_wsl2());
        assert_eq!(p.flow_mode(), FlowMode::Local);

        let by_env = probe(&[("WSL_DISTRO_NAME", "Ubuntu")], "linux");
        assert!(!by_env.is_headless_linux());
    }

    #[test]
    fn test_wsl2_is_manual() {
        let p = probe(&[("WSL_DISTRO_NAME", "Ubuntu")], "linux")
            .with_kernel_release(|| Some("5.15.153.1-microsoft-standard-WSL2".to_string()));
        assert!(!p.is_headless_linux());
        assert!(p.is_wsl2());
        assert_eq!(p.flow_mode(), FlowMode::Manual);
    }

    #[test]
    fn test_kernel_is_read_once() {
        let reads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reads);
        let p = probe(&[], "linux").with_kernel_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Some("5.15.153.1-microsoft-standard-WSL2".to_string())
        });

        assert_eq!(p.flow_mode(), FlowMode::Manual);
        assert!(p.is_wsl2());
        assert!(!p.is_headless_linux());
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_codespaces_is_manual() {
        assert_eq!(
            probe(&[("CODESPACES", "true")], "linux").flow_mode(),
            FlowMode::Manual
        );
    }
}
