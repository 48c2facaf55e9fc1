//! Platform detection and the static asset naming table

use std::fmt;

use once_cell::sync::OnceCell;

use super::error::UpdateError;

/// Operating systems that upstream publishes builds for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    Darwin,
    Windows,
    FreeBsd,
}

/// CPU architectures that upstream publishes builds for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    Amd64,
    Arm64,
    I386,
}

/// Naming rules for one operating system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformRule {
    pub os: Os,
    /// Token used in asset names (e.g. "darwin")
    pub token: &'static str,
    /// Archive extensions in priority order, without the leading dot
    pub extensions: &'static [&'static str],
    /// Suffix appended to the binary name on disk
    pub exe_suffix: &'static str,
}

/// One row per supported OS. New platforms are added here, not in the matcher.
pub const PLATFORM_RULES: &[PlatformRule] = &[
    PlatformRule {
        os: Os::Linux,
        token: "linux",
        extensions: &["tar.gz", "zip"],
        exe_suffix: "",
    },
    PlatformRule {
        os: Os::Darwin,
        token: "darwin",
        extensions: &["tar.gz", "zip"],
        exe_suffix: "",
    },
    PlatformRule {
        os: Os::Windows,
        token: "windows",
        extensions: &["zip"],
        exe_suffix: ".exe",
    },
    PlatformRule {
        os: Os::FreeBsd,
        token: "freebsd",
        extensions: &["tar.gz", "zip"],
        exe_suffix: "",
    },
];

impl Os {
    /// Map a `std::env::consts::OS` value
    pub fn from_std(os: &str) -> Option<Self> {
        match os {
            "linux" => Some(Os::Linux),
            "macos" => Some(Os::Darwin),
            "windows" => Some(Os::Windows),
            "freebsd" => Some(Os::FreeBsd),
            _ => None,
        }
    }

    pub fn rule(self) -> &'static PlatformRule {
        PLATFORM_RULES
            .iter()
            .find(|rule| rule.os == self)
            .unwrap_or(&PLATFORM_RULES[0])
    }
}

impl Arch {
    /// Map a `std::env::consts::ARCH` value
    pub fn from_std(arch: &str) -> Option<Self> {
        match arch {
            "x86_64" => Some(Arch::Amd64),
            "aarch64" => Some(Arch::Arm64),
            "x86" => Some(Arch::I386),
            _ => None,
        }
    }

    /// Token used in asset names. arm64 is published under the `aarch64` alias.
    pub fn token(self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "aarch64",
            Arch::I386 => "386",
        }
    }
}

/// OS and architecture pair used to pick release assets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlatformKey {
    pub os: Os,
    pub arch: Arch,
}

/// Detected once per process
static PLATFORM_CACHE: OnceCell<PlatformKey> = OnceCell::new();

impl PlatformKey {
    pub const fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// Detect current platform (cached after first call)
    pub fn detect() -> Result<Self, UpdateError> {
        PLATFORM_CACHE
            .get_or_try_init(|| Self::from_std(std::env::consts::OS, std::env::consts::ARCH))
            .copied()
    }

    fn from_std(os: &str, arch: &str) -> Result<Self, UpdateError> {
        match (Os::from_std(os), Arch::from_std(arch)) {
            (Some(os), Some(arch)) => Ok(Self { os, arch }),
            _ => Err(UpdateError::UnsupportedPlatform {
                os: os.to_string(),
                arch: arch.to_string(),
            }),
        }
    }

    pub fn rule(&self) -> &'static PlatformRule {
        self.os.rule()
    }

    /// `"{os}-{arch}"` as it appears in asset names
    pub fn target_token(&self) -> String {
        format!("{}-{}", self.rule().token, self.arch.token())
    }

    /// Archive extensions to accept, highest priority first
    pub fn candidate_extensions(&self) -> &'static [&'static str] {
        self.rule().extensions
    }

    /// On-disk file name for `binary_name` on this platform
    pub fn executable_name(&self, binary_name: &str) -> String {
        format!("{}{}", binary_name, self.rule().exe_suffix)
    }

    pub fn is_windows(&self) -> bool {
        self.os == Os::Windows
    }
}

impl fmt::Display for PlatformKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.target_token())
    }
}
