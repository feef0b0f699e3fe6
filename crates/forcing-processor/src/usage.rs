//! CPU time and peak resident memory from `getrusage(2)`.

use serde::{Deserialize, Serialize};

/// Resource counters of a process (or of its reaped children).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub user_secs: f64,
    pub system_secs: f64,
    /// High-water mark of the resident set, kilobytes
    pub peak_rss_kb: u64,
}

impl ResourceUsage {
    /// Usage of the calling process.
    pub fn current() -> Self {
        rusage(Who::SelfProcess)
    }

    /// Usage of the calling process plus every child it has waited for.
    ///
    /// CPU times add up; the peak is the larger of the two high-water marks.
    pub fn with_children() -> Self {
        let own = rusage(Who::SelfProcess);
        let children = rusage(Who::Children);
        Self {
            user_secs: own.user_secs + children.user_secs,
            system_secs: own.system_secs + children.system_secs,
            peak_rss_kb: own.peak_rss_kb.max(children.peak_rss_kb),
        }
    }

    pub fn cpu_secs(&self) -> f64 {
        self.user_secs + self.system_secs
    }

    pub fn peak_rss_mb(&self) -> f64 {
        self.peak_rss_kb as f64 / 1024.0
    }

    /// CPU spent since `earlier`; the peak is the peak at `self`.
    pub fn since(&self, earlier: &ResourceUsage) -> Self {
        Self {
            user_secs: (self.user_secs - earlier.user_secs).max(0.0),
            system_secs: (self.system_secs - earlier.system_secs).max(0.0),
            peak_rss_kb: self.peak_rss_kb,
        }
    }
}

enum Who {
    SelfProcess,
    Children,
}

#[cfg(unix)]
fn rusage(who: Who) -> ResourceUsage {
    let who = match who {
        Who::SelfProcess => libc::RUSAGE_SELF,
        Who::Children => libc::RUSAGE_CHILDREN,
    };
    // SAFETY: rusage is plain old data and getrusage only writes into it.
    let mut raw: libc::rusage = unsafe { std::mem::zeroed() };
    if unsafe { libc::getrusage(who, &mut raw) } != 0 {
        return ResourceUsage::default();
    }

    let secs = |t: libc::timeval| t.tv_sec as f64 + t.tv_usec as f64 / 1e6;
    // ru_maxrss is kilobytes on Linux and bytes on macOS
    let peak_rss_kb = if cfg!(target_os = "macos") {
        raw.ru_maxrss as u64 / 1024
    } else {
        raw.ru_maxrss as u64
    };
    ResourceUsage {
        user_secs: secs(raw.ru_utime),
        system_secs: secs(raw.ru_stime),
        peak_rss_kb,
    }
}

#[cfg(not(unix))]
fn rusage(_who: Who) -> ResourceUsage {
    ResourceUsage::default()
}
