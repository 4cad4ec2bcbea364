//! Maps applied changes to how disruptive they are for the engine.
//!
//! The engine reloads its runtime registry on SIGHUP. Network topology, user
//! namespace remapping, the cgroup driver and the image store only take
//! effect after a full daemon restart.

use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Network,
    Identity,
    Runtime,
    Cgroup,
    ImageStore,
}

impl Category {
    pub fn is_disruptive(self) -> bool {
        !matches!(self, Category::Runtime)
    }

    pub fn name(self) -> &'static str {
        match self {
            Category::Network => "network",
            Category::Identity => "identity",
            Category::Runtime => "runtime",
            Category::Cgroup => "cgroup",
            Category::ImageStore => "image-store",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verdict {
    None,
    SignalOnly,
    FullRestart,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::None => "none",
            Verdict::SignalOnly => "signal-only",
            Verdict::FullRestart => "full-restart",
        })
    }
}

/// Decide the verdict from the categories that actually changed.
pub fn verdict<I>(changed: I, force: bool) -> Verdict
where
    I: IntoIterator<Item = Category>,
{
    let changed: BTreeSet<Category> = changed.into_iter().collect();
    if force || changed.iter().any(|c| c.is_disruptive()) {
        Verdict::FullRestart
    } else if changed.contains(&Category::Runtime) {
        Verdict::SignalOnly
    } else {
        Verdict::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nothing_changed() {
        let nothing: [Category; 0] = [];
        assert_eq!(verdict(nothing, false), Verdict::None);
    }

    #[test]
    fn test_force_overrides_empty_change_set() {
        let nothing: [Category; 0] = [];
        assert_eq!(verdict(nothing, true), Verdict::FullRestart);
        assert_eq!(verdict([Category::Runtime], true), Verdict::FullRestart);
    }

    #[test]
    fn test_runtime_only_is_signal() {
        assert_eq!(
            verdict([Category::Runtime, Category::Runtime], false),
            Verdict::SignalOnly
        );
    }

    #[test]
    fn test_each_disruptive_category_alone() {
        for category in [
            Category::Network,
            Category::Identity,
            Category::Cgroup,
            Category::ImageStore,
        ] {
            assert_eq!(
                verdict([category], false),
                Verdict::FullRestart,
                "{category} should force a restart"
            );
        }
    }

    #[test]
    fn test_disruptive_wins_over_runtime() {
        assert_eq!(
            verdict([Category::Runtime, Category::Network], false),
            Verdict::FullRestart
        );
    }

    #[test]
    fn test_verdict_ordering_reflects_disruption() {
        assert!(Verdict::None < Verdict::SignalOnly);
        assert!(Verdict::SignalOnly < Verdict::FullRestart);
    }
}
