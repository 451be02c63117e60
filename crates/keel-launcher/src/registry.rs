// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Registry of launchers keyed by target triple.
//!
//! One launcher per triple; registering a triple again replaces the previous
//! launcher. Several triples may share one launcher instance.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::launcher::Launcher;
use crate::target::Target;

#[derive(Default)]
pub struct LauncherRegistry {
    launchers: RwLock<HashMap<Target, Arc<dyn Launcher>>>,
}

impl LauncherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `launcher` for `target`, returning the launcher it replaced.
    pub fn add(&self, target: Target, launcher: Arc<dyn Launcher>) -> Option<Arc<dyn Launcher>> {
        debug!(triple = %target, "registering launcher");
        self.launchers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target, launcher)
    }

    pub fn remove(&self, target: &Target) -> Option<Arc<dyn Launcher>> {
        self.launchers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(target)
    }

    pub fn get(&self, target: &Target) -> Option<Arc<dyn Launcher>> {
        self.launchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .cloned()
    }

    /// Registered triples in sorted order.
    pub fn list(&self) -> Vec<Target> {
        let mut targets: Vec<Target> = self
            .launchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        targets.sort();
        targets
    }

    pub fn len(&self) -> usize {
        self.launchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for LauncherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LauncherRegistry")
            .field("targets", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inline::InlineLauncher;
    use crate::native::NativeLauncher;

    #[test]
    fn add_get_remove() {
        let registry = LauncherRegistry::new();
        assert!(registry.is_empty());

        let native: Arc<dyn Launcher> = Arc::new(NativeLauncher::new());
        assert!(registry.add(Target::native(), Arc::clone(&native)).is_none());
        assert!(registry.get(&Target::native()).is_some());
        assert!(registry.get(&Target::inline()).is_none());

        assert!(registry.remove(&Target::native()).is_some());
        assert!(registry.remove(&Target::native()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn re_adding_a_triple_overwrites() {
        let registry = LauncherRegistry::new();
        registry.add(Target::inline(), Arc::new(InlineLauncher::new(1024)));
        let replaced = registry.add(Target::inline(), Arc::new(InlineLauncher::new(2048)));
        assert!(replaced.is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn triples_may_share_a_launcher() {
        let registry = LauncherRegistry::new();
        let native: Arc<dyn Launcher> = Arc::new(NativeLauncher::new());
        registry.add(Target::native(), Arc::clone(&native));
        registry.add(Target::parse("elf-x86_64-linux").unwrap(), native);
        assert_eq!(
            registry.list(),
            vec![
                Target::parse("elf-x86_64-linux").unwrap(),
                Target::native()
            ]
        );
    }
}
