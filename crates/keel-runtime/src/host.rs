// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The root context of one keel host.
//!
//! A [`Host`] owns the launcher table and the component registry (which owns
//! the object registry). Nothing here is global, so several hosts can live
//! side by side in one process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use keel_config::KeelConfig;
use keel_core::{ComponentId, Dispatcher, KeelError, Subscription};
use keel_launcher::{
    ChildRuntimeLauncher, InlineLauncher, LaunchParams, LauncherRegistry, NativeLauncher, Signal,
    Target,
};
use keel_protocol::{Extension, ExtensionManifest, ExtensionOptions, Terminable};

use crate::builtin::{CORE_COMPONENT, CoreComponent};
use crate::registry::ComponentRegistry;

struct LoadedExtension {
    extension: Arc<Extension>,
    directory: PathBuf,
    exit_hook: Subscription,
}

pub struct Host {
    config: KeelConfig,
    registry: Arc<ComponentRegistry>,
    launchers: Arc<LauncherRegistry>,
    inline: Arc<InlineLauncher>,
    extensions: Mutex<HashMap<ComponentId, LoadedExtension>>,
    /// Aborts launches still in flight when the host shuts down.
    launches: CancellationToken,
}

impl Host {
    /// Builds a host with the built-in launchers and the `core` component.
    pub fn new(config: KeelConfig) -> Result<Arc<Self>, KeelError> {
        let launchers = Arc::new(LauncherRegistry::new());
        launchers.add(Target::native(), Arc::new(NativeLauncher::new()));

        // Only registered when a child runtime is configured.
        match &config.launchers.child_runtime {
            Some(program) => {
                let child = ChildRuntimeLauncher::new(program.clone())
                    .with_leading_args(config.launchers.child_runtime_args.iter().cloned());
                launchers.add(Target::child_runtime(), Arc::new(child));
            }
            None => debug!("no child runtime configured, child-runtime launcher disabled"),
        }

        let inline = Arc::new(InlineLauncher::new(config.launchers.inline_buffer_size));
        launchers.add(Target::inline(), inline.clone());

        let host = Arc::new(Self {
            config,
            registry: ComponentRegistry::new(),
            launchers,
            inline,
            extensions: Mutex::new(HashMap::new()),
            launches: CancellationToken::new(),
        });
        let core = CoreComponent::new(Arc::downgrade(&host));
        host.registry
            .register_component(CoreComponent::manifest(), Arc::new(core))?;
        Ok(host)
    }

    pub fn config(&self) -> &KeelConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn launchers(&self) -> &Arc<LauncherRegistry> {
        &self.launchers
    }

    /// Where in-process modules are registered before they can be loaded.
    pub fn inline_launcher(&self) -> &Arc<InlineLauncher> {
        &self.inline
    }

    fn options(&self) -> ExtensionOptions {
        ExtensionOptions {
            request_timeout: self.config.protocol.request_timeout(),
            client_name: self.config.host.name.clone(),
            ..ExtensionOptions::default()
        }
    }

    /// Launches the extension in `directory` and registers it as a component.
    pub async fn load_extension(&self, directory: &Path) -> Result<ComponentId, KeelError> {
        let manifest = ExtensionManifest::load(directory)?;
        let id = manifest.component.id();
        if self.registry.contains(&id) {
            return Err(KeelError::InvalidRequest(format!(
                "component '{id}' is already registered"
            )));
        }

        let target = manifest.launcher.target.clone();
        let launcher = self.launchers.get(&target).ok_or_else(|| {
            KeelError::InvalidParams(format!("no launcher for target '{target}'"))
        })?;
        let params = LaunchParams {
            requirements: manifest.launcher.requirements.clone(),
            cancel: Some(self.launches.child_token()),
        };
        let executable = manifest.executable_path(directory);
        let process = launcher.launch(&executable, &manifest.args, params).await?;
        info!(extension = %id, target = %target, pid = ?process.pid(), "extension launched");

        let registry: Weak<ComponentRegistry> = Arc::downgrade(&self.registry);
        let dispatcher: Weak<dyn Dispatcher> = registry;
        let component = manifest.component.clone();
        let extension = Extension::spawn(manifest, process, dispatcher, self.options());
        if let Err(e) = self.registry.register_component(component, extension.clone()) {
            if let Err(kill) = extension.signal(Signal::Kill) {
                warn!(extension = %id, error = %kill, "failed to kill unregistered extension");
            }
            return Err(e);
        }

        let registry = Arc::downgrade(&self.registry);
        let exited = id.clone();
        let exit_hook = extension.on_exit(move |status| {
            warn!(extension = %exited, %status, "extension exited");
            let Some(registry) = registry.upgrade() else {
                return;
            };
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                return;
            };
            let id = exited.clone();
            runtime.spawn(async move {
                if let Err(e) = registry.uninitialize_component(&id).await {
                    debug!(extension = %id, error = %e, "teardown after exit reported an error");
                }
            });
        });

        self.extensions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id.clone(),
                LoadedExtension {
                    extension,
                    directory: directory.to_path_buf(),
                    exit_hook,
                },
            );
        Ok(id)
    }

    /// Loads `<extensions.directory>/<name>`.
    pub async fn load_extension_by_id(&self, name: &str) -> Result<ComponentId, KeelError> {
        let directory = self.config.extensions.directory.join(name);
        self.load_extension(&directory).await
    }

    /// Tears an extension down and forgets it.
    pub async fn unload_extension(&self, id: &ComponentId) -> Result<(), KeelError> {
        let loaded = self
            .extensions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .ok_or_else(|| KeelError::InvalidParams(format!("no extension named '{id}'")))?;
        loaded.exit_hook.dispose();
        debug!(extension = %id, directory = %loaded.directory.display(), "unloading extension");
        self.registry.unregister_component(id).await
    }

    /// Extension ids currently loaded, sorted.
    pub fn extensions(&self) -> Vec<ComponentId> {
        let mut ids: Vec<ComponentId> = self
            .extensions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn extension(&self, id: &ComponentId) -> Option<Arc<Extension>> {
        self.extensions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|loaded| Arc::clone(&loaded.extension))
    }

    /// Activates `core`, loads the autoload extensions, then activates every
    /// registered component. Returns what failed; nothing here is fatal.
    pub async fn startup(&self) -> Vec<(String, KeelError)> {
        let mut failures = Vec::new();
        if let Err(e) = self
            .registry
            .activate_component(&ComponentId::from(CORE_COMPONENT))
            .await
        {
            error!(error = %e, "core component failed to activate");
            failures.push((CORE_COMPONENT.to_string(), e));
        }

        for name in &self.config.extensions.autoload {
            if let Err(e) = self.load_extension_by_id(name).await {
                error!(extension = %name, error = %e, "failed to load extension");
                failures.push((name.clone(), e));
            }
        }

        failures.extend(
            self.registry
                .startup()
                .await
                .into_iter()
                .map(|(id, e)| (id.to_string(), e)),
        );
        info!(
            components = self.registry.component_list().len(),
            active = self.registry.activated_list().len(),
            "host started"
        );
        failures
    }

    /// Stops pending launches and shuts every component down.
    pub async fn shutdown(&self) -> Result<(), KeelError> {
        self.launches.cancel();
        let loaded: Vec<LoadedExtension> = self
            .extensions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, loaded)| loaded)
            .collect();
        for extension in &loaded {
            extension.exit_hook.dispose();
        }
        let result = self.registry.shutdown().await;
        info!("host shut down");
        result
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.config.host.name)
            .field("registry", &self.registry)
            .field("launchers", &self.launchers)
            .finish_non_exhaustive()
    }
}
