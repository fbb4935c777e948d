use crate::command::{CommandFactory, Context, ExecutableCommand, ExitCode};
use crate::console::Console;
use crate::plugin::{PluginCapsule, PluginHost, PluginLoader};
use crate::registry::Registry;
use anyhow::Result;
use std::collections::BTreeMap;
use std::io::Write;
use std::rc::Rc;

/// Name → command mapping for one session: the built-ins plus every app
/// that loaded. Built-ins always win over an app with the same name.
pub struct CommandTable {
    builtins: Vec<Box<dyn CommandFactory>>,
    apps: BTreeMap<String, Rc<PluginCapsule>>,
}

impl CommandTable {
    pub fn new(builtins: Vec<Box<dyn CommandFactory>>) -> Self {
        Self {
            builtins,
            apps: BTreeMap::new(),
        }
    }

    /// Replace the app half of the table with whatever loads from `registry`.
    ///
    /// Apps that fail to load are reported on `out` and left out, as are apps
    /// named like a built-in; the rest of the table is unaffected.
    pub fn reload_apps(
        &mut self,
        registry: &Registry,
        loader: &mut PluginLoader,
        console: &mut dyn Console,
        out: &mut dyn Write,
    ) {
        let mut apps = BTreeMap::new();
        for descriptor in registry.iter() {
            // reported once by `install`
            if self.builtin(&descriptor.name).is_some() {
                tracing::debug!(app = %descriptor.name, "app shadowed by a built-in");
                continue;
            }
            match loader.load(descriptor, console, out) {
                Ok(capsule) => {
                    apps.insert(descriptor.name.clone(), Rc::new(capsule));
                }
                Err(err) => {
                    tracing::warn!("{err}");
                    let _ = writeln!(out, "{err}");
                }
            }
        }
        tracing::debug!(loaded = apps.len(), registered = registry.len(), "command table built");
        self.apps = apps;
    }

    pub fn builtin(&self, name: &str) -> Option<&dyn CommandFactory> {
        self.builtins
            .iter()
            .find(|factory| factory.name() == name)
            .map(|factory| factory.as_ref())
    }

    /// Built-ins in registration order.
    pub fn builtins(&self) -> impl Iterator<Item = &dyn CommandFactory> {
        self.builtins.iter().map(|factory| factory.as_ref())
    }

    pub fn app(&self, name: &str) -> Option<&PluginCapsule> {
        self.apps.get(name).map(Rc::as_ref)
    }

    /// Loaded apps in name order.
    pub fn apps(&self) -> impl Iterator<Item = &PluginCapsule> {
        self.apps.values().map(Rc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.builtins.len() + self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builtin(name).is_some() || self.apps.contains_key(name)
    }

    /// Build the command `name` would run, built-ins first.
    pub fn resolve(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        for factory in &self.builtins {
            if let Some(cmd) = factory.try_create(name, args) {
                return Some(cmd);
            }
        }
        self.apps.get(name).map(|capsule| {
            Box::new(PluginCommand {
                capsule: Rc::clone(capsule),
                args: args.iter().map(|arg| arg.to_string()).collect(),
            }) as Box<dyn ExecutableCommand>
        })
    }
}

struct PluginCommand {
    capsule: Rc<PluginCapsule>,
    args: Vec<String>,
}

impl ExecutableCommand for PluginCommand {
    fn execute(self: Box<Self>, ctx: &mut Context<'_>) -> Result<ExitCode> {
        let mut host = PluginHost {
            out: &mut *ctx.out,
            current_dir: &ctx.session.current_dir,
        };
        Ok(self.capsule.invoke(&self.args, &mut host))
    }
}
