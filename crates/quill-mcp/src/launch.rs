//! Launch dispatch for stdio server commands.
//!
//! Logical command names map to a closed set of launch strategies rather
//! than open-ended shell interpretation. Bundled runtimes are preferred over
//! whatever happens to be on PATH so behaviour does not drift across
//! machines; unrecognized commands run verbatim.

use crate::error::McpError;
use std::path::PathBuf;

/// Bundled runtime kinds a locator can resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    Node,
    Python,
    Uv,
}

/// Resolves runtimes and launcher scripts shipped alongside the app.
///
/// Implemented by the packaging layer; the transport only consumes it.
pub trait RuntimeLocator: Send + Sync {
    /// Path to a bundled runtime binary, if one is shipped.
    fn runtime_path(&self, runtime: Runtime) -> Option<PathBuf>;

    /// Path to the npx launcher script inside the bundled npm tree.
    fn npx_launcher(&self) -> Option<PathBuf>;
}

/// Locator that ships no bundles; everything falls back to the system PATH.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLocator;

impl RuntimeLocator for SystemLocator {
    fn runtime_path(&self, _runtime: Runtime) -> Option<PathBuf> {
        None
    }

    fn npx_launcher(&self) -> Option<PathBuf> {
        None
    }
}

/// How a logical command is actually executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchPlan {
    /// `npx`: the bundled node runtime running the bundled npx launcher
    /// script, forwarding arguments.
    NodePackageRunner { args: Vec<String> },
    /// `node`: the bundled node binary invoked directly.
    NodeRuntime { args: Vec<String> },
    /// `python`/`python3`: the bundled interpreter if shipped, otherwise the
    /// system one. `-u` is injected if absent so output is never
    /// block-buffered behind the read loop.
    PythonInterpreter { args: Vec<String> },
    /// `uvx`: the bundled uv package manager in tool-run mode.
    UvPackageRunner { args: Vec<String> },
    /// Anything else: executed verbatim, resolved via the system PATH.
    Verbatim { command: String, args: Vec<String> },
}

/// A fully resolved program and argument list, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchPlan {
    /// Map a configured command name onto a launch strategy.
    pub fn for_command(command: &str, args: &[String]) -> Self {
        let args = args.to_vec();
        match command {
            "npx" => LaunchPlan::NodePackageRunner { args },
            "node" => LaunchPlan::NodeRuntime { args },
            "python" | "python3" => LaunchPlan::PythonInterpreter { args },
            "uvx" => LaunchPlan::UvPackageRunner { args },
            other => LaunchPlan::Verbatim {
                command: other.to_string(),
                args,
            },
        }
    }

    /// Resolve the strategy to a concrete program and arguments.
    pub fn resolve(&self, locator: &dyn RuntimeLocator) -> Result<ResolvedCommand, McpError> {
        match self {
            LaunchPlan::NodePackageRunner { args } => {
                let node = locator
                    .runtime_path(Runtime::Node)
                    .ok_or(McpError::MissingRuntime { runtime: "node" })?;
                let launcher = locator.npx_launcher().ok_or(McpError::MissingRuntime {
                    runtime: "npx launcher",
                })?;
                let mut full = vec![launcher.to_string_lossy().into_owned()];
                full.extend(args.iter().cloned());
                Ok(ResolvedCommand {
                    program: node.to_string_lossy().into_owned(),
                    args: full,
                })
            }
            LaunchPlan::NodeRuntime { args } => {
                let node = locator
                    .runtime_path(Runtime::Node)
                    .ok_or(McpError::MissingRuntime { runtime: "node" })?;
                Ok(ResolvedCommand {
                    program: node.to_string_lossy().into_owned(),
                    args: args.clone(),
                })
            }
            LaunchPlan::PythonInterpreter { args } => {
                let program = match locator.runtime_path(Runtime::Python) {
                    Some(path) => path.to_string_lossy().into_owned(),
                    None => "python3".to_string(),
                };
                let mut full = args.clone();
                if !full.iter().any(|a| a == "-u") {
                    full.insert(0, "-u".to_string());
                }
                Ok(ResolvedCommand {
                    program,
                    args: full,
                })
            }
            LaunchPlan::UvPackageRunner { args } => {
                let uv = locator
                    .runtime_path(Runtime::Uv)
                    .ok_or(McpError::MissingRuntime { runtime: "uv" })?;
                let mut full = vec!["tool".to_string(), "run".to_string()];
                full.extend(args.iter().cloned());
                Ok(ResolvedCommand {
                    program: uv.to_string_lossy().into_owned(),
                    args: full,
                })
            }
            LaunchPlan::Verbatim { command, args } => Ok(ResolvedCommand {
                program: command.clone(),
                args: args.clone(),
            }),
        }
    }
}
