//! `imo` commands
//!
//! ## Commands
//!
//! - `imo add|remove|enable|disable` - edit module and scope overrides
//! - `imo list|map|page-map|view` - inspect overrides and effective maps
//! - `imo reset` - drop every override and external reference
//! - `imo external ...` - manage external override maps
//! - `imo template ...` - save and restore named override sets

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use imo_engine::{
    Host, ImoConfig, ImportMap, JsonFileStore, MapSource, OverrideEngine, PageContext,
    ReqwestFetcher, Startup,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Manage import map overrides from the command line
#[derive(Debug, Parser)]
#[command(name = "imo", version)]
pub struct Cli {
    /// Override store file (default: ~/.config/imo/overrides.json)
    #[arg(long, global = true, value_name = "PATH")]
    pub store: Option<PathBuf>,

    /// Config file (default: $IMO_CONFIG or ~/.config/imo/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Hostname checked against the domain restriction
    #[arg(long, global = true, default_value = "localhost")]
    pub hostname: String,

    /// Page URL; its query string feeds query-parameter overrides and it is
    /// the base for relative external map URLs
    #[arg(long, global = true, value_name = "URL")]
    pub page_url: Option<String>,

    /// Default import map: a file with inline JSON or a URL. Repeatable;
    /// later maps win.
    #[arg(long = "default-map", global = true, value_name = "FILE_OR_URL")]
    pub default_maps: Vec<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Override a module. A bare port expands to a localhost URL.
    Add {
        module: String,
        url: String,
        #[command(flatten)]
        scope: ScopeArg,
    },
    /// Remove an override
    Remove {
        module: String,
        #[command(flatten)]
        scope: ScopeArg,
    },
    /// Re-enable a disabled override
    Enable {
        module: String,
        #[command(flatten)]
        scope: ScopeArg,
    },
    /// Disable an override without removing it
    Disable {
        module: String,
        #[command(flatten)]
        scope: ScopeArg,
    },
    /// List stored overrides
    List {
        /// Include disabled overrides
        #[arg(long)]
        all: bool,
    },
    /// Print the override map as JSON
    Map {
        /// Include disabled overrides
        #[arg(long)]
        all: bool,
    },
    /// Print the full effective import map as JSON
    PageMap {
        /// Map as applied at startup instead of the one the next load sees
        #[arg(long)]
        current: bool,
    },
    /// Default modules joined with overrides
    View,
    /// Remove every override, external map and disabled flag
    Reset,
    /// Manage external override maps
    External {
        #[command(subcommand)]
        command: ExternalCommand,
    },
    /// Manage override templates
    Template {
        #[command(subcommand)]
        command: TemplateCommand,
    },
}

#[derive(Debug, Args)]
pub struct ScopeArg {
    /// Scope prefix the override applies under
    #[arg(long)]
    pub scope: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum ExternalCommand {
    Add { url: String },
    Remove { url: String },
    Enable { url: String },
    Disable { url: String },
    /// List external maps
    List {
        /// Fetch each map and report whether it is valid
        #[arg(long)]
        check: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum TemplateCommand {
    /// Snapshot the current overrides under a new name
    Save { name: String },
    /// Replace the current overrides with a template
    Apply { name: String },
    Delete { name: String },
    List,
    /// Name of the template matching the current overrides
    Active,
}

impl Cli {
    /// Returns the process exit code.
    pub async fn run(self) -> anyhow::Result<i32> {
        let config = match &self.config {
            Some(path) => ImoConfig::load_from_path(path)?,
            None => ImoConfig::load()?,
        };
        let host = self.host()?;

        let engine = match OverrideEngine::create(config, host)? {
            Startup::Active(engine) => engine,
            Startup::Disabled(reason) => {
                eprintln!("import map overrides are disabled: {reason}");
                return Ok(1);
            }
        };

        let code = run_command(&engine, self.command).await?;
        engine.dispose();
        Ok(code)
    }

    fn host(&self) -> anyhow::Result<Host> {
        let store = match &self.store {
            Some(path) => JsonFileStore::with_path(path.clone()),
            None => JsonFileStore::new().context("cannot locate default override store")?,
        };
        tracing::debug!(store = %store.path().display(), "using override store");

        let default_maps = self
            .default_maps
            .iter()
            .map(String::as_str)
            .map(map_source)
            .collect::<anyhow::Result<Vec<_>>>()?;

        let page = PageContext {
            hostname: self.hostname.clone(),
            url: self.page_url.clone(),
            base_url: self.page_url.clone(),
            default_maps,
            ..Default::default()
        };
        Ok(Host::new(page, Arc::new(store), Arc::new(ReqwestFetcher::new())))
    }
}

/// Existing files are read as inline JSON; anything else is a URL.
fn map_source(value: &str) -> anyhow::Result<MapSource> {
    let path = Path::new(value);
    if path.is_file() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read default map {}", path.display()))?;
        Ok(MapSource::inline(text))
    } else {
        Ok(MapSource::remote(value))
    }
}

async fn run_command(engine: &OverrideEngine, command: Command) -> anyhow::Result<i32> {
    match command {
        Command::Add { module, url, scope } => {
            let map = match scope.scope {
                Some(scope) => engine.add_scope_override(&scope, &module, &url)?,
                None => engine.add_override(&module, &url)?,
            };
            print_map(&map);
        }
        Command::Remove { module, scope } => {
            let existed = match &scope.scope {
                Some(scope) => engine.has_scope_override(scope, &module),
                None => engine.has_override(&module),
            };
            if !existed {
                eprintln!("no override for {module}");
                return Ok(1);
            }
            let map = match scope.scope {
                Some(scope) => engine.remove_scope_override(&scope, &module)?,
                None => engine.remove_override(&module)?,
            };
            print_map(&map);
        }
        Command::Enable { module, scope } => {
            let map = match scope.scope {
                Some(scope) => engine.enable_scope_override(&scope, &module)?,
                None => engine.enable_override(&module)?,
            };
            print_map(&map);
        }
        Command::Disable { module, scope } => {
            let map = match scope.scope {
                Some(scope) => engine.disable_scope_override(&scope, &module)?,
                None => engine.disable_override(&module)?,
            };
            print_map(&map);
        }
        Command::List { all } => {
            for record in engine.overrides() {
                if !all && !record.enabled {
                    continue;
                }
                let mut line = format!("{} {}", record.module_name, record.url);
                if let Some(scope) = &record.scope {
                    line.push_str(&format!(" (scope {scope})"));
                }
                if !record.enabled {
                    line.push_str(" [disabled]");
                }
                println!("{line}");
            }
        }
        Command::Map { all } => print_map(&engine.override_map(all)?),
        Command::PageMap { current } => {
            let map = if current {
                engine.current_page_map().await?
            } else {
                engine.next_page_map().await?
            };
            print_map(&map);
        }
        Command::View => {
            for entry in engine.module_view().await? {
                let marker = if entry.is_overridden { "*" } else { " " };
                match &entry.scope {
                    Some(scope) => println!("{marker} {} {} (scope {scope})", entry.module_name, entry.url),
                    None => println!("{marker} {} {}", entry.module_name, entry.url),
                }
            }
        }
        Command::Reset => engine.reset_overrides(),
        Command::External { command } => return run_external(engine, command).await,
        Command::Template { command } => return Ok(run_template(engine, command)),
    }
    Ok(0)
}

async fn run_external(engine: &OverrideEngine, command: ExternalCommand) -> anyhow::Result<i32> {
    match command {
        ExternalCommand::Add { url } => print_map(&engine.add_external_override(&url)?),
        ExternalCommand::Remove { url } => print_map(&engine.remove_external_override(&url)?),
        ExternalCommand::Enable { url } => print_map(&engine.enable_external_override(&url)?),
        ExternalCommand::Disable { url } => print_map(&engine.disable_external_override(&url)?),
        ExternalCommand::List { check } => {
            for reference in engine.external_overrides() {
                let state = if reference.enabled { "enabled" } else { "disabled" };
                if check {
                    let valid = engine.is_external_map_valid(&reference.url).await;
                    let validity = if valid { "valid" } else { "invalid" };
                    println!("{} {state} {validity}", reference.url);
                } else {
                    println!("{} {state}", reference.url);
                }
            }
        }
    }
    Ok(0)
}

fn run_template(engine: &OverrideEngine, command: TemplateCommand) -> i32 {
    match command {
        TemplateCommand::Save { name } => {
            if !engine.save_template(&name) {
                eprintln!("template name is empty or already taken: {name}");
                return 1;
            }
        }
        TemplateCommand::Apply { name } => {
            if !engine.apply_template(&name) {
                eprintln!("no template named {name}");
                return 1;
            }
        }
        TemplateCommand::Delete { name } => engine.delete_template(&name),
        TemplateCommand::List => {
            let active = engine.active_template_name();
            for template in engine.templates() {
                let marker = if active.as_deref() == Some(template.name.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {} ({} overrides)", template.name, template.items.len());
            }
        }
        TemplateCommand::Active => match engine.active_template_name() {
            Some(name) => println!("{name}"),
            None => return 1,
        },
    }
    0
}

fn print_map(map: &ImportMap) {
    println!("{}", map.to_pretty_json());
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_parse_scoped_add() {
        let cli = Cli::try_parse_from([
            "imo",
            "--store",
            "/tmp/o.json",
            "add",
            "@org/app",
            "8080",
            "--scope",
            "/app/",
        ])
        .expect("parse");
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/o.json")));
        match cli.command {
            Command::Add { module, url, scope } => {
                assert_eq!(module, "@org/app");
                assert_eq!(url, "8080");
                assert_eq!(scope.scope.as_deref(), Some("/app/"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_repeated_default_maps() {
        let cli = Cli::try_parse_from([
            "imo",
            "page-map",
            "--default-map",
            "a.json",
            "--default-map",
            "https://cdn/map.json",
        ])
        .expect("parse");
        assert_eq!(cli.default_maps, vec!["a.json", "https://cdn/map.json"]);
    }

    #[test]
    fn test_map_source_reads_files_inline() {
        let dir = TempDir::new().expect("tempdir");
        let file = dir.path().join("map.json");
        std::fs::write(&file, r#"{"imports":{}}"#).expect("write");

        let inline = map_source(file.to_str().expect("utf8 path")).expect("source");
        assert_eq!(inline, MapSource::inline(r#"{"imports":{}}"#));
        let remote = map_source("https://cdn/map.json").expect("source");
        assert_eq!(remote, MapSource::remote("https://cdn/map.json"));
    }

    #[tokio::test]
    async fn test_commands_round_trip_through_file_store() {
        let dir = TempDir::new().expect("tempdir");
        let store = dir.path().join("overrides.json");
        let config = dir.path().join("config.toml");
        std::fs::write(&config, "").expect("write");
        let base = |args: &[&str]| {
            let mut argv = vec![
                "imo".to_string(),
                "--store".to_string(),
                store.display().to_string(),
                "--config".to_string(),
                config.display().to_string(),
            ];
            argv.extend(args.iter().map(ToString::to_string));
            Cli::try_parse_from(argv).expect("parse")
        };

        assert_eq!(base(&["add", "a", "3000"]).run().await.expect("run"), 0);
        assert_eq!(base(&["template", "save", "dev"]).run().await.expect("run"), 0);
        assert_eq!(base(&["template", "active"]).run().await.expect("run"), 0);
        assert_eq!(base(&["remove", "missing"]).run().await.expect("run"), 1);
        assert_eq!(base(&["reset"]).run().await.expect("run"), 0);
        assert_eq!(base(&["template", "active"]).run().await.expect("run"), 1);
        assert_eq!(base(&["template", "apply", "dev"]).run().await.expect("run"), 0);

        let raw = std::fs::read_to_string(&store).expect("read");
        assert!(raw.contains("//localhost:3000/a.js"));
    }
}
